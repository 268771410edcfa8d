//! Speech-synthesis announcer — an explicit state machine over a flaky
//! platform speech API.
//!
//! The announcer submits one utterance at a time to a [`SpeechPlatform`] and
//! tracks it through `Idle → Pending → Speaking → Idle`, with a `Cancelling`
//! detour when an in-flight utterance is interrupted. The machine is driven
//! entirely by external inputs: platform start/end/error events delivered via
//! [`handle_platform_event`](SpeechSynthesisAnnouncer::handle_platform_event)
//! and per-tick [`step`](Announcer::step) calls. There is no async flow, so
//! cancellation and timeouts stay observable.
//!
//! Several workarounds are required to get reliable speech out of real
//! engines:
//!
//! * a keep-alive ping while idle, so the engine does not wind down,
//! * periodic pause/resume on chromium (non-Android) with remote voices,
//!   which otherwise cut speech off around the 15 second mark,
//! * a pending-speech timeout for submissions whose start event never
//!   arrives,
//! * an enforced gap between utterances, long enough to absorb unreliable
//!   start/end event ordering.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::announcer::{Announcer, CompletionEvent, QueueView};
use crate::error::PlatformError;
use crate::observable::{lock, Emitter, ObservableCell, Subscription};
use crate::text;
use crate::utterance::{AnnouncerOptions, Utterance};

/// While idle, ping the platform this often so the engine stays warm.
pub const ENGINE_WAKE_INTERVAL: Duration = Duration::from_secs(10);

/// While speaking with a remote voice on chromium, pause/resume this often to
/// dodge the ~15 s cutoff.
pub const PAUSE_RESUME_INTERVAL: Duration = Duration::from_secs(10);

/// How long a submission may sit without a start event before it is declared
/// failed.
pub const PENDING_SPEECH_TIMEOUT: Duration = Duration::from_secs(5);

/// Floor for the configurable inter-utterance gap.
pub const MIN_INTER_UTTERANCE_GAP: Duration = Duration::from_millis(125);

// ── Platform seam ──────────────────────────────────────────────────

/// Identifier for one platform speech submission. Events carry the id so the
/// state machine can discard stale ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpeechRequestId(pub u64);

/// Metadata for one platform voice.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechVoice {
    /// Display name; also the de-duplication key.
    pub name: String,

    /// BCP-47 language tag, e.g. `en-US`.
    pub lang: String,

    /// Whether the voice synthesises locally (remote voices need the
    /// pause/resume workaround).
    pub local: bool,
}

/// Browser-family quirks the workarounds key off.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformQuirks {
    /// Chromium-derived engine.
    pub chromium: bool,

    /// Running on Android (chromium there does not need pause/resume).
    pub android: bool,
}

/// One speech submission.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    /// Submission id echoed back in platform events.
    pub id: SpeechRequestId,

    /// Sanitised text to speak.
    pub text: String,

    /// Voice to use; `None` means the platform default.
    pub voice: Option<SpeechVoice>,

    /// Pitch in `0.0..=2.0`.
    pub pitch: f64,

    /// Rate in `0.1..=10.0`.
    pub rate: f64,

    /// Volume in `0.0..=1.0`.
    pub volume: f64,
}

/// The platform speech API as the announcer consumes it.
///
/// Implementations wrap a real engine (or a test double). Methods take
/// `&self`; implementations manage their own interior state. Lifecycle
/// events flow back through
/// [`SpeechSynthesisAnnouncer::handle_platform_event`].
pub trait SpeechPlatform: Send + Sync {
    /// Submit an utterance for speaking.
    fn speak(&self, request: &SpeechRequest) -> Result<(), PlatformError>;

    /// Best-effort cancel of the current and queued submissions.
    fn cancel(&self);

    /// Pause speech output.
    fn pause(&self);

    /// Resume paused speech output.
    fn resume(&self);

    /// Whether the platform believes it is currently speaking.
    fn is_speaking(&self) -> bool;

    /// Currently known voices. May grow after a
    /// [`PlatformEvent::VoicesChanged`].
    fn voices(&self) -> Vec<SpeechVoice>;

    /// Browser-family quirks.
    fn quirks(&self) -> PlatformQuirks {
        PlatformQuirks::default()
    }
}

/// Platform lifecycle events, delivered by the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// The engine started speaking a submission.
    Started(SpeechRequestId),

    /// The engine finished a submission.
    Ended(SpeechRequestId),

    /// The engine failed a submission.
    Errored(SpeechRequestId),

    /// The platform's voice list changed.
    VoicesChanged,
}

// ── Configuration ──────────────────────────────────────────────────

/// Announcer-wide speech parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechSynthesisConfig {
    /// Voice pitch, clamped to `0.0..=2.0`.
    pub pitch: f64,

    /// Speaking rate, clamped to `0.1..=10.0`.
    pub rate: f64,

    /// Output volume, clamped to `0.0..=1.0`.
    pub volume: f64,

    /// Enforced silence between utterances; clamped to at least
    /// [`MIN_INTER_UTTERANCE_GAP`]. The default is deliberately generous to
    /// absorb unreliable start/end events.
    pub inter_utterance_gap: Duration,
}

impl Default for SpeechSynthesisConfig {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            rate: 1.0,
            volume: 1.0,
            inter_utterance_gap: Duration::from_millis(250),
        }
    }
}

impl SpeechSynthesisConfig {
    fn clamped(mut self) -> Self {
        self.pitch = self.pitch.clamp(0.0, 2.0);
        self.rate = self.rate.clamp(0.1, 10.0);
        self.volume = self.volume.clamp(0.0, 1.0);
        self.inter_utterance_gap = self.inter_utterance_gap.max(MIN_INTER_UTTERANCE_GAP);
        self
    }
}

// ── State machine ──────────────────────────────────────────────────

/// The utterance currently owned by the platform (pending or speaking).
struct ActiveUtterance {
    utterance: Utterance,
    text: String,
    id: SpeechRequestId,
    voice: Option<SpeechVoice>,

    /// Gate listeners, attached once speech actually starts. Detach when the
    /// wrapper is dropped.
    gate_subs: Vec<Subscription>,
}

enum Phase {
    Idle,
    Pending(ActiveUtterance),
    Speaking(ActiveUtterance),
    Cancelling(SpeechRequestId),
}

struct EngineState {
    phase: Phase,
    ready_to_announce: bool,
    time_since_utterance_end: Duration,
    time_since_pending: Duration,
    time_since_waking_engine: Duration,
    time_since_pause_resume: Duration,
    next_id: u64,
    voices: Vec<SpeechVoice>,
    voice: Option<SpeechVoice>,
    config: SpeechSynthesisConfig,
}

impl EngineState {
    fn fresh_id(&mut self) -> SpeechRequestId {
        self.next_id += 1;
        SpeechRequestId(self.next_id)
    }

    fn active(&self) -> Option<&ActiveUtterance> {
        match &self.phase {
            Phase::Pending(active) | Phase::Speaking(active) => Some(active),
            Phase::Idle | Phase::Cancelling(_) => None,
        }
    }
}

/// Announcement start/end event payload.
#[derive(Debug, Clone)]
pub struct SpeechLifecycleEvent {
    /// The utterance involved.
    pub utterance: Utterance,

    /// The sanitised text submitted for it.
    pub text: String,
}

// ── Announcer ──────────────────────────────────────────────────────

/// [`Announcer`] over a [`SpeechPlatform`].
///
/// Construct with [`new`](Self::new) (always yields an `Arc`: the gate and
/// enable listeners need a weak handle back to the announcer). Speech is
/// inert until [`initialize`](Self::initialize) is called from a user
/// gesture — a platform requirement — but the announcer is safe to use
/// before that: every announce synthesises an immediate completion so queues
/// never stall.
pub struct SpeechSynthesisAnnouncer {
    platform: Arc<dyn SpeechPlatform>,
    state: Mutex<EngineState>,
    completion: Emitter<CompletionEvent>,
    started: Emitter<SpeechLifecycleEvent>,
    ended: Emitter<SpeechLifecycleEvent>,
    initialized: AtomicBool,
    has_spoken: AtomicBool,
    speech_allowed: ObservableCell<bool>,
    enabled: ObservableCell<bool>,
    main_window_enabled: ObservableCell<bool>,
    weak_self: Weak<Self>,
    _enable_subs: Vec<Subscription>,
}

impl SpeechSynthesisAnnouncer {
    /// Announcer with default configuration.
    ///
    /// `speech_allowed` is the externally-owned permission cell; the
    /// announcer also owns [`enabled`](Self::enabled_cell) and
    /// [`main_window_enabled`](Self::main_window_enabled_cell). Speech runs
    /// only while all three hold true, and the combined value turning false
    /// cancels whatever is in flight.
    #[must_use]
    pub fn new(platform: Arc<dyn SpeechPlatform>, speech_allowed: ObservableCell<bool>) -> Arc<Self> {
        Self::with_config(platform, speech_allowed, SpeechSynthesisConfig::default())
    }

    /// Announcer with explicit configuration (clamped to platform ranges).
    #[must_use]
    pub fn with_config(
        platform: Arc<dyn SpeechPlatform>,
        speech_allowed: ObservableCell<bool>,
        config: SpeechSynthesisConfig,
    ) -> Arc<Self> {
        let enabled = ObservableCell::new(true);
        let main_window_enabled = ObservableCell::new(true);

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let enable_subs = [&speech_allowed, &enabled, &main_window_enabled]
                .into_iter()
                .map(|cell| {
                    let weak = weak.clone();
                    cell.subscribe(move |_, _| {
                        let Some(announcer) = weak.upgrade() else { return };
                        if !announcer.speech_enabled() {
                            tracing::debug!("Speech disabled; cancelling in-flight utterance");
                            announcer.cancel();
                        }
                    })
                })
                .collect();

            Self {
                platform,
                state: Mutex::new(EngineState {
                    phase: Phase::Idle,
                    ready_to_announce: true,
                    time_since_utterance_end: Duration::ZERO,
                    time_since_pending: Duration::ZERO,
                    time_since_waking_engine: Duration::ZERO,
                    time_since_pause_resume: Duration::ZERO,
                    next_id: 0,
                    voices: Vec::new(),
                    voice: None,
                    config: config.clamped(),
                }),
                completion: Emitter::new(),
                started: Emitter::new(),
                ended: Emitter::new(),
                initialized: AtomicBool::new(false),
                has_spoken: AtomicBool::new(false),
                speech_allowed,
                enabled,
                main_window_enabled,
                weak_self: weak.clone(),
                _enable_subs: enable_subs,
            }
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Permit speech. Must be called from (or after) a user gesture, once;
    /// repeat calls are no-ops. Also eagerly loads the voice list.
    pub fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Speech synthesis initialised");
        self.refresh_voices();
    }

    /// Whether [`initialize`](Self::initialize) has been called.
    #[must_use]
    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Deliver a platform lifecycle event into the state machine.
    pub fn handle_platform_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::Started(id) => self.on_platform_start(id),
            PlatformEvent::Ended(id) => self.on_platform_end(id, false),
            PlatformEvent::Errored(id) => self.on_platform_end(id, true),
            PlatformEvent::VoicesChanged => self.refresh_voices(),
        }
    }

    // ── Enablement ─────────────────────────────────────────────────

    /// Whether all three enable cells currently hold true.
    #[must_use]
    pub fn speech_enabled(&self) -> bool {
        self.speech_allowed.get() && self.enabled.get() && self.main_window_enabled.get()
    }

    /// The announcer-owned enable cell.
    #[must_use]
    pub fn enabled_cell(&self) -> &ObservableCell<bool> {
        &self.enabled
    }

    /// The announcer-owned main-window enable cell.
    #[must_use]
    pub fn main_window_enabled_cell(&self) -> &ObservableCell<bool> {
        &self.main_window_enabled
    }

    // ── Voices ─────────────────────────────────────────────────────

    /// Known voices, de-duplicated by display name in platform order.
    #[must_use]
    pub fn voices(&self) -> Vec<SpeechVoice> {
        lock(&self.state).voices.clone()
    }

    /// Voices sorted with "Google" voices first and "Fred" last, platform
    /// order otherwise preserved.
    #[must_use]
    pub fn prioritized_voices(&self) -> Vec<SpeechVoice> {
        prioritize_voices(self.voices())
    }

    /// [`prioritized_voices`](Self::prioritized_voices) filtered to a
    /// BCP-47 language prefix (`"en"` matches `en`, `en-US`, …).
    #[must_use]
    pub fn prioritized_voices_for_lang(&self, lang: &str) -> Vec<SpeechVoice> {
        let prefix = format!("{lang}-");
        let voices = self
            .voices()
            .into_iter()
            .filter(|v| v.lang == lang || v.lang.starts_with(&prefix))
            .collect();
        prioritize_voices(voices)
    }

    /// Set the default voice for subsequent announcements.
    pub fn set_voice(&self, voice: Option<SpeechVoice>) {
        lock(&self.state).voice = voice;
    }

    /// The current default voice.
    #[must_use]
    pub fn voice(&self) -> Option<SpeechVoice> {
        lock(&self.state).voice.clone()
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> SpeechSynthesisConfig {
        lock(&self.state).config.clone()
    }

    /// Replace the configuration (clamped to platform ranges).
    pub fn set_config(&self, config: SpeechSynthesisConfig) {
        lock(&self.state).config = config.clamped();
    }

    // ── Lifecycle emitters ─────────────────────────────────────────

    /// Emits when the platform actually starts speaking an utterance.
    #[must_use]
    pub fn started(&self) -> &Emitter<SpeechLifecycleEvent> {
        &self.started
    }

    /// Emits when the platform finishes (or is interrupted on) an utterance.
    #[must_use]
    pub fn ended(&self) -> &Emitter<SpeechLifecycleEvent> {
        &self.ended
    }

    // ── Internals ──────────────────────────────────────────────────

    fn refresh_voices(&self) {
        let mut seen = HashSet::new();
        let voices: Vec<SpeechVoice> = self
            .platform
            .voices()
            .into_iter()
            .filter(|voice| seen.insert(voice.name.clone()))
            .collect();
        tracing::debug!(count = voices.len(), "Voice list refreshed");
        lock(&self.state).voices = voices;
    }

    /// Emit a completion without ever having engaged the platform.
    fn synthesise_completion(&self, utterance: &Utterance, text: &str) {
        self.completion.emit(&CompletionEvent {
            utterance: utterance.clone(),
            text: Some(text.to_string()),
        });
    }

    fn on_platform_start(&self, id: SpeechRequestId) {
        let started = {
            let mut state = lock(&self.state);
            let phase = std::mem::replace(&mut state.phase, Phase::Idle);
            match phase {
                Phase::Pending(mut active) if active.id == id => {
                    active.gate_subs = self.gate_subscriptions(&active.utterance);
                    let payload = SpeechLifecycleEvent {
                        utterance: active.utterance.clone(),
                        text: active.text.clone(),
                    };
                    state.phase = Phase::Speaking(active);
                    state.time_since_pause_resume = Duration::ZERO;
                    Some(payload)
                }
                other => {
                    tracing::debug!(id = id.0, "Ignoring stale start event");
                    state.phase = other;
                    None
                }
            }
        };

        if let Some(payload) = started {
            tracing::debug!(utterance = ?payload.utterance, "Speech started");
            self.has_spoken.store(true, Ordering::SeqCst);
            self.started.emit(&payload);
        }
    }

    fn on_platform_end(&self, id: SpeechRequestId, errored: bool) {
        let finished = {
            let mut state = lock(&self.state);
            let phase = std::mem::replace(&mut state.phase, Phase::Idle);
            match phase {
                Phase::Speaking(active) | Phase::Pending(active) if active.id == id => {
                    state.time_since_utterance_end = Duration::ZERO;
                    Some(active)
                }
                Phase::Cancelling(cancelled) if cancelled == id => {
                    // Completion was already synthesised at cancel time.
                    state.time_since_utterance_end = Duration::ZERO;
                    None
                }
                other => {
                    tracing::debug!(id = id.0, errored, "Ignoring stale end event");
                    state.phase = other;
                    None
                }
            }
        };

        if let Some(active) = finished {
            if errored {
                tracing::warn!(utterance = ?active.utterance, "Platform reported a speech error");
            } else {
                tracing::debug!(utterance = ?active.utterance, "Speech ended");
            }
            let ActiveUtterance {
                utterance, text, ..
            } = active;
            self.ended.emit(&SpeechLifecycleEvent {
                utterance: utterance.clone(),
                text: text.clone(),
            });
            self.completion.emit(&CompletionEvent {
                utterance,
                text: Some(text),
            });
        }
    }

    /// Gate listeners for a speaking utterance: any gate cell change that
    /// makes the conjunction false interrupts the announcement.
    fn gate_subscriptions(&self, utterance: &Utterance) -> Vec<Subscription> {
        utterance
            .can_announce_cells()
            .iter()
            .map(|cell| {
                let weak = self.weak_self.clone();
                let weak_utterance = utterance.downgrade();
                cell.subscribe(move |_, _| {
                    let (Some(announcer), Some(utterance)) =
                        (weak.upgrade(), weak_utterance.upgrade())
                    else {
                        return;
                    };
                    if !utterance.can_announce() {
                        tracing::debug!(?utterance, "Gate closed mid-announcement; interrupting");
                        announcer.cancel_utterance(&utterance);
                    }
                })
            })
            .collect()
    }

    /// Declare the pending submission failed: synthesise its end and force a
    /// platform cancel.
    fn fail_pending(&self) {
        let failed = {
            let mut state = lock(&self.state);
            let phase = std::mem::replace(&mut state.phase, Phase::Idle);
            match phase {
                Phase::Pending(active) => {
                    state.time_since_utterance_end = Duration::ZERO;
                    Some(active)
                }
                other => {
                    state.phase = other;
                    None
                }
            }
        };

        if let Some(active) = failed {
            tracing::warn!(
                utterance = ?active.utterance,
                "No start event within the pending timeout; declaring announce failure"
            );
            self.platform.cancel();
            self.completion.emit(&CompletionEvent {
                utterance: active.utterance,
                text: Some(active.text),
            });
        }
    }
}

impl Announcer for SpeechSynthesisAnnouncer {
    fn announce(&self, utterance: &Utterance, options: &AnnouncerOptions, text: &str) {
        if !self.initialized() || !self.speech_enabled() {
            tracing::debug!(
                ?utterance,
                initialized = self.initialized(),
                "Speech unavailable; synthesising completion"
            );
            self.synthesise_completion(utterance, text);
            return;
        }

        let sanitized = text::sanitize_for_speech(text);
        if sanitized.is_empty() {
            // Sanitisation can empty an alert that was all markup.
            self.synthesise_completion(utterance, text);
            return;
        }

        // The queue gates on ready_to_announce, but a second queue sharing
        // this announcer (or a direct caller) can still land here mid-flight.
        if lock(&self.state).active().is_some() {
            debug_assert!(false, "announce while an utterance is in flight");
            self.cancel();
        }

        let request = {
            let mut state = lock(&self.state);
            let id = state.fresh_id();
            let voice = options
                .voice
                .as_ref()
                .and_then(|name| state.voices.iter().find(|v| &v.name == name).cloned())
                .or_else(|| state.voice.clone());
            state.phase = Phase::Pending(ActiveUtterance {
                utterance: utterance.clone(),
                text: sanitized.clone(),
                id,
                voice: voice.clone(),
                gate_subs: Vec::new(),
            });
            state.ready_to_announce = false;
            state.time_since_pending = Duration::ZERO;
            SpeechRequest {
                id,
                text: sanitized,
                voice,
                pitch: state.config.pitch,
                rate: state.config.rate,
                volume: state.config.volume,
            }
        };

        tracing::debug!(id = request.id.0, text = %request.text, "Submitting to speech platform");
        if let Err(error) = self.platform.speak(&request) {
            tracing::warn!(%error, "Speech platform rejected submission");
            self.fail_pending();
        }
    }

    fn cancel(&self) {
        let current = lock(&self.state)
            .active()
            .map(|active| active.utterance.clone());
        if let Some(utterance) = current {
            self.cancel_utterance(&utterance);
        }
    }

    fn cancel_utterance(&self, utterance: &Utterance) {
        let cancelled = {
            let mut state = lock(&self.state);
            let matches = state
                .active()
                .is_some_and(|active| active.utterance == *utterance);
            if matches {
                let was_speaking = matches!(state.phase, Phase::Speaking(_));
                let phase = std::mem::replace(&mut state.phase, Phase::Idle);
                match phase {
                    Phase::Pending(active) | Phase::Speaking(active) => {
                        state.phase = Phase::Cancelling(active.id);
                        state.time_since_pending = Duration::ZERO;
                        state.time_since_utterance_end = Duration::ZERO;
                        Some((active, was_speaking))
                    }
                    other => {
                        state.phase = other;
                        None
                    }
                }
            } else {
                None
            }
        };

        if let Some((active, was_speaking)) = cancelled {
            tracing::debug!(utterance = ?active.utterance, was_speaking, "Cancelling utterance");
            // Best-effort platform cancel first, then the synthesised end —
            // a completion listener may immediately submit new speech.
            self.platform.cancel();
            let ActiveUtterance {
                utterance, text, ..
            } = active;
            if was_speaking {
                self.ended.emit(&SpeechLifecycleEvent {
                    utterance: utterance.clone(),
                    text: text.clone(),
                });
            }
            self.completion.emit(&CompletionEvent {
                utterance,
                text: Some(text),
            });
        }
    }

    #[allow(clippy::float_cmp)]
    fn should_utterance_cancel_other(&self, candidate: &Utterance, victim: &Utterance) -> bool {
        let candidate_priority = candidate.priority_value();
        let victim_priority = victim.priority_value();

        if candidate_priority != victim_priority {
            victim_priority < candidate_priority
        } else if candidate == victim {
            candidate.announcer_options().cancel_self
        } else {
            candidate.announcer_options().cancel_other
        }
    }

    fn on_utterance_priority_change(&self, front: &Utterance) {
        let current = lock(&self.state)
            .active()
            .map(|active| active.utterance.clone());
        let Some(current) = current else { return };

        if self.should_utterance_cancel_other(front, &current) {
            tracing::debug!(
                interrupted = ?current,
                by = ?front,
                "Front-of-queue priority change interrupts current utterance"
            );
            self.cancel_utterance(&current);
        }
    }

    fn step(&self, dt: Duration, queue: &QueueView<'_>) {
        enum Maintenance {
            FailPending,
            PauseResume,
            WakeEngine(SpeechRequest),
        }

        let initialized = self.initialized();
        let quirks = self.platform.quirks();

        let mut actions: Vec<Maintenance> = Vec::new();
        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            match &state.phase {
                Phase::Idle => {
                    state.time_since_utterance_end =
                        state.time_since_utterance_end.saturating_add(dt);
                    if !state.ready_to_announce
                        && state.time_since_utterance_end > state.config.inter_utterance_gap
                    {
                        state.ready_to_announce = true;
                    }

                    state.time_since_waking_engine =
                        state.time_since_waking_engine.saturating_add(dt);
                    if initialized
                        && queue.is_empty()
                        && state.time_since_waking_engine > ENGINE_WAKE_INTERVAL
                    {
                        state.time_since_waking_engine = Duration::ZERO;
                        let id = state.fresh_id();
                        actions.push(Maintenance::WakeEngine(SpeechRequest {
                            id,
                            text: String::new(),
                            voice: None,
                            pitch: state.config.pitch,
                            rate: state.config.rate,
                            volume: state.config.volume,
                        }));
                    }
                }
                Phase::Pending(_) => {
                    state.time_since_pending = state.time_since_pending.saturating_add(dt);
                    if state.time_since_pending > PENDING_SPEECH_TIMEOUT {
                        actions.push(Maintenance::FailPending);
                    }
                }
                Phase::Speaking(active) => {
                    state.time_since_pause_resume =
                        state.time_since_pause_resume.saturating_add(dt);
                    let remote_voice = active.voice.as_ref().is_some_and(|v| !v.local);
                    if quirks.chromium
                        && !quirks.android
                        && remote_voice
                        && state.time_since_pause_resume > PAUSE_RESUME_INTERVAL
                    {
                        state.time_since_pause_resume = Duration::ZERO;
                        actions.push(Maintenance::PauseResume);
                    }
                }
                Phase::Cancelling(_) => {
                    // A platform that swallows the end event after a cancel
                    // must not wedge the machine.
                    state.time_since_pending = state.time_since_pending.saturating_add(dt);
                    if state.time_since_pending > PENDING_SPEECH_TIMEOUT {
                        tracing::debug!("No end event after cancel; forcing idle");
                        state.phase = Phase::Idle;
                        state.time_since_utterance_end = Duration::ZERO;
                    }
                }
            }
        }

        for action in actions {
            match action {
                Maintenance::FailPending => self.fail_pending(),
                Maintenance::PauseResume => {
                    tracing::debug!("Pause/resume workaround tick");
                    self.platform.pause();
                    self.platform.resume();
                }
                Maintenance::WakeEngine(request) => {
                    tracing::debug!("Waking speech engine with an empty utterance");
                    if let Err(error) = self.platform.speak(&request) {
                        tracing::debug!(%error, "Engine wake submission failed");
                    }
                }
            }
        }
    }

    fn ready_to_announce(&self) -> bool {
        if !self.initialized() {
            // Every announce synthesises a completion, so the queue can and
            // should keep draining.
            return true;
        }
        let state = lock(&self.state);
        matches!(state.phase, Phase::Idle) && state.ready_to_announce
    }

    fn has_spoken(&self) -> bool {
        self.has_spoken.load(Ordering::SeqCst)
    }

    fn announce_immediately_until_speaking(&self) -> bool {
        true
    }

    fn respect_response_collector_properties(&self) -> bool {
        true
    }

    fn completion(&self) -> &Emitter<CompletionEvent> {
        &self.completion
    }
}

impl std::fmt::Debug for SpeechSynthesisAnnouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        let phase = match &state.phase {
            Phase::Idle => "Idle",
            Phase::Pending(_) => "Pending",
            Phase::Speaking(_) => "Speaking",
            Phase::Cancelling(_) => "Cancelling",
        };
        f.debug_struct("SpeechSynthesisAnnouncer")
            .field("phase", &phase)
            .field("ready_to_announce", &state.ready_to_announce)
            .field("initialized", &self.initialized())
            .finish_non_exhaustive()
    }
}

// ── Voice ordering ─────────────────────────────────────────────────

/// Stable-sort voices: "Google" voices to the front, "Fred" to the back,
/// everything else keeps platform order.
fn prioritize_voices(mut voices: Vec<SpeechVoice>) -> Vec<SpeechVoice> {
    voices.sort_by_key(|voice| {
        if voice.name.contains("Google") {
            0
        } else if voice.name.contains("Fred") {
            2
        } else {
            1
        }
    });
    voices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(name: &str, lang: &str) -> SpeechVoice {
        SpeechVoice {
            name: name.to_string(),
            lang: lang.to_string(),
            local: true,
        }
    }

    #[test]
    fn google_first_fred_last() {
        let voices = vec![
            voice("Alex", "en-US"),
            voice("Fred", "en-US"),
            voice("Google US English", "en-US"),
            voice("Samantha", "en-US"),
        ];
        let prioritized = prioritize_voices(voices);
        let names: Vec<&str> = prioritized.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["Google US English", "Alex", "Samantha", "Fred"]);
    }

    #[test]
    fn prioritize_is_stable_for_ties() {
        let voices = vec![voice("B", "en"), voice("A", "en"), voice("C", "en")];
        let names: Vec<String> = prioritize_voices(voices).into_iter().map(|v| v.name).collect();
        assert_eq!(names, ["B", "A", "C"]);
    }

    #[test]
    fn config_clamps_to_platform_ranges() {
        let config = SpeechSynthesisConfig {
            pitch: 5.0,
            rate: 0.0,
            volume: 2.0,
            inter_utterance_gap: Duration::from_millis(1),
        }
        .clamped();

        assert!((config.pitch - 2.0).abs() < f64::EPSILON);
        assert!((config.rate - 0.1).abs() < f64::EPSILON);
        assert!((config.volume - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.inter_utterance_gap, MIN_INTER_UTTERANCE_GAP);
    }

    #[test]
    fn cancel_rule_prefers_priority_then_options() {
        use crate::utterance::{UtteranceOptions, Utterance};

        struct NoPlatform;
        impl SpeechPlatform for NoPlatform {
            fn speak(&self, _request: &SpeechRequest) -> Result<(), PlatformError> {
                Err(PlatformError::Unavailable)
            }
            fn cancel(&self) {}
            fn pause(&self) {}
            fn resume(&self) {}
            fn is_speaking(&self) -> bool {
                false
            }
            fn voices(&self) -> Vec<SpeechVoice> {
                Vec::new()
            }
        }

        let announcer =
            SpeechSynthesisAnnouncer::new(Arc::new(NoPlatform), ObservableCell::new(true));

        let low = Utterance::with_options(
            "low",
            UtteranceOptions {
                priority: 1.0,
                ..UtteranceOptions::default()
            },
        );
        let high = Utterance::with_options(
            "high",
            UtteranceOptions {
                priority: 2.0,
                ..UtteranceOptions::default()
            },
        );

        assert!(announcer.should_utterance_cancel_other(&high, &low));
        assert!(!announcer.should_utterance_cancel_other(&low, &high));

        // Equal priority falls back to the candidate's options.
        let other = Utterance::new("other");
        assert!(announcer.should_utterance_cancel_other(&low, &other));
        assert!(announcer.should_utterance_cancel_other(&low, &low));

        let mut options = UtteranceOptions::default();
        options.announcer.cancel_self = false;
        options.announcer.cancel_other = false;
        let meek = Utterance::with_options("meek", options);
        assert!(!announcer.should_utterance_cancel_other(&meek, &other));
        assert!(!announcer.should_utterance_cancel_other(&meek, &meek));
    }
}
