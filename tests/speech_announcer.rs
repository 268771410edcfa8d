//! Integration tests for the speech-synthesis announcer state machine.
//!
//! A recording mock platform stands in for the real speech engine; tests
//! submit utterances through a queue, deliver platform start/end/error
//! events by hand, and advance time with explicit `step` calls. This keeps
//! every transition of `Idle → Pending → Speaking → Idle` (and the
//! `Cancelling` detour) observable.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use utterance_queue::{
    speech_synthesis_queue, Announcer, CompletionEvent, ObservableCell, PlatformError,
    PlatformEvent, PlatformQuirks, ResponseCollector, SpeechPlatform, SpeechRequest,
    SpeechRequestId, SpeechSynthesisAnnouncer, SpeechSynthesisConfig, SpeechVoice, Subscription,
    Utterance, UtteranceOptions, UtteranceQueue,
};

// ── Mock platform ──────────────────────────────────────────────────

/// Recorded state for the mock platform, inspectable after a test.
#[derive(Default)]
struct PlatformState {
    /// Every request passed to `speak`, in order.
    requests: Vec<SpeechRequest>,
    cancels: usize,
    pauses: usize,
    resumes: usize,
}

/// Mock [`SpeechPlatform`] that records which methods were called.
struct MockPlatform {
    state: Arc<Mutex<PlatformState>>,
    voices: Vec<SpeechVoice>,
    quirks: PlatformQuirks,
    fail_speak: bool,
}

impl MockPlatform {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::default(),
            voices: Vec::new(),
            quirks: PlatformQuirks::default(),
            fail_speak: false,
        })
    }

    fn with_voices(voices: Vec<SpeechVoice>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::default(),
            voices,
            quirks: PlatformQuirks::default(),
            fail_speak: false,
        })
    }

    fn chromium() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::default(),
            voices: Vec::new(),
            quirks: PlatformQuirks {
                chromium: true,
                android: false,
            },
            fail_speak: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::default(),
            voices: Vec::new(),
            quirks: PlatformQuirks::default(),
            fail_speak: true,
        })
    }

    fn requests(&self) -> Vec<SpeechRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    fn last_id(&self) -> SpeechRequestId {
        self.state
            .lock()
            .unwrap()
            .requests
            .last()
            .expect("no request submitted")
            .id
    }

    fn cancels(&self) -> usize {
        self.state.lock().unwrap().cancels
    }

    fn pauses(&self) -> usize {
        self.state.lock().unwrap().pauses
    }

    fn resumes(&self) -> usize {
        self.state.lock().unwrap().resumes
    }
}

impl SpeechPlatform for MockPlatform {
    fn speak(&self, request: &SpeechRequest) -> Result<(), PlatformError> {
        if self.fail_speak {
            return Err(PlatformError::SubmitFailed("mock refusal".to_string()));
        }
        self.state.lock().unwrap().requests.push(request.clone());
        Ok(())
    }

    fn cancel(&self) {
        self.state.lock().unwrap().cancels += 1;
    }

    fn pause(&self) {
        self.state.lock().unwrap().pauses += 1;
    }

    fn resume(&self) {
        self.state.lock().unwrap().resumes += 1;
    }

    fn is_speaking(&self) -> bool {
        false
    }

    fn voices(&self) -> Vec<SpeechVoice> {
        self.voices.clone()
    }

    fn quirks(&self) -> PlatformQuirks {
        self.quirks
    }
}

// ── Helpers ────────────────────────────────────────────────────────

const TICK: f64 = 1.0 / 60.0;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("utterance_queue=debug")
        .with_test_writer()
        .try_init();
}

fn wired(
    platform: Arc<MockPlatform>,
) -> (UtteranceQueue, Arc<SpeechSynthesisAnnouncer>) {
    wired_with_config(platform, SpeechSynthesisConfig::default())
}

fn wired_with_config(
    platform: Arc<MockPlatform>,
    config: SpeechSynthesisConfig,
) -> (UtteranceQueue, Arc<SpeechSynthesisAnnouncer>) {
    speech_synthesis_queue(
        platform,
        ObservableCell::new(true),
        config,
        Arc::new(ResponseCollector::new()),
    )
}

fn stable_utterance(text: &str) -> Utterance {
    Utterance::with_options(
        text,
        UtteranceOptions {
            alert_stable_delay: Duration::ZERO,
            ..UtteranceOptions::default()
        },
    )
}

fn record_completions(
    announcer: &SpeechSynthesisAnnouncer,
) -> (Arc<Mutex<Vec<CompletionEvent>>>, Subscription) {
    let completions = Arc::new(Mutex::new(Vec::new()));
    let completions_in = Arc::clone(&completions);
    let sub = announcer.completion().subscribe(move |event| {
        completions_in.lock().unwrap().push(event.clone());
    });
    (completions, sub)
}

// ── Initialisation gate ────────────────────────────────────────────

#[test]
fn uninitialised_announcer_synthesises_completion() {
    init_tracing();
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));
    let (completions, _sub) = record_completions(&announcer);

    queue.add_to_back(stable_utterance("too early"));

    assert!(platform.requests().is_empty(), "nothing reached the platform");
    assert!(queue.is_empty(), "queue advanced past the utterance");
    assert_eq!(completions.lock().unwrap().len(), 1);
    assert!(!announcer.has_spoken(), "latch requires a real start event");
}

#[test]
fn initialize_is_idempotent_and_loads_voices() {
    let platform = MockPlatform::with_voices(vec![
        voice("Samantha", "en-US", true),
        voice("Samantha", "en-US", true),
        voice("Google UK English", "en-GB", false),
    ]);
    let (_queue, announcer) = wired(platform);

    announcer.initialize();
    announcer.initialize();

    let names: Vec<String> = announcer.voices().into_iter().map(|v| v.name).collect();
    assert_eq!(names, ["Samantha", "Google UK English"], "duplicates pruned");
}

// ── Lifecycle ──────────────────────────────────────────────────────

#[test]
fn full_lifecycle_pending_speaking_idle() {
    init_tracing();
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));
    let (completions, _sub) = record_completions(&announcer);

    announcer.initialize();

    let started = Arc::new(Mutex::new(Vec::new()));
    let started_in = Arc::clone(&started);
    let _started_sub = announcer.started().subscribe(move |event| {
        started_in.lock().unwrap().push(event.text.clone());
    });

    queue.announce_immediately(stable_utterance("hello world"));

    let requests = platform.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, "hello world");
    assert!(!announcer.ready_to_announce(), "busy while pending");
    assert!(!announcer.has_spoken());

    announcer.handle_platform_event(PlatformEvent::Started(platform.last_id()));
    assert_eq!(*started.lock().unwrap(), ["hello world"]);
    assert!(announcer.has_spoken());
    assert!(completions.lock().unwrap().is_empty());

    announcer.handle_platform_event(PlatformEvent::Ended(platform.last_id()));
    assert_eq!(completions.lock().unwrap().len(), 1);
    assert!(queue.announcing_utterance().is_none());

    // Not ready again until the inter-utterance gap has passed.
    assert!(!announcer.ready_to_announce());
    queue.step(0.3);
    assert!(announcer.ready_to_announce());
}

#[test]
fn stale_events_are_ignored() {
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));
    let (completions, _sub) = record_completions(&announcer);

    announcer.initialize();
    queue.announce_immediately(stable_utterance("real"));
    let id = platform.last_id();

    announcer.handle_platform_event(PlatformEvent::Started(SpeechRequestId(999)));
    announcer.handle_platform_event(PlatformEvent::Ended(SpeechRequestId(999)));
    assert!(completions.lock().unwrap().is_empty(), "stale ids do nothing");

    announcer.handle_platform_event(PlatformEvent::Started(id));
    announcer.handle_platform_event(PlatformEvent::Ended(id));
    assert_eq!(completions.lock().unwrap().len(), 1);

    // A duplicate end for an already-finished id is also stale.
    announcer.handle_platform_event(PlatformEvent::Ended(id));
    assert_eq!(completions.lock().unwrap().len(), 1);
}

#[test]
fn error_event_completes_like_an_end() {
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));
    let (completions, _sub) = record_completions(&announcer);

    announcer.initialize();
    queue.announce_immediately(stable_utterance("doomed"));

    announcer.handle_platform_event(PlatformEvent::Started(platform.last_id()));
    announcer.handle_platform_event(PlatformEvent::Errored(platform.last_id()));

    assert_eq!(completions.lock().unwrap().len(), 1);
    assert!(queue.announcing_utterance().is_none());
}

// ── Failure handling ───────────────────────────────────────────────

#[test]
fn pending_timeout_declares_announce_failure() {
    init_tracing();
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));
    let (completions, _sub) = record_completions(&announcer);

    announcer.initialize();
    queue.announce_immediately(stable_utterance("never starts"));
    assert_eq!(platform.requests().len(), 1);

    // No start event arrives; the pending timeout gives up after ~5 s.
    for _ in 0..6 {
        queue.step(1.0);
    }

    assert_eq!(completions.lock().unwrap().len(), 1, "end was synthesised");
    assert!(platform.cancels() >= 1, "platform was force-cancelled");
    assert!(queue.announcing_utterance().is_none(), "queue advanced");
}

#[test]
fn platform_refusal_synthesises_completion() {
    let platform = MockPlatform::failing();
    let (queue, announcer) = wired(Arc::clone(&platform));
    let (completions, _sub) = record_completions(&announcer);

    announcer.initialize();
    queue.announce_immediately(stable_utterance("rejected"));

    assert_eq!(completions.lock().unwrap().len(), 1);
    assert!(queue.announcing_utterance().is_none());
    assert!(platform.cancels() >= 1);
}

// ── Interrupts ─────────────────────────────────────────────────────

#[test]
fn gate_turning_false_interrupts_current_speech() {
    init_tracing();
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));
    let (completions, _sub) = record_completions(&announcer);

    announcer.initialize();

    let gate = ObservableCell::new(true);
    let utterance = stable_utterance("interruptible");
    utterance.add_can_announce_cell(gate.clone());

    queue.announce_immediately(utterance);
    announcer.handle_platform_event(PlatformEvent::Started(platform.last_id()));

    gate.set(false);

    assert_eq!(completions.lock().unwrap().len(), 1, "end synthesised on interrupt");
    assert_eq!(platform.cancels(), 1);

    // The real end event arriving later must not double-complete.
    announcer.handle_platform_event(PlatformEvent::Ended(platform.last_id()));
    assert_eq!(completions.lock().unwrap().len(), 1);
}

#[test]
fn higher_priority_arrival_interrupts_current_speech() {
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));
    let (completions, _sub) = record_completions(&announcer);

    announcer.initialize();

    let routine = stable_utterance("routine");
    queue.announce_immediately(routine.clone());
    announcer.handle_platform_event(PlatformEvent::Started(platform.last_id()));
    let first_id = platform.last_id();

    let urgent = Utterance::with_options(
        "urgent",
        UtteranceOptions {
            alert_stable_delay: Duration::ZERO,
            priority: 2.0,
            ..UtteranceOptions::default()
        },
    );
    queue.add_to_back(urgent.clone());

    // The routine utterance was cancelled the moment the queue reconciled.
    assert_eq!(completions.lock().unwrap().len(), 1);
    assert_eq!(completions.lock().unwrap()[0].utterance, routine);

    // After the platform acknowledges the cancel and the gap passes, the
    // urgent utterance goes out.
    announcer.handle_platform_event(PlatformEvent::Ended(first_id));
    queue.step(0.3);
    queue.step(TICK);

    assert_eq!(platform.requests().len(), 2);
    assert_eq!(platform.requests()[1].text, "urgent");
}

#[test]
fn disabling_speech_cancels_in_flight_utterance() {
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));
    let (completions, _sub) = record_completions(&announcer);

    announcer.initialize();
    queue.announce_immediately(stable_utterance("cut short"));
    announcer.handle_platform_event(PlatformEvent::Started(platform.last_id()));

    announcer.enabled_cell().set(false);

    assert!(!announcer.speech_enabled());
    assert_eq!(platform.cancels(), 1);
    assert_eq!(completions.lock().unwrap().len(), 1);
}

// ── Engine workarounds ─────────────────────────────────────────────

#[test]
fn keep_alive_pings_an_idle_engine() {
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));

    announcer.initialize();
    queue.step(11.0);

    let requests = platform.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, "", "wake ping is an empty utterance");
    assert!(announcer.ready_to_announce(), "wake ping does not occupy the machine");
}

#[test]
fn keep_alive_waits_while_utterances_are_queued() {
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));

    announcer.initialize();
    // A queued-but-unstable utterance suppresses the wake ping.
    queue.add_to_back(Utterance::with_options(
        "waiting",
        UtteranceOptions {
            alert_stable_delay: Duration::from_secs(3600),
            ..UtteranceOptions::default()
        },
    ));
    queue.step(11.0);

    assert!(platform.requests().is_empty());
}

#[test]
fn pause_resume_workaround_fires_for_remote_voices_on_chromium() {
    let platform = MockPlatform::chromium();
    let (queue, announcer) = wired(Arc::clone(&platform));

    announcer.initialize();
    announcer.set_voice(Some(voice("Google US English", "en-US", false)));

    queue.announce_immediately(stable_utterance("long form content"));
    announcer.handle_platform_event(PlatformEvent::Started(platform.last_id()));

    queue.step(5.0);
    assert_eq!(platform.pauses(), 0, "interval not yet reached");

    queue.step(6.0);
    assert_eq!(platform.pauses(), 1);
    assert_eq!(platform.resumes(), 1);
}

#[test]
fn pause_resume_workaround_skips_local_voices() {
    let platform = MockPlatform::chromium();
    let (queue, announcer) = wired(Arc::clone(&platform));

    announcer.initialize();
    announcer.set_voice(Some(voice("Local Voice", "en-US", true)));

    queue.announce_immediately(stable_utterance("long form content"));
    announcer.handle_platform_event(PlatformEvent::Started(platform.last_id()));

    queue.step(11.0);
    assert_eq!(platform.pauses(), 0);
}

// ── Inter-utterance gap ────────────────────────────────────────────

fn gap_is_enforced(gap: Duration) {
    let platform = MockPlatform::new();
    let (queue, announcer) = wired_with_config(
        Arc::clone(&platform),
        SpeechSynthesisConfig {
            inter_utterance_gap: gap,
            ..SpeechSynthesisConfig::default()
        },
    );

    announcer.initialize();
    queue.announce_immediately(stable_utterance("first"));
    announcer.handle_platform_event(PlatformEvent::Started(platform.last_id()));
    announcer.handle_platform_event(PlatformEvent::Ended(platform.last_id()));

    queue.add_to_back(stable_utterance("second"));

    // Half the gap: still silent.
    queue.step(gap.as_secs_f64() * 0.5);
    assert_eq!(platform.requests().len(), 1);
    assert!(!announcer.ready_to_announce());

    // Past the gap (plus a tick for the queue to act on readiness).
    queue.step(gap.as_secs_f64() * 0.6);
    queue.step(TICK);
    assert_eq!(platform.requests().len(), 2);
    assert_eq!(platform.requests()[1].text, "second");
}

#[test]
fn inter_utterance_gap_is_parametrised() {
    gap_is_enforced(Duration::from_millis(150));
    gap_is_enforced(Duration::from_millis(400));
}

// ── Text and voices ────────────────────────────────────────────────

#[test]
fn submitted_text_is_sanitised() {
    let platform = MockPlatform::new();
    let (queue, announcer) = wired(Arc::clone(&platform));

    announcer.initialize();
    queue.announce_immediately(stable_utterance("\u{202A}left<br/>right\u{202C}"));

    assert_eq!(platform.requests()[0].text, "left right");
}

#[test]
fn voiceschanged_refreshes_and_dedupes() {
    let platform = MockPlatform::with_voices(vec![
        voice("Fred", "en-US", true),
        voice("Google US English", "en-US", false),
        voice("Alex", "en-US", true),
        voice("Amelie", "fr-CA", true),
    ]);
    let (_queue, announcer) = wired(Arc::clone(&platform));

    announcer.handle_platform_event(PlatformEvent::VoicesChanged);

    let prioritized: Vec<String> = announcer
        .prioritized_voices()
        .into_iter()
        .map(|v| v.name)
        .collect();
    assert_eq!(
        prioritized,
        ["Google US English", "Alex", "Amelie", "Fred"]
    );

    let english: Vec<String> = announcer
        .prioritized_voices_for_lang("en")
        .into_iter()
        .map(|v| v.name)
        .collect();
    assert_eq!(english, ["Google US English", "Alex", "Fred"]);
}

#[test]
fn per_utterance_voice_pin_overrides_default() {
    let platform = MockPlatform::with_voices(vec![
        voice("Alex", "en-US", true),
        voice("Samantha", "en-US", true),
    ]);
    let (queue, announcer) = wired(Arc::clone(&platform));

    announcer.initialize();
    announcer.set_voice(Some(voice("Alex", "en-US", true)));

    let mut options = UtteranceOptions {
        alert_stable_delay: Duration::ZERO,
        ..UtteranceOptions::default()
    };
    options.announcer.voice = Some("Samantha".to_string());
    queue.announce_immediately(Utterance::with_options("pinned", options));

    let request_voice = platform.requests()[0].voice.clone();
    assert_eq!(request_voice.map(|v| v.name).as_deref(), Some("Samantha"));
}

fn voice(name: &str, lang: &str, local: bool) -> SpeechVoice {
    SpeechVoice {
        name: name.to_string(),
        lang: lang.to_string(),
        local,
    }
}
