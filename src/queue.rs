//! The scheduling core: an ordered, debounced, priority-reconciled queue of
//! utterances feeding a single announcer.
//!
//! The queue is a cheap-clone handle over shared state, stepped by an
//! external tick source. Producers add alerts from arbitrary event handlers;
//! every tick the queue ages its entries, picks the first *stable* one, and
//! hands it to the announcer. Priority changes re-rank the queue the moment
//! they happen and may interrupt the in-flight announcement.
//!
//! Re-entrancy contract: listener callbacks (priority changes, completion
//! listeners) may call straight back into any queue API. This works because
//! the internal lock is never held across a call-out — announcer methods and
//! emitter dispatch always run with the lock released.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::alertable::Alertable;
use crate::announcer::{Announcer, QueueView};
use crate::observable::{lock, Subscription};
use crate::responses::ResponseCollector;
use crate::utterance::Utterance;

// ── Queue internals ────────────────────────────────────────────────

/// One occurrence of an utterance in the queue.
struct QueueEntry {
    utterance: Utterance,

    /// Accumulated queue residence, carried across re-enqueues.
    time_in_queue: Duration,

    /// Time since this utterance was last (re-)enqueued.
    stable_time: Duration,

    /// In-queue priority subscription; `None` only for `add_to_front`
    /// entries. Detaches when the entry is dropped.
    _priority_sub: Option<Subscription>,
}

impl QueueEntry {
    fn is_stable(&self) -> bool {
        self.stable_time > self.utterance.alert_stable_delay()
            || self
                .utterance
                .alert_maximum_delay()
                .is_some_and(|max| self.time_in_queue > max)
    }
}

/// The at-most-one utterance currently handed to the announcer.
struct AnnouncingSlot {
    utterance: Utterance,

    /// Announcing-side priority subscription, independent of any in-queue
    /// subscription the same utterance may re-acquire while speaking.
    _priority_sub: Subscription,
}

struct QueueCore {
    entries: Vec<QueueEntry>,
    announcing: Option<AnnouncingSlot>,
    muted: bool,
    enabled: bool,
}

// ── UtteranceQueue ─────────────────────────────────────────────────

/// Priority announcement queue over a shared [`Announcer`].
pub struct UtteranceQueue {
    core: Arc<Mutex<QueueCore>>,
    announcer: Arc<dyn Announcer>,
    collector: Arc<ResponseCollector>,
    _completion_sub: Arc<Subscription>,
}

impl Clone for UtteranceQueue {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            announcer: Arc::clone(&self.announcer),
            collector: Arc::clone(&self.collector),
            _completion_sub: Arc::clone(&self._completion_sub),
        }
    }
}

impl UtteranceQueue {
    /// Create a queue feeding `announcer`, resolving response packets through
    /// `collector`.
    ///
    /// Several queues may share one announcer; each reacts only to
    /// completions for its own announcing utterance.
    #[must_use]
    pub fn new(announcer: Arc<dyn Announcer>, collector: Arc<ResponseCollector>) -> Self {
        let core = Arc::new(Mutex::new(QueueCore {
            entries: Vec::new(),
            announcing: None,
            muted: false,
            enabled: true,
        }));

        let completion_core = Arc::downgrade(&core);
        let completion_sub = announcer.completion().subscribe(move |event| {
            let Some(core) = completion_core.upgrade() else {
                return;
            };
            let mut core = lock(&core);
            if core
                .announcing
                .as_ref()
                .is_some_and(|slot| slot.utterance == event.utterance)
            {
                tracing::debug!(utterance = ?event.utterance, "Announcement complete");
                core.announcing = None;
            }
        });

        Self {
            core,
            announcer,
            collector,
            _completion_sub: Arc::new(completion_sub),
        }
    }

    /// The announcer this queue feeds.
    #[must_use]
    pub fn announcer(&self) -> &Arc<dyn Announcer> {
        &self.announcer
    }

    // ── Producer API ───────────────────────────────────────────────

    /// Append an alert to the back of the queue.
    ///
    /// No-op while the queue is disabled. An utterance already in the queue
    /// is re-enqueued: the old entry is removed, its accumulated
    /// `time_in_queue` carries over, and stability starts from zero.
    pub fn add_to_back(&self, alert: impl Into<Alertable>) {
        if !self.enabled() {
            return;
        }
        let utterance = to_utterance(alert.into());

        // Some announcers can only start speaking synchronously inside the
        // first user gesture; route through the immediate path until the
        // first announcement lands.
        if self.announcer.announce_immediately_until_speaking() && !self.announcer.has_spoken() {
            tracing::debug!(?utterance, "Routing add_to_back through announce_immediately");
            self.announce_immediately_utterance(utterance);
            return;
        }

        {
            let mut core = lock(&self.core);
            let carried = remove_entries_for(&mut core, &utterance);
            let sub = self.priority_subscription(&utterance);
            core.entries.push(QueueEntry {
                utterance: utterance.clone(),
                time_in_queue: carried,
                stable_time: Duration::ZERO,
                _priority_sub: Some(sub),
            });
            prioritise_locked(&mut core, self.announcer.as_ref(), &utterance);
        }
        self.notify_front();
    }

    /// Insert an alert at the front of the queue.
    ///
    /// Legacy escape hatch: unlike `add_to_back` this attaches no priority
    /// subscription, so later priority changes do not re-rank the entry.
    #[deprecated(note = "legacy escape hatch; prefer add_to_back or announce_immediately")]
    pub fn add_to_front(&self, alert: impl Into<Alertable>) {
        if !self.enabled() {
            return;
        }
        let utterance = to_utterance(alert.into());

        {
            let mut core = lock(&self.core);
            let carried = remove_entries_for(&mut core, &utterance);
            core.entries.insert(
                0,
                QueueEntry {
                    utterance: utterance.clone(),
                    time_in_queue: carried,
                    stable_time: Duration::ZERO,
                    _priority_sub: None,
                },
            );
            prioritise_locked(&mut core, self.announcer.as_ref(), &utterance);
        }
        self.notify_front();
    }

    /// Put an alert at the front of the queue and, if the announcer is ready,
    /// announce it within this call.
    ///
    /// The utterance still participates in prioritisation: a higher-priority
    /// utterance already at the front knocks it out. If the announcer is not
    /// ready the utterance stays at the front and is attempted on the next
    /// tick.
    pub fn announce_immediately(&self, alert: impl Into<Alertable>) {
        if !self.enabled() {
            return;
        }
        self.announce_immediately_utterance(to_utterance(alert.into()));
    }

    fn announce_immediately_utterance(&self, utterance: Utterance) {
        let survived = {
            let mut core = lock(&self.core);
            remove_entries_for(&mut core, &utterance);
            let sub = self.priority_subscription(&utterance);
            core.entries.insert(
                0,
                QueueEntry {
                    utterance: utterance.clone(),
                    // Sentinels: always stable, never short of its ceiling.
                    time_in_queue: Duration::MAX,
                    stable_time: Duration::MAX,
                    _priority_sub: Some(sub),
                },
            );
            prioritise_locked(&mut core, self.announcer.as_ref(), &utterance);
            core.entries.iter().any(|e| e.utterance == utterance)
        };
        self.notify_front();

        if survived {
            self.attempt_to_announce(&utterance);
        } else {
            tracing::debug!(?utterance, "announce_immediately out-prioritised, dropped");
        }
    }

    /// Remove every entry for `utterance`, detaching its in-queue priority
    /// subscription. Removing an utterance that is not queued is a
    /// debug-build assertion and a release-build no-op.
    pub fn remove_utterance(&self, utterance: &Utterance) {
        let mut core = lock(&self.core);
        let present = core.entries.iter().any(|e| e.utterance == *utterance);
        debug_assert!(present, "remove_utterance: utterance is not in the queue");
        if !present {
            tracing::warn!(?utterance, "Ignoring removal of an utterance that is not queued");
            return;
        }
        core.entries.retain(|e| e.utterance != *utterance);
    }

    /// Ask the announcer to cancel `utterance` if it is being announced.
    /// Queue state is untouched.
    pub fn cancel_utterance(&self, utterance: &Utterance) {
        self.announcer.cancel_utterance(utterance);
    }

    /// Empty the queue, detaching all in-queue subscriptions. The announcing
    /// utterance, if any, is not cancelled.
    pub fn clear(&self) {
        lock(&self.core).entries.clear();
    }

    /// [`clear`](Self::clear), then cancel the announcing utterance too.
    pub fn cancel(&self) {
        self.clear();
        self.announcer.cancel();
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// Whether `utterance` currently has a queue entry.
    #[must_use]
    pub fn has_utterance(&self, utterance: &Utterance) -> bool {
        lock(&self.core)
            .entries
            .iter()
            .any(|e| e.utterance == *utterance)
    }

    /// Number of queued utterances (the announcing one is not counted).
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.core).entries.len()
    }

    /// Whether the queue holds no utterances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.core).entries.is_empty()
    }

    /// Snapshot of the queued utterances in queue order.
    #[must_use]
    pub fn queued_utterances(&self) -> Vec<Utterance> {
        lock(&self.core)
            .entries
            .iter()
            .map(|e| e.utterance.clone())
            .collect()
    }

    /// The utterance currently in the announcing slot, if any.
    #[must_use]
    pub fn announcing_utterance(&self) -> Option<Utterance> {
        lock(&self.core)
            .announcing
            .as_ref()
            .map(|slot| slot.utterance.clone())
    }

    /// Whether announcements are suppressed. A muted queue still schedules
    /// and drains; chosen utterances are dropped instead of announced.
    #[must_use]
    pub fn muted(&self) -> bool {
        lock(&self.core).muted
    }

    /// Set the muted flag.
    pub fn set_muted(&self, muted: bool) {
        lock(&self.core).muted = muted;
    }

    /// Whether the queue accepts and schedules alerts at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        lock(&self.core).enabled
    }

    /// Set the enabled flag. While disabled, adds are no-ops and ticks do
    /// nothing; existing entries are kept.
    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.core).enabled = enabled;
    }

    // ── Tick loop ──────────────────────────────────────────────────

    /// Advance the queue by `dt_seconds` of wall-clock time.
    ///
    /// Ages every entry, announces the first stable one if the announcer is
    /// ready, then gives the announcer its own maintenance step.
    pub fn step(&self, dt_seconds: f64) {
        let dt = Duration::from_secs_f64(dt_seconds.max(0.0));

        let candidate = {
            let mut core = lock(&self.core);
            if !core.enabled {
                return;
            }
            for entry in &mut core.entries {
                entry.time_in_queue = entry.time_in_queue.saturating_add(dt);
                entry.stable_time = entry.stable_time.saturating_add(dt);
            }
            core.entries
                .iter()
                .find(|e| e.is_stable())
                .map(|e| e.utterance.clone())
        };

        if let Some(utterance) = candidate {
            self.attempt_to_announce(&utterance);
        }

        let snapshot: Vec<Utterance> = lock(&self.core)
            .entries
            .iter()
            .map(|e| e.utterance.clone())
            .collect();
        self.announcer.step(dt, &QueueView::new(&snapshot));
    }

    // ── Announce path ──────────────────────────────────────────────

    fn attempt_to_announce(&self, utterance: &Utterance) {
        if !self.announcer.ready_to_announce() {
            return;
        }

        let respect = self.announcer.respect_response_collector_properties();
        let text = utterance.alert().resolve(&self.collector, respect);
        let muted = lock(&self.core).muted;

        let text = match text {
            Some(text)
                if !text.is_empty()
                    && !muted
                    && utterance.predicate_holds()
                    && utterance.can_announce() =>
            {
                text
            }
            _ => {
                // Suppressed: the entry still leaves the queue.
                tracing::debug!(?utterance, muted, "Dropping utterance without announcing");
                lock(&self.core).entries.retain(|e| e.utterance != *utterance);
                return;
            }
        };

        {
            let mut core = lock(&self.core);
            // Resolution runs user code (dynamic alerts) that may have
            // mutated the queue; only announce an entry that is still here.
            let Some(index) = core.entries.iter().position(|e| e.utterance == *utterance) else {
                return;
            };
            core.entries.remove(index);
            debug_assert!(
                core.announcing.is_none(),
                "announcing slot occupied while announcer claimed ready"
            );
            core.announcing = Some(AnnouncingSlot {
                utterance: utterance.clone(),
                _priority_sub: self.priority_subscription(utterance),
            });
        }

        tracing::debug!(?utterance, text = %text, "Announcing");
        self.announcer
            .announce(utterance, utterance.announcer_options(), &text);

        // A synchronously-completing announcer may have run listeners that
        // re-queued this utterance during announce; it does not belong in the
        // queue while it is (or just was) the announcing one.
        lock(&self.core).entries.retain(|e| e.utterance != *utterance);
    }

    // ── Priority plumbing ──────────────────────────────────────────

    /// Subscription that re-runs prioritisation (seeded with `utterance`)
    /// whenever its priority changes. Used both for in-queue entries and for
    /// the announcing slot; the two subscriptions are independent and may
    /// coexist when an utterance is re-queued during its own announcement.
    fn priority_subscription(&self, utterance: &Utterance) -> Subscription {
        let core = Arc::downgrade(&self.core);
        let announcer = Arc::clone(&self.announcer);
        let weak_utterance = utterance.downgrade();

        utterance.priority().subscribe(move |_new, _old| {
            let (Some(core), Some(utterance)) = (core.upgrade(), weak_utterance.upgrade()) else {
                return;
            };
            run_prioritisation(&core, &announcer, &utterance);
        })
    }

    /// Notify the announcer that the front of the queue may have changed.
    fn notify_front(&self) {
        let front = lock(&self.core).entries.first().map(|e| e.utterance.clone());
        if let Some(front) = front {
            self.announcer.on_utterance_priority_change(&front);
        }
    }
}

impl std::fmt::Debug for UtteranceQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = lock(&self.core);
        f.debug_struct("UtteranceQueue")
            .field("len", &core.entries.len())
            .field("announcing", &core.announcing.as_ref().map(|s| &s.utterance))
            .field("muted", &core.muted)
            .field("enabled", &core.enabled)
            .finish()
    }
}

// ── Free helpers ───────────────────────────────────────────────────

/// An utterance passes through unchanged; any other alertable is wrapped in
/// a fresh default utterance.
fn to_utterance(alert: Alertable) -> Utterance {
    match alert {
        Alertable::Nested(utterance) => utterance,
        other => Utterance::new(other),
    }
}

/// Remove every entry for `utterance`, returning the largest accumulated
/// `time_in_queue` among them (to be carried into a replacement entry).
fn remove_entries_for(core: &mut QueueCore, utterance: &Utterance) -> Duration {
    let mut carried = Duration::ZERO;
    core.entries.retain(|entry| {
        if entry.utterance == *utterance {
            carried = carried.max(entry.time_in_queue);
            false
        } else {
            true
        }
    });
    carried
}

/// Steps 1–3 of the prioritisation procedure, under the core lock.
///
/// Step 4 (front-changed notification) is the caller's job, after the lock
/// is released, because the announcer may react by cancelling — which emits
/// a completion that re-enters the queue.
fn prioritise_locked(core: &mut QueueCore, announcer: &dyn Announcer, seed: &Utterance) {
    // Walk towards the front: the seed knocks out any older entry it should
    // cancel.
    if let Some(index) = core.entries.iter().position(|e| e.utterance == *seed) {
        let mut j = index;
        while j > 0 {
            j -= 1;
            let older = core.entries[j].utterance.clone();
            if announcer.should_utterance_cancel_other(seed, &older) {
                tracing::debug!(removed = ?older, ?seed, "Prioritisation removed an earlier entry");
                core.entries.remove(j);
            }
        }
    }

    // Only the single entry immediately behind the seed can out-rank it —
    // queue ordering guarantees entries further back rank no higher.
    if let Some(index) = core.entries.iter().position(|e| e.utterance == *seed) {
        let behind = core.entries.get(index + 1).map(|e| e.utterance.clone());
        if let Some(behind) = behind {
            if announcer.should_utterance_cancel_other(&behind, seed) {
                tracing::debug!(removed = ?seed, by = ?behind, "Prioritisation removed the seed");
                core.entries.remove(index);
            }
        }
    }
}

/// Full prioritisation pass: steps 1–3 under the lock, step 4 after.
fn run_prioritisation(
    core: &Mutex<QueueCore>,
    announcer: &Arc<dyn Announcer>,
    seed: &Utterance,
) {
    let front = {
        let mut core = lock(core);
        prioritise_locked(&mut core, announcer.as_ref(), seed);
        core.entries.first().map(|e| e.utterance.clone())
    };
    if let Some(front) = front {
        announcer.on_utterance_priority_change(&front);
    }
}
