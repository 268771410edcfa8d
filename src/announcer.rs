//! The output-adapter abstraction consumed by the queue.
//!
//! An [`Announcer`] turns a resolved utterance into actual output (speech
//! synthesis, live-region text) and reports back through a completion
//! emitter. Implementations take `&self` everywhere and manage their own
//! interior state, so a single announcer can be shared by several queues;
//! completion events carry the utterance identity so each queue reacts only
//! to its own.

use std::time::Duration;

use crate::observable::Emitter;
use crate::utterance::{AnnouncerOptions, Utterance};

/// Payload of the completion emitter: the utterance the announcer finished
/// with, and the text that was (or would have been) spoken.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    /// The finished utterance.
    pub utterance: Utterance,

    /// The resolved text. `None` when the announcement never produced text
    /// (for example an interrupt before anything was submitted).
    pub text: Option<String>,
}

/// Read-only view of the queue handed to [`Announcer::step`].
#[derive(Debug, Clone, Copy)]
pub struct QueueView<'a> {
    utterances: &'a [Utterance],
}

impl<'a> QueueView<'a> {
    pub(crate) fn new(utterances: &'a [Utterance]) -> Self {
        Self { utterances }
    }

    /// Number of queued utterances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    /// The utterance at the front of the queue, if any.
    #[must_use]
    pub fn front(&self) -> Option<&Utterance> {
        self.utterances.first()
    }

    /// Iterate the queued utterances in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &Utterance> {
        self.utterances.iter()
    }
}

/// Abstract output adapter.
///
/// The queue resolves alert text once and hands it over together with the
/// utterance and its announcer options; adapters never re-resolve. All
/// methods take `&self` — adapters are expected to be shared (`Arc`) between
/// the queue and the embedder that drives platform events into them.
pub trait Announcer: Send + Sync {
    /// Announce `utterance` with the given resolved `text`.
    ///
    /// By the time this is called the queue has already checked
    /// `ready_to_announce`, the predicate, the gate, and that `text` is
    /// non-empty. Adapters that cannot speak right now (uninitialised,
    /// disabled) must still emit a completion so the queue advances.
    fn announce(&self, utterance: &Utterance, options: &AnnouncerOptions, text: &str);

    /// Cancel whatever is currently being announced, if anything.
    fn cancel(&self);

    /// Cancel `utterance` if it is currently being announced; otherwise do
    /// nothing.
    fn cancel_utterance(&self, utterance: &Utterance);

    /// Whether `candidate` should knock `victim` out of the queue (or
    /// interrupt it mid-announcement). The default is a strict priority
    /// comparison.
    fn should_utterance_cancel_other(&self, candidate: &Utterance, victim: &Utterance) -> bool {
        candidate.priority_value() > victim.priority_value()
    }

    /// Called after a prioritisation pass when the front of the queue may
    /// have changed, so the adapter can interrupt the in-flight announcement
    /// if its policy demands.
    fn on_utterance_priority_change(&self, front: &Utterance) {
        let _ = front;
    }

    /// Per-tick maintenance hook.
    fn step(&self, dt: Duration, queue: &QueueView<'_>) {
        let _ = (dt, queue);
    }

    /// Whether the adapter can accept an announcement right now.
    fn ready_to_announce(&self) -> bool {
        true
    }

    /// Latched once any announcement has ever succeeded.
    fn has_spoken(&self) -> bool;

    /// Whether the adapter needs synchronous first-gesture speech; the queue
    /// honours this in `add_to_back` by routing through
    /// `announce_immediately` until [`has_spoken`](Self::has_spoken) flips.
    fn announce_immediately_until_speaking(&self) -> bool {
        false
    }

    /// Whether response packets resolved for this adapter honour the
    /// response collector's enable gates.
    fn respect_response_collector_properties(&self) -> bool {
        false
    }

    /// Emits once per finished announcement (spoken, interrupted, or
    /// synthesised on failure).
    fn completion(&self) -> &Emitter<CompletionEvent>;
}
