//! Tick fan-out and bootstrap wiring.
//!
//! The crate has no event loop of its own: the application owns a monotonic
//! tick source (typically the animation-frame timer) and feeds `dt` into a
//! [`TickDispatcher`], which forwards it to every registered queue. The
//! factory functions below wire a queue to a freshly-built announcer the way
//! the application bootstrap is expected to.

use std::sync::{Arc, Mutex};

use crate::aria_live::{AriaLiveAnnouncer, LiveRegionHost};
use crate::observable::{lock, ObservableCell};
use crate::queue::UtteranceQueue;
use crate::responses::ResponseCollector;
use crate::speech::{SpeechPlatform, SpeechSynthesisAnnouncer, SpeechSynthesisConfig};

/// Fans a scalar `dt` (seconds) out to any number of queues.
#[derive(Default)]
pub struct TickDispatcher {
    queues: Mutex<Vec<UtteranceQueue>>,
}

impl TickDispatcher {
    /// Dispatcher with no queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue to be stepped on every tick.
    pub fn add_queue(&self, queue: UtteranceQueue) {
        lock(&self.queues).push(queue);
    }

    /// Number of registered queues.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        lock(&self.queues).len()
    }

    /// Forward one tick of `dt_seconds` to every registered queue.
    ///
    /// Queues are stepped outside the registry lock so their listeners may
    /// re-enter the dispatcher.
    pub fn tick(&self, dt_seconds: f64) {
        let queues: Vec<UtteranceQueue> = lock(&self.queues).clone();
        for queue in queues {
            queue.step(dt_seconds);
        }
    }
}

impl std::fmt::Debug for TickDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickDispatcher")
            .field("queues", &self.queue_count())
            .finish()
    }
}

/// Build a queue over a speech-synthesis announcer.
///
/// Returns the queue and the concrete announcer so the embedder can deliver
/// platform events and call `initialize` from the first user gesture.
#[must_use]
pub fn speech_synthesis_queue(
    platform: Arc<dyn SpeechPlatform>,
    speech_allowed: ObservableCell<bool>,
    config: SpeechSynthesisConfig,
    collector: Arc<ResponseCollector>,
) -> (UtteranceQueue, Arc<SpeechSynthesisAnnouncer>) {
    let announcer = SpeechSynthesisAnnouncer::with_config(platform, speech_allowed, config);
    let queue = UtteranceQueue::new(announcer.clone(), collector);
    (queue, announcer)
}

/// Build a queue over an aria-live announcer.
#[must_use]
pub fn aria_live_queue(
    host: Arc<dyn LiveRegionHost>,
    collector: Arc<ResponseCollector>,
) -> (UtteranceQueue, Arc<AriaLiveAnnouncer>) {
    let announcer = AriaLiveAnnouncer::new(host);
    let queue = UtteranceQueue::new(announcer.clone(), collector);
    (queue, announcer)
}
