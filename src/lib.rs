//! Priority announcement queue for assistive-technology output.
//!
//! Screen readers make no ordering promises: alerts fired in quick
//! succession can arrive interleaved, duplicated, or dropped. This crate
//! provides the coordination layer in between — a debounced, priority-aware
//! [`UtteranceQueue`] that serialises alerts from any number of producers
//! into a single output adapter ([`Announcer`]), with two adapters included:
//! rotating `aria-live` regions ([`AriaLiveAnnouncer`]) and a
//! speech-synthesis backend with engine-health workarounds
//! ([`SpeechSynthesisAnnouncer`]).
//!
//! The crate is single-threaded and tick-driven; the application feeds it
//! `dt` from its frame timer (see [`TickDispatcher`]) and delivers platform
//! speech events into the speech announcer. Nothing here spawns threads or
//! suspends.

#![deny(unused_crate_dependencies)]

#[cfg(test)]
use tracing_subscriber as _;

pub mod alertable;
pub mod announcer;
pub mod aria_live;
pub mod dispatch;
pub mod error;
pub mod observable;
pub mod queue;
pub mod responses;
pub mod speech;
pub mod text;
pub mod utterance;

// Re-export key types for convenience
pub use alertable::{AlertProducer, Alertable};
pub use announcer::{Announcer, CompletionEvent, QueueView};
pub use aria_live::{AriaLiveAnnouncer, AriaLivePriority, LiveRegionHost, RegionId};
pub use dispatch::{aria_live_queue, speech_synthesis_queue, TickDispatcher};
pub use error::PlatformError;
pub use observable::{Emitter, ObservableCell, Subscription};
pub use queue::UtteranceQueue;
pub use responses::{ResponseCollector, ResponsePacket};
pub use speech::{
    PlatformEvent, PlatformQuirks, SpeechLifecycleEvent, SpeechPlatform, SpeechRequest,
    SpeechRequestId, SpeechSynthesisAnnouncer, SpeechSynthesisConfig, SpeechVoice,
};
pub use utterance::{
    AnnouncerOptions, Utterance, UtteranceOptions, DEFAULT_STABLE_DELAY, PRIORITY_DEFAULT,
    PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_MEDIUM,
};
