//! Announcement error types.
//!
//! Nothing in the queue's public surface returns `Result`: misuse asserts in
//! debug builds and degrades to a no-op in release, and announce failures are
//! absorbed by synthesising a completion (the queue always makes progress).
//! The one genuinely fallible seam is the speech platform itself.

/// Errors reported by a [`SpeechPlatform`](crate::speech::SpeechPlatform)
/// implementation.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The platform has no speech synthesis capability at all.
    #[error("Speech synthesis is not available on this platform")]
    Unavailable,

    /// The platform rejected a speech submission.
    #[error("Failed to submit utterance to speech platform: {0}")]
    SubmitFailed(String),
}
