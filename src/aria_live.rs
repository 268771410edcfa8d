//! Live-region announcer — writes alerts into rotating `aria-live` DOM nodes.
//!
//! Screen readers decide for themselves when to voice a live region, so this
//! announcer cannot observe real speech: every announce completes
//! synchronously and cancellation is a documented no-op. What it *can* do is
//! make re-announcement reliable, which takes a rotation trick: a bank of
//! nodes per politeness level, cycled on every announcement, each cleared
//! shortly after it is written so repeated identical alerts are still seen
//! as changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::announcer::{Announcer, CompletionEvent, QueueView};
use crate::observable::{lock, Emitter};
use crate::utterance::{AnnouncerOptions, Utterance};

/// Number of rotating nodes per politeness level.
pub const LIVE_REGION_BANK_SIZE: usize = 4;

/// How long written text stays in a region before it is cleared again.
pub const REGION_CLEAR_DELAY: Duration = Duration::from_millis(200);

/// The two `aria-live` politeness levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AriaLivePriority {
    /// Announced when the screen reader is otherwise idle.
    Polite,

    /// Announced as soon as possible, interrupting the current speech.
    Assertive,
}

impl AriaLivePriority {
    /// The value to put in the `aria-live` attribute.
    #[must_use]
    pub fn attribute_value(self) -> &'static str {
        match self {
            Self::Polite => "polite",
            Self::Assertive => "assertive",
        }
    }
}

/// Host-assigned identifier for one live-region node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub u64);

/// The DOM surface the announcer writes through.
///
/// The host owns element creation and attribute plumbing (including the
/// visually-hidden container); the announcer only ever addresses regions by
/// the ids the host hands back.
pub trait LiveRegionHost: Send + Sync {
    /// Create the `index`-th region node for `priority` and return its id.
    fn create_region(&self, priority: AriaLivePriority, index: usize) -> RegionId;

    /// Replace a region's text content.
    fn set_text(&self, region: RegionId, text: &str);

    /// Toggle a region's `hidden` attribute.
    fn set_hidden(&self, region: RegionId, hidden: bool);

    /// Browser family on which regions must be reset by toggling `hidden`
    /// rather than clearing text.
    fn prefers_hidden_toggle(&self) -> bool {
        false
    }
}

// ── Internal state ─────────────────────────────────────────────────

struct Rotation {
    regions: Vec<RegionId>,
    cursor: usize,
}

impl Rotation {
    fn advance(&mut self) -> RegionId {
        let region = self.regions[self.cursor];
        self.cursor = (self.cursor + 1) % self.regions.len();
        region
    }
}

enum RegionAction {
    Write(String),
    Reset,
}

struct PendingAction {
    region: RegionId,
    remaining: Duration,
    action: RegionAction,
}

struct AriaState {
    polite: Rotation,
    assertive: Rotation,
    pending: Vec<PendingAction>,
}

// ── Announcer ──────────────────────────────────────────────────────

/// [`Announcer`] over a bank of rotating live regions.
pub struct AriaLiveAnnouncer {
    host: Arc<dyn LiveRegionHost>,
    state: Mutex<AriaState>,
    completion: Emitter<CompletionEvent>,
    has_spoken: AtomicBool,
}

impl AriaLiveAnnouncer {
    /// Create the announcer, building both region banks through `host`.
    #[must_use]
    pub fn new(host: Arc<dyn LiveRegionHost>) -> Arc<Self> {
        let bank = |priority| Rotation {
            regions: (0..LIVE_REGION_BANK_SIZE)
                .map(|index| host.create_region(priority, index))
                .collect(),
            cursor: 0,
        };
        let polite = bank(AriaLivePriority::Polite);
        let assertive = bank(AriaLivePriority::Assertive);

        Arc::new(Self {
            host,
            state: Mutex::new(AriaState {
                polite,
                assertive,
                pending: Vec::new(),
            }),
            completion: Emitter::new(),
            has_spoken: AtomicBool::new(false),
        })
    }

    /// Reset a region so its next write reads as a fresh announcement.
    fn reset_region(&self, region: RegionId) {
        if self.host.prefers_hidden_toggle() {
            self.host.set_hidden(region, true);
        } else {
            self.host.set_text(region, "");
        }
    }
}

impl Announcer for AriaLiveAnnouncer {
    fn announce(&self, utterance: &Utterance, options: &AnnouncerOptions, text: &str) {
        let region = {
            let mut state = lock(&self.state);
            let rotation = match options.aria_live_priority {
                AriaLivePriority::Polite => &mut state.polite,
                AriaLivePriority::Assertive => &mut state.assertive,
            };
            let region = rotation.advance();

            // Write on the next step (a beat after the reset below, so the
            // mutation is seen as a change), clear again a little later.
            state.pending.push(PendingAction {
                region,
                remaining: Duration::ZERO,
                action: RegionAction::Write(text.to_string()),
            });
            state.pending.push(PendingAction {
                region,
                remaining: REGION_CLEAR_DELAY,
                action: RegionAction::Reset,
            });
            region
        };

        tracing::debug!(?utterance, text = %text, region = region.0, "Announcing to live region");
        self.reset_region(region);
        self.host.set_hidden(region, false);

        // No observable speech end exists; every announce is complete the
        // moment the call returns.
        self.has_spoken.store(true, Ordering::SeqCst);
        self.completion.emit(&CompletionEvent {
            utterance: utterance.clone(),
            text: Some(text.to_string()),
        });
    }

    /// Live regions have no cancellation channel; this is a no-op.
    fn cancel(&self) {}

    /// Live regions have no cancellation channel; this is a no-op.
    fn cancel_utterance(&self, _utterance: &Utterance) {}

    fn step(&self, dt: Duration, _queue: &QueueView<'_>) {
        let due: Vec<PendingAction> = {
            let mut state = lock(&self.state);
            for pending in &mut state.pending {
                pending.remaining = pending.remaining.saturating_sub(dt);
            }
            // Fired in insertion order, so a write and its clear landing on
            // the same tick stay ordered.
            let (due, waiting) = state
                .pending
                .drain(..)
                .partition(|pending| pending.remaining.is_zero());
            state.pending = waiting;
            due
        };

        for pending in due {
            match pending.action {
                RegionAction::Write(text) => self.host.set_text(pending.region, &text),
                RegionAction::Reset => self.reset_region(pending.region),
            }
        }
    }

    fn has_spoken(&self) -> bool {
        self.has_spoken.load(Ordering::SeqCst)
    }

    fn completion(&self) -> &Emitter<CompletionEvent> {
        &self.completion
    }
}

impl std::fmt::Debug for AriaLiveAnnouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("AriaLiveAnnouncer")
            .field("pending_actions", &state.pending.len())
            .field("has_spoken", &self.has_spoken())
            .finish_non_exhaustive()
    }
}
