//! The alert carrier: timing knobs, observable priority, gating, and
//! announcer-specific options.
//!
//! An [`Utterance`] is a cheaply-clonable handle; two clones of the same
//! utterance are the *same* utterance as far as the queue's de-duplication
//! and priority rules are concerned. Identity is the inner allocation, never
//! the alert content.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::alertable::Alertable;
use crate::aria_live::AriaLivePriority;
use crate::observable::{lock, ObservableCell};

/// Priority for utterances that should defer to everything else.
pub const PRIORITY_LOW: f64 = 0.0;

/// Default priority.
pub const PRIORITY_DEFAULT: f64 = 1.0;

/// Priority for utterances that should out-rank routine alerts.
pub const PRIORITY_MEDIUM: f64 = 5.0;

/// Priority for utterances that should out-rank nearly everything.
pub const PRIORITY_HIGH: f64 = 10.0;

/// Default minimum time an utterance must sit unchanged in the queue before
/// it may be announced.
pub const DEFAULT_STABLE_DELAY: Duration = Duration::from_millis(200);

/// Gating predicate, re-evaluated at announce time.
pub type Predicate = dyn Fn() -> bool + Send + Sync;

// ── Announcer options ──────────────────────────────────────────────

/// Per-utterance options interpreted by the output adapter.
#[derive(Debug, Clone)]
pub struct AnnouncerOptions {
    /// If this utterance is already being announced when it is announced
    /// again, cancel and restart it.
    pub cancel_self: bool,

    /// If another utterance of equal priority is being announced, cancel it
    /// in favour of this one.
    pub cancel_other: bool,

    /// Live-region channel for the aria-live announcer.
    pub aria_live_priority: AriaLivePriority,

    /// Pin a specific speech-synthesis voice (by display name) for this
    /// utterance instead of the announcer's default.
    pub voice: Option<String>,
}

impl Default for AnnouncerOptions {
    fn default() -> Self {
        Self {
            cancel_self: true,
            cancel_other: true,
            aria_live_priority: AriaLivePriority::Polite,
            voice: None,
        }
    }
}

// ── Construction options ───────────────────────────────────────────

/// Options for [`Utterance::with_options`].
#[derive(Clone)]
pub struct UtteranceOptions {
    /// Minimum time the utterance must have sat in the queue unchanged at its
    /// slot before it may be announced.
    pub alert_stable_delay: Duration,

    /// Hard ceiling on queue residence after which the stability requirement
    /// is waived. `None` means unbounded.
    pub alert_maximum_delay: Option<Duration>,

    /// Initial priority.
    pub priority: f64,

    /// Announce-time gating predicate; `None` means always announceable.
    pub predicate: Option<Arc<Predicate>>,

    /// Adapter-interpreted options.
    pub announcer: AnnouncerOptions,
}

impl Default for UtteranceOptions {
    fn default() -> Self {
        Self {
            alert_stable_delay: DEFAULT_STABLE_DELAY,
            alert_maximum_delay: None,
            priority: PRIORITY_DEFAULT,
            predicate: None,
            announcer: AnnouncerOptions::default(),
        }
    }
}

impl std::fmt::Debug for UtteranceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtteranceOptions")
            .field("alert_stable_delay", &self.alert_stable_delay)
            .field("alert_maximum_delay", &self.alert_maximum_delay)
            .field("priority", &self.priority)
            .field("predicate", &self.predicate.as_ref().map(|_| ".."))
            .field("announcer", &self.announcer)
            .finish()
    }
}

// ── Utterance ──────────────────────────────────────────────────────

struct UtteranceInner {
    alert: Mutex<Alertable>,
    predicate: Option<Arc<Predicate>>,
    alert_stable_delay: Duration,
    alert_maximum_delay: Option<Duration>,
    priority: ObservableCell<f64>,
    can_announce: Mutex<Vec<ObservableCell<bool>>>,
    announcer: AnnouncerOptions,
}

/// Carrier of a single alert. See the module docs for identity semantics.
#[derive(Clone)]
pub struct Utterance {
    inner: Arc<UtteranceInner>,
}

impl Utterance {
    /// Utterance with default options.
    #[must_use]
    pub fn new(alert: impl Into<Alertable>) -> Self {
        Self::with_options(alert, UtteranceOptions::default())
    }

    /// Utterance with explicit options.
    #[must_use]
    pub fn with_options(alert: impl Into<Alertable>, options: UtteranceOptions) -> Self {
        Self {
            inner: Arc::new(UtteranceInner {
                alert: Mutex::new(alert.into()),
                predicate: options.predicate,
                alert_stable_delay: options.alert_stable_delay,
                alert_maximum_delay: options.alert_maximum_delay,
                priority: ObservableCell::new(options.priority),
                can_announce: Mutex::new(Vec::new()),
                announcer: options.announcer,
            }),
        }
    }

    /// Current alert content.
    #[must_use]
    pub fn alert(&self) -> Alertable {
        lock(&self.inner.alert).clone()
    }

    /// Replace the alert content. Queue timing is unaffected; the new alert
    /// is what resolves if this utterance is announced later.
    pub fn set_alert(&self, alert: impl Into<Alertable>) {
        *lock(&self.inner.alert) = alert.into();
    }

    /// The observable priority.
    #[must_use]
    pub fn priority(&self) -> &ObservableCell<f64> {
        &self.inner.priority
    }

    /// Current priority value.
    #[must_use]
    pub fn priority_value(&self) -> f64 {
        self.inner.priority.get()
    }

    /// Set the priority, synchronously notifying any queue this utterance
    /// sits in (or is being announced by).
    pub fn set_priority(&self, priority: f64) {
        self.inner.priority.set(priority);
    }

    /// Minimum unchanged-in-queue time before announcing.
    #[must_use]
    pub fn alert_stable_delay(&self) -> Duration {
        self.inner.alert_stable_delay
    }

    /// Queue-residence ceiling after which stability is waived.
    #[must_use]
    pub fn alert_maximum_delay(&self) -> Option<Duration> {
        self.inner.alert_maximum_delay
    }

    /// Adapter-interpreted options.
    #[must_use]
    pub fn announcer_options(&self) -> &AnnouncerOptions {
        &self.inner.announcer
    }

    /// Evaluate the gating predicate.
    #[must_use]
    pub fn predicate_holds(&self) -> bool {
        match &self.inner.predicate {
            Some(predicate) => (**predicate)(),
            None => true,
        }
    }

    /// Register a boolean gate cell. The conjunction of all registered cells
    /// (when any exist) gates announcing; a transition to false while this
    /// utterance is being announced interrupts it.
    pub fn add_can_announce_cell(&self, cell: ObservableCell<bool>) {
        lock(&self.inner.can_announce).push(cell);
    }

    /// Snapshot of the registered gate cells.
    #[must_use]
    pub fn can_announce_cells(&self) -> Vec<ObservableCell<bool>> {
        lock(&self.inner.can_announce).clone()
    }

    /// Conjunction of the registered gate cells; true when none are
    /// registered.
    #[must_use]
    pub fn can_announce(&self) -> bool {
        lock(&self.inner.can_announce).iter().all(ObservableCell::get)
    }

    /// Whether two handles refer to the same utterance.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakUtterance {
        WeakUtterance {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for Utterance {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Utterance {}

impl std::hash::Hash for Utterance {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.inner), state);
    }
}

impl std::fmt::Debug for Utterance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Utterance")
            .field("alert", &*lock(&self.inner.alert))
            .field("priority", &self.inner.priority.get())
            .finish_non_exhaustive()
    }
}

/// Weak reference used by listener closures so an utterance held only by a
/// subscription does not keep itself alive.
#[derive(Clone)]
pub(crate) struct WeakUtterance {
    inner: Weak<UtteranceInner>,
}

impl WeakUtterance {
    pub(crate) fn upgrade(&self) -> Option<Utterance> {
        self.inner.upgrade().map(|inner| Utterance { inner })
    }
}
