//! # Runtime events emitted by conveyors.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Lifecycle events**: conveyor start/stop
//! - **Build events**: per-key transitions (created, ready, expired, failed, canceled)
//! - **Intake events**: carts and commands refused at placement
//!
//! The [`Event`] struct carries metadata such as timestamps, conveyor name, key,
//! failure stage and reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use conveyor::{Event, EventKind, FailureType};
//!
//! let ev = Event::new(EventKind::SiteFailed)
//!     .with_conveyor("people")
//!     .with_key(&42)
//!     .with_failure(FailureType::BuildFailed)
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::SiteFailed);
//! assert_eq!(ev.key.as_deref(), Some("42"));
//! assert_eq!(ev.failure, Some(FailureType::BuildFailed));
//! ```

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::error::FailureType;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked while handling an event.
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `key`, `label`: copied from the event being handled
    /// - `reason`: panic message
    SubscriberPanicked,

    /// Subscriber missed an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `key`, `label`: copied from the missed event
    /// - `reason`: "full" or "closed"
    SubscriberOverflow,

    // === Conveyor lifecycle ===
    /// Worker started.
    ConveyorStarted,

    /// Stop requested; the worker is draining.
    ///
    /// Sets:
    /// - `reason`: "stop" or "complete"
    ConveyorStopping,

    /// Worker exited; every outstanding handle is resolved or cancelled.
    ConveyorStopped,

    // === Intake ===
    /// Cart refused by a placement validator.
    ///
    /// Sets:
    /// - `key`, `label` (when present)
    /// - `failure`: `CartRejected`
    /// - `reason`: validator error label
    CartRejected,

    /// Command refused by a validator or failed in the worker.
    ///
    /// Sets:
    /// - `key`
    /// - `label`: command kind
    /// - `failure`: `CommandRejected`
    /// - `reason`: error label
    CommandRejected,

    // === Builds ===
    /// New building site created.
    SiteCreated,

    /// Product delivered to the result consumer.
    ///
    /// Sets:
    /// - `reason`: "ready" or "timeout_forced"
    ProductReady,

    /// Build expired without becoming ready.
    SiteExpired,

    /// Build failed at some stage.
    ///
    /// Sets:
    /// - `failure`: the failing stage
    /// - `reason`: error message
    SiteFailed,

    /// Build cancelled by command.
    SiteCanceled,

    /// Build expiration moved (reschedule command).
    SiteRescheduled,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the conveyor; stamped by its bus.
    pub conveyor: Option<Arc<str>>,
    /// Subscriber an overflow or panic event is about.
    pub subscriber: Option<&'static str>,
    /// Debug rendering of the key.
    pub key: Option<Arc<str>>,
    /// Debug rendering of the label (or command kind).
    pub label: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Failure stage, if applicable.
    pub failure: Option<FailureType>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            conveyor: None,
            subscriber: None,
            key: None,
            label: None,
            reason: None,
            failure: None,
        }
    }

    /// Attaches a conveyor name.
    #[inline]
    pub fn with_conveyor(mut self, name: impl Into<Arc<str>>) -> Self {
        self.conveyor = Some(name.into());
        self
    }

    /// Attaches a key (stored as its `Debug` rendering).
    #[inline]
    pub fn with_key<K: Debug + ?Sized>(mut self, key: &K) -> Self {
        self.key = Some(format!("{key:?}").into());
        self
    }

    /// Attaches a label (stored as its `Debug` rendering).
    #[inline]
    pub fn with_label<L: Debug + ?Sized>(mut self, label: &L) -> Self {
        self.label = Some(format!("{label:?}").into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a failure stage.
    #[inline]
    pub fn with_failure(mut self, failure: FailureType) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Returns `true` for events raised by subscriber workers.
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }

    /// Overflow of `subscriber` while delivering `missed`.
    pub(crate) fn subscriber_overflow(
        subscriber: &'static str,
        missed: &Event,
        reason: &'static str,
    ) -> Self {
        Event::about(EventKind::SubscriberOverflow, subscriber, missed).with_reason(reason)
    }

    /// Panic of `subscriber` while handling `during`.
    pub(crate) fn subscriber_panicked(
        subscriber: &'static str,
        during: &Event,
        info: String,
    ) -> Self {
        Event::about(EventKind::SubscriberPanicked, subscriber, during).with_reason(info)
    }

    fn about(kind: EventKind, subscriber: &'static str, source: &Event) -> Self {
        let mut ev = Event::new(kind);
        ev.subscriber = Some(subscriber);
        ev.conveyor = source.conveyor.clone();
        ev.key = source.key.clone();
        ev.label = source.label.clone();
        ev
    }
}
