//! # Event subscriber trait.
//!
//! [`Subscribe`] plugs custom handlers into a conveyor's event stream
//! (metrics, alerting on expired or failed builds, audit logs).
//!
//! Each subscriber gets its own bounded queue and worker task, so a slow
//! subscriber never holds up the conveyor worker or the other subscribers.
//!
//! ```text
//! listener ──► accepts(ev)? ──► [bounded queue] ──► worker ──► on_event(ev)
//!                  │ no                │ full               └─► panic → SubscriberPanicked
//!                  ▼                   ▼
//!               skipped        SubscriberOverflow (with the missed key)
//! ```
//!
//! ## Rules
//! - Events are handled one at a time, in publication order.
//! - `accepts` runs on the listener; keep it cheap. Filtered events never use queue space.
//! - Subscribers also receive overflow and panic events of the other subscribers.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use conveyor::{Event, EventKind, Subscribe};
//!
//! struct ExpiryAlerts;
//!
//! #[async_trait]
//! impl Subscribe for ExpiryAlerts {
//!     async fn on_event(&self, ev: &Event) {
//!         // page someone about ev.key
//!     }
//!
//!     fn accepts(&self, ev: &Event) -> bool {
//!         matches!(ev.kind, EventKind::SiteExpired | EventKind::SiteFailed)
//!     }
//!
//!     fn name(&self) -> &'static str { "expiry-alerts" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber of a conveyor.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event on the subscriber's worker task.
    async fn on_event(&self, event: &Event);

    /// Decides whether `event` is queued for this subscriber. Default: all events.
    fn accepts(&self, _event: &Event) -> bool {
        true
    }

    /// Name reported in overflow and panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue capacity (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
