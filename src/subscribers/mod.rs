//! # Event subscribers for conveyors.
//!
//! This module provides the [`Subscribe`] trait, the internal `SubscriberSet` fan-out
//! and built-in implementations for events broadcast through the
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   worker ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit(Event)
//!                                                        │
//!                                               ┌────────┼────────┐
//!                                               ▼        ▼        ▼
//!                                           LogWriter  Metrics  Custom
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use subscriber::Subscribe;
pub(crate) use subscriber_set::SubscriberSet;
