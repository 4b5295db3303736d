//! # Per-conveyor event bus.
//!
//! [`Bus`] wraps a [`tokio::sync::broadcast`] channel owned by one conveyor.
//! Every event published through it is stamped with that conveyor's name, so
//! the worker, the placement path and the subscriber workers never tag events
//! themselves.
//!
//! ```text
//!   worker task ──────┐
//!   place() / stop() ─┼──► Bus (stamps conveyor) ──► listener ──► SubscriberSet
//!   subscriber tasks ─┘                          └──► AssemblingConveyor::subscribe()
//! ```
//!
//! ## Rules
//! - `publish()` never blocks; with no receivers the event is dropped.
//! - One ring buffer serves all receivers; slow receivers see `RecvError::Lagged`.
//! - An event that already names a conveyor keeps it.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for the events of one conveyor.
#[derive(Clone, Debug)]
pub struct Bus {
    conveyor: Arc<str>,
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates the bus of `conveyor` (capacity clamped to at least 1).
    pub fn new(conveyor: impl Into<Arc<str>>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self {
            conveyor: conveyor.into(),
            tx,
        }
    }

    /// Stamps `ev` with the conveyor name and sends it to all receivers.
    pub fn publish(&self, mut ev: Event) {
        if ev.conveyor.is_none() {
            ev.conveyor = Some(Arc::clone(&self.conveyor));
        }
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
