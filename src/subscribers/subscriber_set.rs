//! # Event fan-out to the subscribers of one conveyor.
//!
//! [`SubscriberSet`] is fed by the conveyor's listener task and hands every
//! event to the subscribers that accept it without ever waiting on them.
//!
//! ```text
//! emit(ev)
//!     ├──► accepts? ──► [queue 1] ──► worker 1 ──► sub1.on_event()
//!     ├──► accepts? ──► [queue 2] ──► worker 2 ──► sub2.on_event()
//!     └──► accepts? ──► [queue N] ──► worker N ──► subN.on_event()
//! ```
//!
//! ## Rules
//! - A full or closed queue drops the event for that subscriber only and
//!   publishes `SubscriberOverflow` carrying the missed event's key.
//! - A panic in `on_event` (or `accepts`) is caught; `SubscriberPanicked` is published.
//! - Subscriber events never trigger further subscriber events, so a subscriber
//!   that panics on everything cannot flood the bus.
//!
//! **Warning**: `AssertUnwindSafe` is used, which can leave shared state inconsistent
//! if a subscriber panics while holding a lock.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::core::panic_message;
use crate::events::{Bus, Event};
use crate::subscribers::Subscribe;

struct SubscriberChannel {
    subscriber: Arc<dyn Subscribe>,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out of one conveyor's events to its subscribers.
pub(crate) struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber. Must be called inside a Tokio runtime.
    pub(crate) fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for subscriber in subs {
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(subscriber.queue_capacity().max(1));
            let sub = Arc::clone(&subscriber);
            let bus = bus.clone();

            workers.push(tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let handled = AssertUnwindSafe(sub.on_event(&ev)).catch_unwind().await;
                    if let Err(payload) = handled {
                        let info = panic_message(payload.as_ref());
                        tracing::error!(
                            subscriber = sub.name(),
                            key = ?ev.key,
                            %info,
                            "subscriber panicked"
                        );
                        if !ev.is_subscriber_event() {
                            bus.publish(Event::subscriber_panicked(sub.name(), &ev, info));
                        }
                    }
                }
            }));
            channels.push(SubscriberChannel {
                subscriber,
                sender: tx,
            });
        }
        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Queues `event` for every subscriber that accepts it.
    pub(crate) fn emit(&self, event: Event) {
        let event = Arc::new(event);
        let quiet = event.is_subscriber_event();

        for channel in &self.channels {
            let sub = &channel.subscriber;
            match catch_unwind(AssertUnwindSafe(|| sub.accepts(&event))) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(payload) => {
                    if !quiet {
                        let info = panic_message(payload.as_ref());
                        self.bus
                            .publish(Event::subscriber_panicked(sub.name(), &event, info));
                    }
                    continue;
                }
            }

            let reason = match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            tracing::warn!(
                subscriber = sub.name(),
                key = ?event.key,
                reason,
                "subscriber missed an event"
            );
            if !quiet {
                self.bus
                    .publish(Event::subscriber_overflow(sub.name(), &event, reason));
            }
        }
    }

    /// Closes every queue and waits for the workers to drain them.
    pub(crate) async fn shutdown(self) {
        drop(self.channels);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
