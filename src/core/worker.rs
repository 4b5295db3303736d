//! # Worker: the single writer of a conveyor.
//!
//! One worker task per conveyor owns the collector (key → [`BuildingSite`]) and
//! the [`DelayIndex`]. Producers only push onto two unbounded queues; nothing
//! else ever touches worker state, so no lock guards the collector.
//!
//! ## Loop
//! ```text
//! loop {
//!   ├─► wait: stop | complete | control | cart | next deadline or heartbeat   (only blocking point)
//!   ├─► drain every pending control (commands, inspections)
//!   ├─► process at most one cart
//!   │     ├─ keyed      ─► take-or-create site ─► accept ─► ready? ─► evict ─► build ─► result
//!   │     ├─ multi-key  ─► same, for every matching in-flight key (never creates)
//!   │     └─ create/future ─► take-or-create site, attach product waiter
//!   ├─► sweep expired keys
//!   │     ├─ expiration moved forward ─► re-bucket
//!   │     └─ otherwise ─► timeout action ─► ready? ─► build (tagged TimedOut)
//!   │                                     └─ not ready ─► BUILD_EXPIRED scrap
//!   └─► exit when stopped, or completing with both queues empty
//! }
//! drain: queued work and in-flight sites ─► CONVEYOR_STOPPED scrap, handles cancelled
//! ```
//!
//! ## Failure isolation
//! Every failure of one cart, command or build is caught (user panics included),
//! tagged with the stage it happened at, scrapped once, and reflected in the
//! handles of that key. The loop itself keeps running.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::bins::{ProductBin, Scrap, ScrapBin};
use crate::building::{Builder, BuilderSupplier};
use crate::carts::{
    Ack, Cart, CartKey, CartLabel, CartValue, Command, CommandKind, Load, Outcome, Parcel, Waiter,
};
use crate::core::delay::DelayIndex;
use crate::core::guard::guarded;
use crate::core::settings::Settings;
use crate::core::site::{BuildingSite, ProductSupplier};
use crate::core::status::SiteStatus;
use crate::core::validate::check_envelope;
use crate::error::{ConveyorError, FailureType};
use crate::events::{Bus, Event, EventKind};

/// Counters readable from any thread.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub(crate) queued: AtomicUsize,
    pub(crate) collector: AtomicUsize,
    pub(crate) delayed: AtomicUsize,
}

/// Management-queue entry: commands and read-only inspections.
pub(crate) enum Control<K, L, V, B> {
    Command {
        command: Command<K>,
        ack: Ack,
    },
    Expiration {
        key: K,
        reply: oneshot::Sender<Option<Instant>>,
    },
    Supplier {
        key: K,
        reply: oneshot::Sender<Result<ProductSupplier<K, L, V, B>, ConveyorError>>,
    },
}

/// Result of feeding a site.
enum Step {
    /// Still waiting for data; the site goes back into the collector.
    Pending,
    /// Product delivered; the site is gone.
    Done,
}

pub(crate) struct Worker<K, L, V, B: Builder<K, L, V>> {
    pub(crate) name: Arc<str>,
    pub(crate) settings: Arc<RwLock<Settings<K, L, V, B>>>,
    pub(crate) stats: Arc<Stats>,
    pub(crate) bus: Bus,
    pub(crate) synchronized: bool,
    pub(crate) carts: mpsc::UnboundedReceiver<Parcel<K, L, V, B>>,
    pub(crate) controls: mpsc::UnboundedReceiver<Control<K, L, V, B>>,
    pub(crate) stop: CancellationToken,
    pub(crate) finish: CancellationToken,
    pub(crate) collector: HashMap<K, BuildingSite<K, L, V, B>>,
    pub(crate) delays: DelayIndex<K>,
}

fn not_found<K: std::fmt::Debug>(key: &K) -> ConveyorError {
    ConveyorError::KeyNotFound {
        key: format!("{key:?}"),
    }
}

impl<K, L, V, B> Worker<K, L, V, B>
where
    K: CartKey,
    L: CartLabel,
    V: CartValue,
    B: Builder<K, L, V>,
{
    /// Runs until stopped, then drains.
    pub(crate) async fn run(mut self) {
        tracing::debug!(conveyor = %self.name, "worker started");
        self.bus.publish(Event::new(EventKind::ConveyorStarted));

        let mut carts_open = true;
        let mut controls_open = true;
        let mut finishing = false;

        loop {
            let heartbeat = self.settings.read().idle_heartbeat;
            let mut wake = Instant::now() + heartbeat;
            if let Some(deadline) = self.delays.next_deadline() {
                wake = wake.min(deadline);
            }
            let mut next = None;

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = self.finish.cancelled(), if !finishing => {
                    tracing::debug!(conveyor = %self.name, "completing queued work");
                    finishing = true;
                }
                msg = self.controls.recv(), if controls_open => match msg {
                    Some(ctl) => self.control(ctl),
                    None => controls_open = false,
                },
                msg = self.carts.recv(), if carts_open => match msg {
                    Some(parcel) => next = Some(parcel),
                    None => carts_open = false,
                },
                _ = time::sleep_until(wake) => {}
            }

            while let Ok(ctl) = self.controls.try_recv() {
                self.control(ctl);
            }
            if next.is_none() {
                next = self.carts.try_recv().ok();
            }
            if let Some(parcel) = next {
                self.process(parcel);
            }
            self.sweep(Instant::now());
            self.sync_stats();

            if !carts_open && !controls_open {
                tracing::debug!(conveyor = %self.name, "all handles dropped");
                break;
            }
            if finishing && self.carts.is_empty() && self.controls.is_empty() {
                break;
            }
        }

        self.drain();
    }

    fn sync_stats(&self) {
        self.stats
            .collector
            .store(self.collector.len(), Ordering::Relaxed);
        self.stats.delayed.store(self.delays.len(), Ordering::Relaxed);
    }

    fn publish(&self, ev: Event) {
        self.bus.publish(ev);
    }

    /// Reports one discarded unit. Consumer failures are logged only.
    fn scrap(
        &self,
        key: Option<K>,
        scrap: Scrap<K, L, V>,
        comment: impl Into<String>,
        error: Option<ConveyorError>,
        failure_type: FailureType,
    ) {
        let bin = ScrapBin::new(key, scrap, comment, error, failure_type);
        let consumer = Arc::clone(&self.settings.read().scrap_consumer);
        match guarded(|| Ok(consumer.accept(&bin))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(conveyor = %self.name, error = %e, "scrap consumer failed: {bin}")
            }
            Err(e) => {
                tracing::error!(conveyor = %self.name, error = %e, "scrap consumer panicked: {bin}")
            }
        }
    }

    // === Controls ===

    fn control(&mut self, ctl: Control<K, L, V, B>) {
        match ctl {
            Control::Command { command, ack } => {
                let outcome = self.command(command);
                let _ = ack.send(outcome);
            }
            Control::Expiration { key, reply } => {
                let _ = reply.send(self.collector.get(&key).and_then(|s| s.expires()));
            }
            Control::Supplier { key, reply } => {
                let supplier = if !self.synchronized {
                    Err(ConveyorError::NotSynchronized)
                } else {
                    match self.collector.get(&key) {
                        Some(site) => site
                            .product_supplier()
                            .ok_or(ConveyorError::NotSynchronized),
                        None => Err(not_found(&key)),
                    }
                };
                let _ = reply.send(supplier);
            }
        }
    }

    fn command(&mut self, command: Command<K>) -> Outcome {
        let key = command.key().clone();
        tracing::debug!(conveyor = %self.name, key = ?key, command = command.kind().as_label(), "command");

        if command.is_expired_at(Instant::now()) {
            let err = ConveyorError::CartExpired {
                overdue: command
                    .expires()
                    .map(|at| Instant::now().saturating_duration_since(at))
                    .unwrap_or_default(),
            };
            return self.reject_command(command, err, FailureType::CommandRejected);
        }

        match command.kind() {
            CommandKind::Create => {
                if self.collector.contains_key(&key) {
                    return Outcome::Accepted;
                }
                match self.take_or_create(&key, None, command.expires()) {
                    Ok(site) => {
                        self.collector.insert(key, site);
                        Outcome::Accepted
                    }
                    Err(err) => {
                        self.reject_command(command, err, FailureType::BuildInitializationFailed)
                    }
                }
            }
            CommandKind::Cancel => match self.collector.remove(&key) {
                Some(site) => {
                    self.cancel(site);
                    Outcome::Accepted
                }
                None => self.reject_command(command, not_found(&key), FailureType::CommandRejected),
            },
            CommandKind::Reschedule(at) => match self.collector.get_mut(&key) {
                Some(site) => {
                    site.set_expires(at);
                    self.delays.insert(key.clone(), at);
                    self.publish(Event::new(EventKind::SiteRescheduled).with_key(&key));
                    Outcome::Accepted
                }
                None => self.reject_command(command, not_found(&key), FailureType::CommandRejected),
            },
            CommandKind::Timeout => match self.collector.remove(&key) {
                Some(site) => {
                    self.expire(site);
                    Outcome::Accepted
                }
                None => self.reject_command(command, not_found(&key), FailureType::CommandRejected),
            },
            CommandKind::Check => match self.collector.remove(&key) {
                Some(mut site) => {
                    let mut stage = FailureType::ReadyFailed;
                    let checked = site.ready().and_then(|ready| {
                        if ready {
                            self.complete(&mut site, &mut stage, SiteStatus::Ready)
                                .map(|()| Step::Done)
                        } else {
                            Ok(Step::Pending)
                        }
                    });
                    match checked {
                        Ok(Step::Pending) => {
                            self.collector.insert(key, site);
                            Outcome::Accepted
                        }
                        Ok(Step::Done) => Outcome::Accepted,
                        Err(err) => {
                            self.fail_site(site, err.clone(), stage, None);
                            Outcome::Failed(err)
                        }
                    }
                }
                None => self.reject_command(command, not_found(&key), FailureType::CommandRejected),
            },
        }
    }

    fn reject_command(
        &self,
        command: Command<K>,
        err: ConveyorError,
        failure_type: FailureType,
    ) -> Outcome {
        tracing::debug!(conveyor = %self.name, key = ?command.key(), error = %err, "command failed");
        self.publish(
            Event::new(EventKind::CommandRejected)
                .with_key(command.key())
                .with_label(command.kind().as_label())
                .with_failure(failure_type)
                .with_reason(err.as_label()),
        );
        let key = command.key().clone();
        self.scrap(
            Some(key),
            Scrap::Command(command),
            "command failed",
            Some(err.clone()),
            failure_type,
        );
        Outcome::Failed(err)
    }

    // === Carts ===

    fn process(&mut self, parcel: Parcel<K, L, V, B>) {
        self.stats.queued.fetch_sub(1, Ordering::Relaxed);
        let Parcel { load, ack } = parcel;

        // Expiry and age are checked again: the parcel may have waited in the queue.
        let max_age = self.settings.read().max_cart_age;
        let stale = check_envelope(true, load.created(), load.expires(), max_age, Instant::now());
        if let Err(err) = stale {
            let key = load.key().cloned();
            self.scrap(
                key,
                load.into_scrap(),
                "went stale while queued",
                Some(err.clone()),
                FailureType::CartRejected,
            );
            let _ = ack.send(Outcome::Rejected(err));
            return;
        }

        let outcome = match load {
            Load::Part(cart) => match cart.key().cloned() {
                Some(key) => self.process_part(key, cart),
                None => self.process_multi_key(cart),
            },
            Load::Create {
                key,
                supplier,
                expires,
                waiter,
                ..
            } => self.process_create(key, supplier, expires, waiter),
            Load::Future { key, waiter, .. } => self.process_create(key, None, None, Some(waiter)),
        };
        let _ = ack.send(outcome);
    }

    fn process_part(&mut self, key: K, cart: Cart<K, L, V>) -> Outcome {
        let mut site = match self.take_or_create(&key, None, cart.expires()) {
            Ok(site) => site,
            Err(err) => {
                self.scrap(
                    Some(key),
                    Scrap::Cart(cart),
                    "cannot create building site",
                    Some(err.clone()),
                    FailureType::BuildInitializationFailed,
                );
                return Outcome::Failed(err);
            }
        };

        let mut stage = FailureType::DataRejected;
        match self.feed(&mut site, &cart, &mut stage) {
            Ok(Step::Pending) => {
                self.collector.insert(key, site);
                Outcome::Accepted
            }
            Ok(Step::Done) => Outcome::Accepted,
            Err(err) => {
                self.fail_site(site, err.clone(), stage, Some(cart));
                Outcome::Failed(err)
            }
        }
    }

    fn process_multi_key(&mut self, cart: Cart<K, L, V>) -> Outcome {
        let Some(filter) = cart.filter().cloned() else {
            return Outcome::Accepted;
        };
        let keys: Vec<K> = self
            .collector
            .keys()
            .filter(|k| guarded(|| Ok(filter.matches(k))).unwrap_or(false))
            .cloned()
            .collect();
        tracing::trace!(conveyor = %self.name, label = ?cart.label(), matched = keys.len(), "multi-key cart");

        for key in keys {
            let Some(mut site) = self.collector.remove(&key) else {
                continue;
            };
            let mut stage = FailureType::DataRejected;
            match self.feed(&mut site, &cart, &mut stage) {
                Ok(Step::Pending) => {
                    self.collector.insert(key, site);
                }
                Ok(Step::Done) => {}
                Err(err) => self.fail_site(site, err, stage, Some(cart.clone())),
            }
        }
        Outcome::Accepted
    }

    fn process_create(
        &mut self,
        key: K,
        supplier: Option<BuilderSupplier<B>>,
        expires: Option<Instant>,
        waiter: Option<Waiter<B::Product>>,
    ) -> Outcome {
        match self.take_or_create(&key, supplier, expires) {
            Ok(mut site) => {
                if let Some(waiter) = waiter {
                    site.add_waiter(waiter);
                }
                self.collector.insert(key, site);
                Outcome::Accepted
            }
            Err(err) => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(crate::carts::ProductError::Failed(err.clone())));
                }
                self.scrap(
                    Some(key.clone()),
                    Scrap::Request {
                        key,
                        kind: "create",
                    },
                    "cannot create building site",
                    Some(err.clone()),
                    FailureType::BuildInitializationFailed,
                );
                Outcome::Failed(err)
            }
        }
    }

    /// Removes the site for `key` from the collector, creating it if absent.
    ///
    /// The caller puts it back while it is still waiting for data.
    fn take_or_create(
        &mut self,
        key: &K,
        supplier: Option<BuilderSupplier<B>>,
        cart_expires: Option<Instant>,
    ) -> Result<BuildingSite<K, L, V, B>, ConveyorError> {
        if let Some(site) = self.collector.remove(key) {
            return Ok(site);
        }

        // User code below runs unlocked; it may call setters on this conveyor.
        let settings = self.settings.read().clone();
        let supplier = supplier
            .or_else(|| settings.supplier.clone())
            .ok_or(ConveyorError::MissingBuilderSupplier)?;
        let synchronized = self.synchronized;
        let site = guarded(|| {
            let builder = supplier();
            Ok(BuildingSite::new(
                key.clone(),
                builder,
                &settings,
                cart_expires,
                synchronized,
            ))
        })?;

        if let Some(at) = site.expires() {
            self.delays.insert(key.clone(), at);
        }
        tracing::trace!(conveyor = %self.name, key = ?key, expires = ?site.expires(), "site created");
        self.publish(Event::new(EventKind::SiteCreated).with_key(key));
        Ok(site)
    }

    /// Accepts one cart and completes the build if it became ready.
    fn feed(
        &mut self,
        site: &mut BuildingSite<K, L, V, B>,
        cart: &Cart<K, L, V>,
        stage: &mut FailureType,
    ) -> Result<Step, ConveyorError> {
        *stage = FailureType::DataRejected;
        site.accept(cart)?;
        tracing::trace!(conveyor = %self.name, key = ?site.key(), label = ?cart.label(), "cart accepted");

        *stage = FailureType::ReadyFailed;
        if !site.ready()? {
            return Ok(Step::Pending);
        }
        self.complete(site, stage, SiteStatus::Ready)?;
        Ok(Step::Done)
    }

    /// Evicts, builds and delivers a ready site.
    fn complete(
        &mut self,
        site: &mut BuildingSite<K, L, V, B>,
        stage: &mut FailureType,
        tag: SiteStatus,
    ) -> Result<(), ConveyorError> {
        *stage = FailureType::BeforeEvictionFailed;
        self.evict(site)?;

        *stage = FailureType::BuildFailed;
        let product = site.build()?;

        *stage = FailureType::ResultConsumerFailed;
        let bin = ProductBin {
            key: site.key().clone(),
            product,
            remaining: site.remaining(Instant::now()),
            status: tag,
            properties: site.take_properties(),
        };
        let consumer = Arc::clone(&self.settings.read().result_consumer);
        guarded(|| {
            consumer
                .accept(&bin)
                .map_err(|e| ConveyorError::ResultConsumer {
                    error: format!("{e:#}"),
                })
        })?;

        site.resolve_waiters(&bin.product);
        let how = if tag == SiteStatus::TimedOut {
            "timeout_forced"
        } else {
            "ready"
        };
        tracing::trace!(conveyor = %self.name, key = ?bin.key, how, "product delivered");
        self.publish(
            Event::new(EventKind::ProductReady)
                .with_key(&bin.key)
                .with_reason(how),
        );
        Ok(())
    }

    /// Removes the key from the delay index and runs before-eviction hooks.
    ///
    /// The key is gone even when a hook fails.
    fn evict(&mut self, site: &mut BuildingSite<K, L, V, B>) -> Result<(), ConveyorError> {
        if !site.mark_evicted() {
            return Ok(());
        }
        self.delays.remove(site.key());
        let hooks = self.settings.read().eviction_hooks.clone();
        for hook in hooks {
            guarded(|| {
                hook(site.key()).map_err(|e| ConveyorError::Eviction {
                    error: format!("{e:#}"),
                })
            })?;
        }
        Ok(())
    }

    fn fail_site(
        &mut self,
        mut site: BuildingSite<K, L, V, B>,
        err: ConveyorError,
        stage: FailureType,
        cart: Option<Cart<K, L, V>>,
    ) {
        let key = site.key().clone();
        tracing::warn!(conveyor = %self.name, key = ?key, status = %site.status(), failure = %stage, error = %err, "build failed");

        site.fail();
        if let Err(e) = self.evict(&mut site) {
            tracing::warn!(conveyor = %self.name, key = ?key, error = %e, "eviction hook failed");
        }
        site.fail_waiters(&err);

        let scrap = match (stage, cart) {
            (FailureType::DataRejected, Some(cart)) => Scrap::Cart(cart),
            _ => Scrap::Site(site.snapshot()),
        };
        self.publish(
            Event::new(EventKind::SiteFailed)
                .with_key(&key)
                .with_failure(stage)
                .with_reason(err.as_message()),
        );
        self.scrap(
            Some(key),
            scrap,
            format!("build failed at {stage}"),
            Some(err),
            stage,
        );
    }

    fn cancel(&mut self, mut site: BuildingSite<K, L, V, B>) {
        let key = site.key().clone();
        site.finish(SiteStatus::Canceled);
        if let Err(e) = self.evict(&mut site) {
            tracing::warn!(conveyor = %self.name, key = ?key, error = %e, "eviction hook failed");
        }
        site.cancel_waiters();
        self.publish(Event::new(EventKind::SiteCanceled).with_key(&key));
        self.scrap(
            Some(key),
            Scrap::Site(site.snapshot()),
            "canceled by command",
            None,
            FailureType::BuildCanceled,
        );
    }

    // === Expiration ===

    fn sweep(&mut self, now: Instant) {
        for key in self.delays.pop_expired(now) {
            let Some(mut site) = self.collector.remove(&key) else {
                continue;
            };
            match site.refresh_expiration() {
                Some(at) if at > now => {
                    tracing::trace!(conveyor = %self.name, key = ?key, "expiration postponed");
                    self.delays.insert(key.clone(), at);
                    self.collector.insert(key, site);
                }
                _ => self.expire(site),
            }
        }
    }

    /// Runs the expiration path: timeout action, forced readiness, or expiry.
    fn expire(&mut self, mut site: BuildingSite<K, L, V, B>) {
        let key = site.key().clone();

        if site.has_timeout_action() {
            if let Err(err) = site.timeout() {
                self.fail_site(site, err, FailureType::OnTimeoutFailed, None);
                return;
            }
            let mut stage = FailureType::ReadyFailed;
            match site.ready() {
                Ok(true) => {
                    if let Err(err) = self.complete(&mut site, &mut stage, SiteStatus::TimedOut) {
                        self.fail_site(site, err, stage, None);
                    }
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    self.fail_site(site, err, stage, None);
                    return;
                }
            }
        }

        site.finish(SiteStatus::TimedOut);
        if let Err(e) = self.evict(&mut site) {
            tracing::warn!(conveyor = %self.name, key = ?key, error = %e, "eviction hook failed");
        }
        site.cancel_waiters();
        tracing::debug!(conveyor = %self.name, key = ?key, "build expired");
        self.publish(Event::new(EventKind::SiteExpired).with_key(&key));
        self.scrap(
            Some(key),
            Scrap::Site(site.snapshot()),
            "build expired",
            None,
            FailureType::BuildExpired,
        );
    }

    // === Shutdown ===

    /// Scraps everything still queued or in flight; their handles resolve as cancelled.
    fn drain(&mut self) {
        self.carts.close();
        self.controls.close();

        while let Ok(Parcel { load, ack }) = self.carts.try_recv() {
            self.stats.queued.fetch_sub(1, Ordering::Relaxed);
            let key = load.key().cloned();
            self.scrap(
                key,
                load.into_scrap(),
                "conveyor stopped",
                Some(ConveyorError::Stopped),
                FailureType::ConveyorStopped,
            );
            drop(ack);
        }
        while let Ok(ctl) = self.controls.try_recv() {
            if let Control::Command { command, ack } = ctl {
                let key = command.key().clone();
                self.scrap(
                    Some(key),
                    Scrap::Command(command),
                    "conveyor stopped",
                    Some(ConveyorError::Stopped),
                    FailureType::ConveyorStopped,
                );
                drop(ack);
            }
        }

        let sites: Vec<_> = self.collector.drain().collect();
        for (key, mut site) in sites {
            site.finish(SiteStatus::Canceled);
            site.cancel_waiters();
            self.scrap(
                Some(key),
                Scrap::Site(site.snapshot()),
                "conveyor stopped",
                Some(ConveyorError::Stopped),
                FailureType::ConveyorStopped,
            );
        }
        self.delays.clear();
        self.sync_stats();
        tracing::debug!(conveyor = %self.name, "worker stopped");
    }
}
