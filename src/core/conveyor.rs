//! # AssemblingConveyor: the producer-facing handle.
//!
//! A cheap, cloneable handle over one running worker. Producers on any thread
//! place carts and commands; validation runs on the caller's thread, everything
//! else happens on the worker.
//!
//! ```text
//! place(cart) ──► running? / expired? / too old? / user validators
//!                   ├─ fail ─► scrap CART_REJECTED, handle = Rejected
//!                   └─ ok   ─► cart queue ──► worker
//!
//! add_command(cmd) ──► running? / expired? / too old?
//!                   └─ ok   ─► control queue ──► worker (drained before carts)
//!
//! stop()              ─► worker exits at the next wait; queued work is scrapped
//! complete_and_stop() ─► worker finishes queued work, then exits
//! ```
//!
//! ## Rules
//! - Handles never block; every method except the inspections and
//!   `complete_and_stop` is synchronous.
//! - Setters change live settings; they affect builds created afterwards.
//! - `stop()` is idempotent; placements after it resolve `Rejected(NotRunning)`.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bins::{Scrap, ScrapBin};
use crate::building::{Builder, LabelTable, State};
use crate::carts::{
    Cart, CartHandle, CartKey, CartLabel, CartValue, Command, Load, Outcome, Parcel,
    ProductError, ProductHandle,
};
use crate::consumers::{ResultConsumer, ScrapConsumer};
use crate::core::guard::guarded;
use crate::core::settings::Settings;
use crate::core::site::ProductSupplier;
use crate::core::validate::{self, check_envelope};
use crate::core::worker::{Control, Stats};
use crate::error::{ConveyorError, FailureType, RuntimeError};
use crate::events::{Bus, Event, EventKind};

pub(crate) struct Inner<K, L, V, B: Builder<K, L, V>> {
    pub(crate) name: Arc<str>,
    pub(crate) settings: Arc<RwLock<Settings<K, L, V, B>>>,
    pub(crate) carts: mpsc::UnboundedSender<Parcel<K, L, V, B>>,
    pub(crate) controls: mpsc::UnboundedSender<Control<K, L, V, B>>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) stop: CancellationToken,
    pub(crate) finish: CancellationToken,
    pub(crate) exited: CancellationToken,
    pub(crate) exit: Arc<Mutex<Option<RuntimeError>>>,
    pub(crate) stats: Arc<Stats>,
    pub(crate) bus: Bus,
    pub(crate) synchronized: bool,
}

/// Registry entry of a conveyor. Does not keep the worker alive.
pub(crate) struct Registered<K, L, V, B: Builder<K, L, V>> {
    inner: Weak<Inner<K, L, V, B>>,
}

impl<K, L, V, B: Builder<K, L, V>> Registered<K, L, V, B> {
    /// Returns a handle while at least one other handle is alive.
    pub(crate) fn upgrade(&self) -> Option<AssemblingConveyor<K, L, V, B>> {
        self.inner.upgrade().map(|inner| AssemblingConveyor { inner })
    }
}

/// Handle to a running conveyor. Clones share the same worker.
///
/// Built with [`ConveyorBuilder`](crate::ConveyorBuilder).
pub struct AssemblingConveyor<K, L, V, B: Builder<K, L, V>> {
    inner: Arc<Inner<K, L, V, B>>,
}

impl<K, L, V, B: Builder<K, L, V>> Clone for AssemblingConveyor<K, L, V, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, L, V, B: Builder<K, L, V>> std::fmt::Debug for AssemblingConveyor<K, L, V, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblingConveyor")
            .field("name", &self.inner.name)
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<K, L, V, B> AssemblingConveyor<K, L, V, B>
where
    K: CartKey,
    L: CartLabel,
    V: CartValue,
    B: Builder<K, L, V>,
{
    pub(crate) fn from_inner(inner: Inner<K, L, V, B>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn registered(&self) -> Registered<K, L, V, B> {
        Registered {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // === Placement ===

    /// Places a data cart.
    pub fn place(&self, cart: Cart<K, L, V>) -> CartHandle {
        if let Err(err) = self.validate_cart(&cart) {
            let key = cart.key().cloned();
            return self.reject(key, Scrap::Cart(cart), err, FailureType::CartRejected);
        }
        self.enqueue(Load::Part(cart))
    }

    /// Places a management command.
    pub fn add_command(&self, command: Command<K>) -> CartHandle {
        if let Err(err) = self.check(command.created(), command.expires()) {
            let key = command.key().clone();
            return self.reject(
                Some(key),
                Scrap::Command(command),
                err,
                FailureType::CommandRejected,
            );
        }
        let (ack, handle) = CartHandle::channel();
        if let Err(mpsc::error::SendError(ctl)) =
            self.inner.controls.send(Control::Command { command, ack })
        {
            if let Control::Command { ack, .. } = ctl {
                let _ = ack.send(Outcome::Rejected(ConveyorError::NotRunning));
            }
        }
        handle
    }

    /// Creates an empty build for `key` with the default supplier.
    pub fn create_build(&self, key: K) -> CartHandle {
        self.add_command(Command::create(key))
    }

    /// Creates an empty build for `key` with its own supplier.
    ///
    /// No-op if the key is already in flight.
    pub fn create_build_with<F>(&self, key: K, supplier: F) -> CartHandle
    where
        F: Fn() -> B + Send + Sync + 'static,
    {
        let created = Instant::now();
        if let Err(err) = self.check(created, None) {
            return self.reject(
                Some(key.clone()),
                Scrap::Request {
                    key,
                    kind: "create",
                },
                err,
                FailureType::CartRejected,
            );
        }
        self.enqueue(Load::Create {
            key,
            supplier: Some(Arc::new(supplier)),
            created,
            expires: None,
            waiter: None,
        })
    }

    /// Creates a build for `key` (if absent) and returns a handle to its product.
    pub fn create_build_future(&self, key: K) -> ProductHandle<B::Product> {
        let created = Instant::now();
        if let Err(err) = self.check(created, None) {
            drop(self.reject(
                Some(key.clone()),
                Scrap::Request {
                    key,
                    kind: "create",
                },
                err.clone(),
                FailureType::CartRejected,
            ));
            return ProductHandle::resolved(Err(ProductError::Failed(err)));
        }
        let (waiter, product) = ProductHandle::channel();
        drop(self.enqueue(Load::Create {
            key,
            supplier: None,
            created,
            expires: None,
            waiter: Some(waiter),
        }));
        product
    }

    /// Returns a handle to the product of `key`, creating the build if absent.
    pub fn future(&self, key: K) -> ProductHandle<B::Product> {
        let created = Instant::now();
        if let Err(err) = self.check(created, None) {
            return ProductHandle::resolved(Err(ProductError::Failed(err)));
        }
        let (waiter, product) = ProductHandle::channel();
        drop(self.enqueue(Load::Future {
            key,
            created,
            waiter,
        }));
        product
    }

    pub fn cancel(&self, key: K) -> CartHandle {
        self.add_command(Command::cancel(key))
    }

    pub fn reschedule(&self, key: K, at: Instant) -> CartHandle {
        self.add_command(Command::reschedule(key, at))
    }

    /// Forces the expiration path of `key` now.
    pub fn timeout(&self, key: K) -> CartHandle {
        self.add_command(Command::timeout(key))
    }

    /// Re-evaluates readiness of `key`.
    pub fn check_ready(&self, key: K) -> CartHandle {
        self.add_command(Command::check(key))
    }

    fn check(&self, created: Instant, expires: Option<Instant>) -> Result<(), ConveyorError> {
        let max_age = self.inner.settings.read().max_cart_age;
        check_envelope(self.is_running(), created, expires, max_age, Instant::now())
    }

    fn validate_cart(&self, cart: &Cart<K, L, V>) -> Result<(), ConveyorError> {
        let (max_age, validators) = {
            let settings = self.inner.settings.read();
            (settings.max_cart_age, settings.validators.clone())
        };
        check_envelope(
            self.is_running(),
            cart.created(),
            cart.expires(),
            max_age,
            Instant::now(),
        )?;
        // Validators run unlocked; they may call setters on this conveyor.
        for validator in &validators {
            guarded(|| validator(cart))?;
        }
        Ok(())
    }

    fn enqueue(&self, load: Load<K, L, V, B>) -> CartHandle {
        let (ack, handle) = CartHandle::channel();
        self.inner.stats.queued.fetch_add(1, Ordering::Relaxed);
        if let Err(mpsc::error::SendError(parcel)) = self.inner.carts.send(Parcel { load, ack }) {
            self.inner.stats.queued.fetch_sub(1, Ordering::Relaxed);
            let _ = parcel.ack.send(Outcome::Rejected(ConveyorError::NotRunning));
        }
        handle
    }

    fn reject(
        &self,
        key: Option<K>,
        scrap: Scrap<K, L, V>,
        err: ConveyorError,
        failure_type: FailureType,
    ) -> CartHandle {
        tracing::debug!(conveyor = %self.inner.name, key = ?key, error = %err, "rejected at placement");

        let mut ev = Event::new(if failure_type == FailureType::CommandRejected {
            EventKind::CommandRejected
        } else {
            EventKind::CartRejected
        })
        .with_failure(failure_type)
        .with_reason(err.as_label());
        if let Some(key) = &key {
            ev = ev.with_key(key);
        }
        self.inner.bus.publish(ev);

        let bin = ScrapBin::new(key, scrap, "rejected at placement", Some(err.clone()), failure_type);
        let consumer = Arc::clone(&self.inner.settings.read().scrap_consumer);
        match guarded(|| Ok(consumer.accept(&bin))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(conveyor = %self.inner.name, error = %e, "scrap consumer failed: {bin}"),
            Err(e) => tracing::error!(conveyor = %self.inner.name, error = %e, "scrap consumer panicked: {bin}"),
        }
        CartHandle::resolved(Outcome::Rejected(err))
    }

    // === Inspection ===

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Number of builds in flight (as of the last worker iteration).
    pub fn collector_size(&self) -> usize {
        self.inner.stats.collector.load(Ordering::Relaxed)
    }

    /// Number of queued data carts and build requests.
    pub fn input_queue_size(&self) -> usize {
        self.inner.stats.queued.load(Ordering::Relaxed)
    }

    /// Number of builds with a scheduled expiration.
    pub fn delayed_size(&self) -> usize {
        self.inner.stats.delayed.load(Ordering::Relaxed)
    }

    /// Subscribes to the event bus of this conveyor.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    /// Current expiration of `key`; `None` if unknown, never expiring, or stopped.
    pub async fn expiration_time(&self, key: K) -> Option<Instant> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .controls
            .send(Control::Expiration { key, reply })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Returns a reader of the partial product of an in-flight build.
    ///
    /// Requires `synchronize_builder`.
    pub async fn product_supplier(
        &self,
        key: K,
    ) -> Result<ProductSupplier<K, L, V, B>, ConveyorError> {
        if !self.inner.synchronized {
            return Err(ConveyorError::NotSynchronized);
        }
        let (reply, rx) = oneshot::channel();
        self.inner
            .controls
            .send(Control::Supplier { key, reply })
            .map_err(|_| ConveyorError::NotRunning)?;
        rx.await.map_err(|_| ConveyorError::Stopped)?
    }

    // === Settings ===

    pub fn set_builder_supplier<F>(&self, supplier: F)
    where
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.inner.settings.write().supplier = Some(Arc::new(supplier));
    }

    /// Sets a readiness evaluator over the accumulated state and the builder.
    pub fn set_readiness<F>(&self, readiness: F)
    where
        F: Fn(&State<K, L, V>, &B) -> bool + Send + Sync + 'static,
    {
        self.inner.settings.write().readiness = Some(Arc::new(readiness));
    }

    /// Sets a readiness evaluator over the builder only.
    pub fn set_builder_readiness<F>(&self, readiness: F)
    where
        F: Fn(&B) -> bool + Send + Sync + 'static,
    {
        self.set_readiness(move |_: &State<K, L, V>, b: &B| readiness(b));
    }

    pub fn set_default_dispatcher<F>(&self, dispatcher: F)
    where
        F: Fn(&L, V, &mut B) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.settings.write().dispatcher = Some(Arc::new(dispatcher));
    }

    pub fn set_label_table(&self, labels: LabelTable<L, V, B>) {
        self.inner.settings.write().labels = Arc::new(labels);
    }

    /// Embeds a handler in `label`; it wins over the default dispatcher.
    pub fn add_label_handler<F>(&self, label: L, handler: F)
    where
        F: Fn(&mut B, V) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut settings = self.inner.settings.write();
        Arc::make_mut(&mut settings.labels).insert(label, handler);
    }

    pub fn set_timeout_action<F>(&self, action: F)
    where
        F: Fn(&mut B) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.settings.write().timeout_action = Some(Arc::new(action));
    }

    pub fn set_idle_heartbeat(&self, heartbeat: Duration) {
        self.inner.settings.write().idle_heartbeat = heartbeat.max(Duration::from_millis(1));
    }

    /// Sets the default build timeout; `Duration::ZERO` disables it.
    pub fn set_default_build_timeout(&self, timeout: Duration) {
        self.inner.settings.write().build_timeout =
            (timeout > Duration::ZERO).then_some(timeout);
    }

    pub fn enable_postpone_expiration(&self, enable: bool) {
        self.inner.settings.write().postpone_expiration = enable;
    }

    pub fn set_postpone_duration(&self, duration: Duration) {
        self.inner.settings.write().postpone_duration = duration;
    }

    pub fn set_keep_carts_on_site(&self, keep: bool) {
        self.inner.settings.write().keep_carts = keep;
    }

    pub fn set_result_consumer(&self, consumer: impl ResultConsumer<K, B::Product>) {
        self.inner.settings.write().result_consumer = Arc::new(consumer);
    }

    pub fn set_scrap_consumer(&self, consumer: impl ScrapConsumer<K, L, V>) {
        self.inner.settings.write().scrap_consumer = Arc::new(consumer);
    }

    pub fn add_cart_validator<F>(&self, validator: F)
    where
        F: Fn(&Cart<K, L, V>) -> Result<(), ConveyorError> + Send + Sync + 'static,
    {
        self.inner.settings.write().validators.push(Arc::new(validator));
    }

    /// Rejects carts whose label is not in `labels`.
    pub fn accept_labels(&self, labels: impl IntoIterator<Item = L>) {
        self.inner
            .settings
            .write()
            .validators
            .push(validate::accept_labels(labels));
    }

    /// Rejects carts and commands created more than `age` ago.
    pub fn reject_carts_older_than(&self, age: Duration) {
        self.inner.settings.write().max_cart_age = Some(age);
    }

    pub fn add_before_eviction<F>(&self, hook: F)
    where
        F: Fn(&K) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.settings.write().eviction_hooks.push(Arc::new(hook));
    }

    // === Shutdown ===

    /// Stops the conveyor without processing queued work. Idempotent.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::AcqRel) {
            tracing::debug!(conveyor = %self.inner.name, "stopping");
            self.inner.bus.publish(
                Event::new(EventKind::ConveyorStopping).with_reason("stop"),
            );
        }
        self.inner.stop.cancel();
    }

    /// Stops accepting work, lets the worker finish everything queued, and
    /// waits for it to exit.
    pub async fn complete_and_stop(&self) -> Result<(), RuntimeError> {
        if self.inner.running.swap(false, Ordering::AcqRel) {
            tracing::debug!(conveyor = %self.inner.name, "completing");
            self.inner.bus.publish(
                Event::new(EventKind::ConveyorStopping).with_reason("complete"),
            );
        }
        self.inner.finish.cancel();
        self.stopped().await
    }

    /// Waits for the worker to exit.
    pub async fn stopped(&self) -> Result<(), RuntimeError> {
        self.inner.exited.cancelled().await;
        match self.inner.exit.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
