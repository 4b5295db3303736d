//! # BuildingSite: the per-key state machine.
//!
//! A site wraps one builder and everything the worker knows about its key.
//! Sites are created lazily, owned by the worker, and dropped once terminal.
//!
//! ## Construction
//! Resolved once and cached:
//! - **readiness**: `StateAware` > `SelfTest` > `External` evaluator (none is an error at check time)
//! - **timeout**: builder `on_timeout` > conveyor timeout action > none
//! - **expiration**: builder-owned > triggering cart > default build timeout > never
//!
//! ## Operations
//! ```text
//! accept(cart) ──► label handler | default dispatcher ──► histogram, postponement
//! ready()      ──► State snapshot ──► evaluator ──► WaitingData → Ready
//! build()      ──► builder.build()             (only when Ready)
//! timeout()    ──► builder.on_timeout() | action (may force readiness)
//! ```
//!
//! With `synchronize_builder`, every builder call goes through a lock so
//! [`ProductSupplier`] can read the builder from foreign threads.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::bins::SiteSnapshot;
use crate::building::{Builder, Dispatcher, LabelTable, ReadinessFn, State, TimeoutAction};
use crate::carts::{Cart, ProductError, Waiter};
use crate::core::guard::guarded;
use crate::core::settings::Settings;
use crate::core::status::{SiteStatus, StatusCell};
use crate::error::ConveyorError;

/// Builder storage: plain by default, locked when partial reads are enabled.
enum BuilderCell<B> {
    Owned(B),
    Shared(Arc<Mutex<B>>),
}

impl<B> BuilderCell<B> {
    fn read<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        match self {
            BuilderCell::Owned(b) => f(b),
            BuilderCell::Shared(m) => f(&m.lock()),
        }
    }

    fn write<R>(&mut self, f: impl FnOnce(&mut B) -> R) -> R {
        match self {
            BuilderCell::Owned(b) => f(b),
            BuilderCell::Shared(m) => f(&mut m.lock()),
        }
    }
}

/// Readiness source, resolved at construction.
enum Readiness<K, L, V, B> {
    StateAware,
    SelfTest,
    External(ReadinessFn<K, L, V, B>),
    Missing,
}

/// Timeout source, resolved at construction.
enum OnTimeout<B> {
    Builder,
    Action(TimeoutAction<B>),
    Nothing,
}

pub(crate) struct BuildingSite<K, L, V, B: Builder<K, L, V>> {
    key: K,
    builder: BuilderCell<B>,
    readiness: Readiness<K, L, V, B>,
    on_timeout: OnTimeout<B>,
    dispatcher: Option<Dispatcher<L, V, B>>,
    labels: Arc<LabelTable<L, V, B>>,
    builder_expiration: bool,
    postpone: Option<Duration>,
    keep_carts: bool,
    created: Instant,
    expires: Option<Instant>,
    accept_count: usize,
    histogram: HashMap<L, usize>,
    carts: Vec<Cart<K, L, V>>,
    properties: HashMap<String, String>,
    status: StatusCell,
    waiters: Vec<Waiter<B::Product>>,
    evicted: bool,
}

fn dispatch_error<L: Debug>(label: &L, err: anyhow::Error) -> ConveyorError {
    ConveyorError::Dispatch {
        label: format!("{label:?}"),
        error: format!("{err:#}"),
    }
}

impl<K, L, V, B> BuildingSite<K, L, V, B>
where
    K: Clone + Debug,
    L: Clone + Eq + Hash + Debug,
    V: Clone,
    B: Builder<K, L, V>,
{
    /// Creates a site for `key` around a freshly supplied builder.
    pub(crate) fn new(
        key: K,
        builder: B,
        settings: &Settings<K, L, V, B>,
        cart_expires: Option<Instant>,
        synchronized: bool,
    ) -> Self {
        let caps = builder.capabilities();
        let readiness = if caps.state_test {
            Readiness::StateAware
        } else if caps.self_test {
            Readiness::SelfTest
        } else if let Some(f) = &settings.readiness {
            Readiness::External(Arc::clone(f))
        } else {
            Readiness::Missing
        };
        let on_timeout = if caps.timeout {
            OnTimeout::Builder
        } else if let Some(action) = &settings.timeout_action {
            OnTimeout::Action(Arc::clone(action))
        } else {
            OnTimeout::Nothing
        };

        let created = Instant::now();
        let own = if caps.expiration {
            builder.expiration()
        } else {
            None
        };
        let expires = own
            .or(cart_expires)
            .or_else(|| settings.build_timeout.map(|d| created + d));

        let builder = if synchronized {
            BuilderCell::Shared(Arc::new(Mutex::new(builder)))
        } else {
            BuilderCell::Owned(builder)
        };

        Self {
            key,
            builder,
            readiness,
            on_timeout,
            dispatcher: settings.dispatcher.clone(),
            labels: Arc::clone(&settings.labels),
            builder_expiration: caps.expiration,
            postpone: settings.postpone(),
            keep_carts: settings.keep_carts,
            created,
            expires,
            accept_count: 0,
            histogram: HashMap::new(),
            carts: Vec::new(),
            properties: HashMap::new(),
            status: StatusCell::default(),
            waiters: Vec::new(),
            evicted: false,
        }
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn status(&self) -> SiteStatus {
        self.status.get()
    }

    pub(crate) fn expires(&self) -> Option<Instant> {
        self.expires
    }

    pub(crate) fn set_expires(&mut self, at: Instant) {
        self.expires = Some(at);
    }

    pub(crate) fn has_timeout_action(&self) -> bool {
        !matches!(self.on_timeout, OnTimeout::Nothing)
    }

    /// Marks the key as evicted. Returns `false` if it already was.
    pub(crate) fn mark_evicted(&mut self) -> bool {
        !std::mem::replace(&mut self.evicted, true)
    }

    /// Dispatches one cart into the builder.
    pub(crate) fn accept(&mut self, cart: &Cart<K, L, V>) -> Result<(), ConveyorError> {
        let label = cart.label();
        let value = cart.value().clone();
        let builder = &mut self.builder;

        let dispatched = if let Some(handler) = self.labels.get(label) {
            guarded(|| builder.write(|b| handler(b, value)).map_err(|e| dispatch_error(label, e)))
        } else if let Some(dispatcher) = &self.dispatcher {
            guarded(|| {
                builder
                    .write(|b| dispatcher(label, value, b))
                    .map_err(|e| dispatch_error(label, e))
            })
        } else {
            Err(ConveyorError::NoDispatcher {
                label: format!("{label:?}"),
            })
        };
        dispatched?;

        self.accept_count += 1;
        *self.histogram.entry(label.clone()).or_insert(0) += 1;
        self.properties.clone_from(cart.properties());
        if self.keep_carts {
            self.carts.push(cart.clone());
        }
        self.postpone_expiration();
        Ok(())
    }

    /// Moves the expiration forward by the postponement step, or to the
    /// builder-owned expiration when that is later.
    fn postpone_expiration(&mut self) {
        let Some(step) = self.postpone else {
            return;
        };
        let Some(current) = self.expires else {
            return;
        };
        let mut next = current + step;
        if self.builder_expiration {
            let builder = &self.builder;
            if let Ok(Some(own)) = guarded(|| Ok(builder.read(|b| b.expiration()))) {
                next = next.max(own);
            }
        }
        self.expires = Some(next);
    }

    /// Re-reads the builder-owned expiration under postponement.
    pub(crate) fn refresh_expiration(&mut self) -> Option<Instant> {
        if self.postpone.is_some() && self.builder_expiration {
            let own = guarded(|| Ok(self.builder.read(|b| b.expiration()))).ok().flatten();
            if let (Some(own), Some(current)) = (own, self.expires) {
                if own > current {
                    self.expires = Some(own);
                }
            }
        }
        self.expires
    }

    /// Evaluates readiness; on `true` the site becomes `Ready`.
    pub(crate) fn ready(&mut self) -> Result<bool, ConveyorError> {
        match self.status.get() {
            SiteStatus::WaitingData => {}
            SiteStatus::Ready => return Ok(true),
            other => {
                return Err(ConveyorError::SiteClosed {
                    status: other.as_label(),
                });
            }
        }

        let state = State {
            key: &self.key,
            created: self.created,
            expires: self.expires,
            accept_count: self.accept_count,
            histogram: &self.histogram,
            carts: &self.carts,
        };
        let builder = &self.builder;
        let ready = match &self.readiness {
            Readiness::StateAware => guarded(|| Ok(builder.read(|b| b.test_state(&state))))?,
            Readiness::SelfTest => guarded(|| Ok(builder.read(|b| b.test())))?,
            Readiness::External(f) => guarded(|| Ok(builder.read(|b| f(&state, b))))?,
            Readiness::Missing => return Err(ConveyorError::NoReadiness),
        };

        if ready {
            self.status.finish(SiteStatus::Ready);
        }
        Ok(ready)
    }

    /// Produces the product. Only legal once `ready()` returned `true`.
    pub(crate) fn build(&mut self) -> Result<B::Product, ConveyorError> {
        if self.status.get() != SiteStatus::Ready {
            return Err(ConveyorError::NotReady);
        }
        let builder = &mut self.builder;
        guarded(|| {
            builder.write(|b| b.build()).map_err(|e| ConveyorError::Build {
                error: format!("{e:#}"),
            })
        })
    }

    /// Runs the timeout capability or action. Returns `false` if there is none.
    pub(crate) fn timeout(&mut self) -> Result<bool, ConveyorError> {
        let builder = &mut self.builder;
        let ran = match &self.on_timeout {
            OnTimeout::Builder => guarded(|| builder.write(|b| b.on_timeout()).map_err(timeout_error)),
            OnTimeout::Action(action) => guarded(|| builder.write(|b| action(b)).map_err(timeout_error)),
            OnTimeout::Nothing => return Ok(false),
        };
        ran.map(|()| true)
    }

    /// Leaves `WaitingData`. Returns `false` if the site was already terminal.
    pub(crate) fn finish(&self, status: SiteStatus) -> bool {
        self.status.finish(status)
    }

    /// Marks the site `Invalid` unless it already left `WaitingData`.
    pub(crate) fn fail(&self) {
        self.status.finish(SiteStatus::Invalid);
    }

    pub(crate) fn add_waiter(&mut self, waiter: Waiter<B::Product>) {
        self.waiters.push(waiter);
    }

    /// Delivers the product to every waiter.
    pub(crate) fn resolve_waiters(&mut self, product: &B::Product) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(product.clone()));
        }
    }

    /// Fails every waiter with `err`.
    pub(crate) fn fail_waiters(&mut self, err: &ConveyorError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ProductError::Failed(err.clone())));
        }
    }

    /// Drops every waiter; their handles resolve as cancelled.
    pub(crate) fn cancel_waiters(&mut self) {
        self.waiters.clear();
    }

    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires.map(|at| at.saturating_duration_since(now))
    }

    pub(crate) fn take_properties(&mut self) -> HashMap<String, String> {
        std::mem::take(&mut self.properties)
    }

    pub(crate) fn snapshot(&self) -> SiteSnapshot<K, L, V> {
        SiteSnapshot {
            key: self.key.clone(),
            status: self.status.get(),
            created: self.created,
            expires: self.expires,
            accept_count: self.accept_count,
            histogram: self.histogram.clone(),
            carts: self.carts.clone(),
        }
    }

    /// Returns a partial product reader when the builder is synchronized.
    pub(crate) fn product_supplier(&self) -> Option<ProductSupplier<K, L, V, B>> {
        match &self.builder {
            BuilderCell::Shared(m) => Some(ProductSupplier {
                builder: Arc::clone(m),
                status: self.status.clone(),
                _types: PhantomData,
            }),
            BuilderCell::Owned(_) => None,
        }
    }
}

fn timeout_error(err: anyhow::Error) -> ConveyorError {
    ConveyorError::TimeoutAction {
        error: format!("{err:#}"),
    }
}

/// Reads the product of an in-flight build from any thread.
///
/// Obtained from [`AssemblingConveyor::product_supplier`](crate::AssemblingConveyor::product_supplier).
/// Works only while the build is still waiting for data.
pub struct ProductSupplier<K, L, V, B> {
    builder: Arc<Mutex<B>>,
    status: StatusCell,
    _types: PhantomData<fn() -> (K, L, V)>,
}

impl<K, L, V, B: Builder<K, L, V>> ProductSupplier<K, L, V, B> {
    /// Builds a product from the current (partial) builder state.
    pub fn get(&self) -> Result<B::Product, ConveyorError> {
        let mut builder = self.builder.lock();
        let status = self.status.get();
        if status != SiteStatus::WaitingData {
            return Err(ConveyorError::SiteClosed {
                status: status.as_label(),
            });
        }
        guarded(|| {
            builder.build().map_err(|e| ConveyorError::Build {
                error: format!("{e:#}"),
            })
        })
    }

    /// Current status of the build.
    pub fn status(&self) -> SiteStatus {
        self.status.get()
    }
}

impl<K, L, V, B> Clone for ProductSupplier<K, L, V, B> {
    fn clone(&self) -> Self {
        Self {
            builder: Arc::clone(&self.builder),
            status: self.status.clone(),
            _types: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::building::Capabilities;
    use crate::core::ConveyorConfig;
    use anyhow::anyhow;

    #[derive(Default)]
    struct Name {
        parts: Vec<String>,
        own_expiration: Option<Instant>,
        timeouts: usize,
    }

    impl Builder<u32, &'static str, String> for Name {
        type Product = String;

        fn build(&mut self) -> anyhow::Result<String> {
            if self.parts.is_empty() {
                return Err(anyhow!("empty"));
            }
            Ok(self.parts.join(" "))
        }
    }

    struct SelfTesting(Name);

    impl Builder<u32, &'static str, String> for SelfTesting {
        type Product = String;

        fn build(&mut self) -> anyhow::Result<String> {
            self.0.build()
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE
                .with_self_test()
                .with_state_test()
                .with_expiration()
                .with_timeout()
        }

        fn test(&self) -> bool {
            false
        }

        fn test_state(&self, state: &State<'_, u32, &'static str, String>) -> bool {
            state.accept_count >= 2
        }

        fn on_timeout(&mut self) -> anyhow::Result<()> {
            self.0.timeouts += 1;
            Ok(())
        }

        fn expiration(&self) -> Option<Instant> {
            self.0.own_expiration
        }
    }

    fn settings<B: Builder<u32, &'static str, String>>() -> Settings<u32, &'static str, String, B> {
        let mut s = Settings::from_config(&ConveyorConfig::default());
        s.dispatcher = Some(Arc::new(
            |_l: &&'static str, v: String, b: &mut B| -> anyhow::Result<()> {
                let _ = (v, b);
                Ok(())
            },
        ));
        s
    }

    fn name_settings() -> Settings<u32, &'static str, String, Name> {
        let mut s = Settings::from_config(&ConveyorConfig::default());
        s.dispatcher = Some(Arc::new(
            |_l: &&'static str, v: String, b: &mut Name| -> anyhow::Result<()> {
                b.parts.push(v);
                Ok(())
            },
        ));
        s.readiness = Some(Arc::new(
            |state: &State<u32, &'static str, String>, _b: &Name| state.has(&"last"),
        ));
        s
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_readiness_and_build() {
        let s = name_settings();
        let mut site = BuildingSite::new(1, Name::default(), &s, None, false);

        site.accept(&Cart::new(1, "first", "Ada".into())).unwrap();
        assert!(!site.ready().unwrap());
        assert!(matches!(site.build(), Err(ConveyorError::NotReady)));

        site.accept(&Cart::new(1, "last", "Lovelace".into())).unwrap();
        assert!(site.ready().unwrap());
        assert_eq!(site.status(), SiteStatus::Ready);
        assert_eq!(site.build().unwrap(), "Ada Lovelace");
        assert_eq!(site.snapshot().accept_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_aware_takes_precedence() {
        let s = settings::<SelfTesting>();
        let mut site = BuildingSite::new(1, SelfTesting(Name::default()), &s, None, false);

        site.accept(&Cart::new(1, "a", "x".into())).unwrap();
        assert!(!site.ready().unwrap());
        site.accept(&Cart::new(1, "b", "y".into())).unwrap();
        assert!(site.ready().unwrap(), "test() says false, test_state() wins");
    }

    #[tokio::test(start_paused = true)]
    async fn test_label_handler_overrides_dispatcher() {
        let mut s = name_settings();
        s.labels = Arc::new(LabelTable::new().on("first", |b: &mut Name, v: String| {
            b.parts.push(v.to_uppercase());
            Ok(())
        }));
        let mut site = BuildingSite::new(1, Name::default(), &s, None, false);

        site.accept(&Cart::new(1, "first", "ada".into())).unwrap();
        site.accept(&Cart::new(1, "last", "lovelace".into())).unwrap();
        site.ready().unwrap();
        assert_eq!(site.build().unwrap(), "ADA lovelace");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_dispatcher_and_readiness() {
        let s: Settings<u32, &'static str, String, Name> =
            Settings::from_config(&ConveyorConfig::default());
        let mut site = BuildingSite::new(1, Name::default(), &s, None, false);

        assert!(matches!(
            site.accept(&Cart::new(1, "first", "x".into())),
            Err(ConveyorError::NoDispatcher { .. })
        ));
        assert_eq!(site.ready(), Err(ConveyorError::NoReadiness));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_fallback_order() {
        let now = Instant::now();
        let own = now + Duration::from_secs(1);
        let cart = now + Duration::from_secs(2);

        let mut s = settings::<SelfTesting>();
        s.build_timeout = Some(Duration::from_secs(3));

        let builder = SelfTesting(Name {
            own_expiration: Some(own),
            ..Name::default()
        });
        let site = BuildingSite::new(1, builder, &s, Some(cart), false);
        assert_eq!(site.expires(), Some(own), "builder first");

        let site = BuildingSite::new(1, SelfTesting(Name::default()), &s, Some(cart), false);
        assert_eq!(site.expires(), Some(cart), "then cart");

        let site = BuildingSite::new(1, SelfTesting(Name::default()), &s, None, false);
        assert_eq!(site.expires(), Some(now + Duration::from_secs(3)), "then default");

        s.build_timeout = None;
        let site = BuildingSite::new(1, SelfTesting(Name::default()), &s, None, false);
        assert_eq!(site.expires(), None, "then never");
    }

    #[tokio::test(start_paused = true)]
    async fn test_postponement_moves_expiration() {
        let mut s = name_settings();
        s.build_timeout = Some(Duration::from_millis(100));
        s.postpone_expiration = true;
        s.postpone_duration = Duration::from_millis(50);
        let mut site = BuildingSite::new(1, Name::default(), &s, None, false);

        let before = site.expires().unwrap();
        site.accept(&Cart::new(1, "first", "x".into())).unwrap();
        let after = site.expires().unwrap();
        assert!(after >= before + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_prefers_builder_capability() {
        let mut s = settings::<SelfTesting>();
        s.timeout_action = Some(Arc::new(|_b: &mut SelfTesting| -> anyhow::Result<()> {
            Err(anyhow!("not used"))
        }));
        let mut site = BuildingSite::new(1, SelfTesting(Name::default()), &s, None, false);

        assert!(site.has_timeout_action());
        assert_eq!(site.timeout(), Ok(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_action_errors_are_tagged() {
        let mut s = name_settings();
        assert!(!BuildingSite::new(1, Name::default(), &s, None, false).has_timeout_action());

        s.timeout_action = Some(Arc::new(|_b: &mut Name| -> anyhow::Result<()> {
            Err(anyhow!("no luck"))
        }));
        let mut site = BuildingSite::new(1, Name::default(), &s, None, false);
        assert_eq!(
            site.timeout(),
            Err(ConveyorError::TimeoutAction {
                error: "no luck".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_terminal_once() {
        let s = name_settings();
        let mut site = BuildingSite::new(1, Name::default(), &s, None, false);
        assert!(site.finish(SiteStatus::Canceled));
        assert!(!site.finish(SiteStatus::TimedOut));
        assert!(matches!(site.ready(), Err(ConveyorError::SiteClosed { .. })));
        assert!(site.mark_evicted());
        assert!(!site.mark_evicted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_product_supplier_requires_synchronized_builder() {
        let s = name_settings();
        let site = BuildingSite::new(1, Name::default(), &s, None, false);
        assert!(site.product_supplier().is_none());

        let mut site = BuildingSite::new(1, Name::default(), &s, None, true);
        let supplier = site.product_supplier().unwrap();
        assert!(matches!(supplier.get(), Err(ConveyorError::Build { .. })));

        site.accept(&Cart::new(1, "first", "Ada".into())).unwrap();
        assert_eq!(supplier.get().unwrap(), "Ada");

        site.accept(&Cart::new(1, "last", "L".into())).unwrap();
        site.ready().unwrap();
        assert!(matches!(supplier.get(), Err(ConveyorError::SiteClosed { .. })));
    }
}
