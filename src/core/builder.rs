use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::building::{Builder, LabelTable, State};
use crate::carts::{Cart, CartKey, CartLabel, CartValue};
use crate::consumers::{ResultConsumer, ScrapConsumer};
use crate::core::delay::DelayIndex;
use crate::core::guard::panic_message;
use crate::core::settings::Settings;
use crate::core::worker::{Stats, Worker};
use crate::core::{ConveyorConfig, Registry, validate};
use crate::error::{ConveyorError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};

use super::conveyor::{AssemblingConveyor, Inner};

/// Builder for constructing an [`AssemblingConveyor`] with its hooks.
///
/// Everything set here can also be changed later through conveyor setters,
/// except subscribers, the registry and `synchronize_builder`.
pub struct ConveyorBuilder<K, L, V, B: Builder<K, L, V>> {
    cfg: ConveyorConfig,
    settings: Settings<K, L, V, B>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    registry: Option<Registry>,
}

impl<K, L, V, B> ConveyorBuilder<K, L, V, B>
where
    K: CartKey,
    L: CartLabel,
    V: CartValue,
    B: Builder<K, L, V>,
{
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: ConveyorConfig) -> Self {
        let settings = Settings::from_config(&cfg);
        Self {
            cfg,
            settings,
            subscribers: Vec::new(),
            registry: None,
        }
    }

    /// Sets the default builder factory.
    pub fn with_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.settings.supplier = Some(Arc::new(supplier));
        self
    }

    /// Sets a readiness evaluator over the accumulated state and the builder.
    ///
    /// Ignored for builders that test themselves.
    pub fn with_readiness<F>(mut self, readiness: F) -> Self
    where
        F: Fn(&State<K, L, V>, &B) -> bool + Send + Sync + 'static,
    {
        self.settings.readiness = Some(Arc::new(readiness));
        self
    }

    pub fn with_builder_readiness<F>(self, readiness: F) -> Self
    where
        F: Fn(&B) -> bool + Send + Sync + 'static,
    {
        self.with_readiness(move |_: &State<K, L, V>, b: &B| readiness(b))
    }

    pub fn with_dispatcher<F>(mut self, dispatcher: F) -> Self
    where
        F: Fn(&L, V, &mut B) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.settings.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    pub fn with_labels(mut self, labels: LabelTable<L, V, B>) -> Self {
        self.settings.labels = Arc::new(labels);
        self
    }

    pub fn with_timeout_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut B) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.settings.timeout_action = Some(Arc::new(action));
        self
    }

    pub fn with_result_consumer(mut self, consumer: impl ResultConsumer<K, B::Product>) -> Self {
        self.settings.result_consumer = Arc::new(consumer);
        self
    }

    pub fn with_scrap_consumer(mut self, consumer: impl ScrapConsumer<K, L, V>) -> Self {
        self.settings.scrap_consumer = Arc::new(consumer);
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Cart<K, L, V>) -> Result<(), ConveyorError> + Send + Sync + 'static,
    {
        self.settings.validators.push(Arc::new(validator));
        self
    }

    /// Accepts only carts with the given labels.
    pub fn accept_labels(mut self, labels: impl IntoIterator<Item = L>) -> Self {
        self.settings.validators.push(validate::accept_labels(labels));
        self
    }

    pub fn with_before_eviction<F>(mut self, hook: F) -> Self
    where
        F: Fn(&K) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.settings.eviction_hooks.push(Arc::new(hook));
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive conveyor events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Registers the conveyor under its name while it runs.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Starts the worker and returns the conveyor handle.
    ///
    /// Must be called within a Tokio runtime. Fails if the registry already
    /// holds the configured name.
    pub fn build(self) -> Result<AssemblingConveyor<K, L, V, B>, RuntimeError> {
        let name: Arc<str> = Arc::from(self.cfg.name.as_str());
        let bus = Bus::new(Arc::clone(&name), self.cfg.bus_capacity_clamped());
        let (carts_tx, carts_rx) = mpsc::unbounded_channel();
        let (controls_tx, controls_rx) = mpsc::unbounded_channel();

        let settings = Arc::new(RwLock::new(self.settings));
        let stats = Arc::new(Stats::default());
        let running = Arc::new(AtomicBool::new(true));
        let stop = CancellationToken::new();
        let finish = CancellationToken::new();
        let exited = CancellationToken::new();
        let exit = Arc::new(Mutex::new(None));
        let synchronized = self.cfg.synchronize_builder;

        let conveyor = AssemblingConveyor::from_inner(Inner {
            name: Arc::clone(&name),
            settings: Arc::clone(&settings),
            carts: carts_tx,
            controls: controls_tx,
            running: Arc::clone(&running),
            stop: stop.clone(),
            finish: finish.clone(),
            exited: exited.clone(),
            exit: Arc::clone(&exit),
            stats: Arc::clone(&stats),
            bus: bus.clone(),
            synchronized,
        });

        if let Some(registry) = &self.registry {
            registry.register(name.to_string(), Arc::new(conveyor.registered()))?;
        }

        if !self.subscribers.is_empty() {
            let subs = SubscriberSet::new(self.subscribers, bus.clone());
            subscriber_listener(bus.subscribe(), subs, exited.clone());
        }

        let worker = Worker {
            name: Arc::clone(&name),
            settings,
            stats,
            bus: bus.clone(),
            synchronized,
            carts: carts_rx,
            controls: controls_rx,
            stop,
            finish,
            collector: Default::default(),
            delays: DelayIndex::new(self.cfg.delay_resolution),
        };
        let registry = self.registry;

        tokio::spawn(async move {
            if let Err(payload) = AssertUnwindSafe(worker.run()).catch_unwind().await {
                let info = panic_message(payload.as_ref());
                tracing::error!(conveyor = %name, %info, "worker panicked");
                *exit.lock() = Some(RuntimeError::WorkerPanicked { info });
            }
            running.store(false, Ordering::Release);
            if let Some(registry) = registry {
                registry.unregister(&name);
            }
            bus.publish(Event::new(EventKind::ConveyorStopped));
            exited.cancel();
        });

        Ok(conveyor)
    }
}

/// Forwards bus events to the subscriber set until the worker exits.
fn subscriber_listener(
    mut rx: broadcast::Receiver<Event>,
    subs: SubscriberSet,
    exited: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(ev) => subs.emit(ev),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = exited.cancelled() => {
                    while let Ok(ev) = rx.try_recv() {
                        subs.emit(ev);
                    }
                    break;
                }
            }
        }
        subs.shutdown().await;
    });
}
