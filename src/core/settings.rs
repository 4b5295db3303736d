//! Live conveyor settings.
//!
//! Producers and the conveyor handle write through setters; the worker reads a
//! consistent view when it creates a site or needs a consumer. Changes affect
//! builds created afterwards; the heartbeat is re-read before every wait.

use std::sync::Arc;
use std::time::Duration;

use crate::building::{
    Builder, BuilderSupplier, Dispatcher, EvictionHook, LabelTable, ReadinessFn, TimeoutAction,
};
use crate::consumers::{IgnoreResult, LogScrap, ResultConsumer, ScrapConsumer};
use crate::core::ConveyorConfig;
use crate::core::validate::CartValidator;

pub(crate) struct Settings<K, L, V, B: Builder<K, L, V>> {
    pub(crate) supplier: Option<BuilderSupplier<B>>,
    pub(crate) readiness: Option<ReadinessFn<K, L, V, B>>,
    pub(crate) dispatcher: Option<Dispatcher<L, V, B>>,
    pub(crate) labels: Arc<LabelTable<L, V, B>>,
    pub(crate) timeout_action: Option<TimeoutAction<B>>,
    pub(crate) idle_heartbeat: Duration,
    pub(crate) build_timeout: Option<Duration>,
    pub(crate) postpone_expiration: bool,
    pub(crate) postpone_duration: Duration,
    pub(crate) max_cart_age: Option<Duration>,
    pub(crate) keep_carts: bool,
    pub(crate) result_consumer: Arc<dyn ResultConsumer<K, B::Product>>,
    pub(crate) scrap_consumer: Arc<dyn ScrapConsumer<K, L, V>>,
    pub(crate) validators: Vec<CartValidator<K, L, V>>,
    pub(crate) eviction_hooks: Vec<EvictionHook<K>>,
}

impl<K, L, V, B> Settings<K, L, V, B>
where
    K: std::fmt::Debug + 'static,
    L: Eq + std::hash::Hash + 'static,
    V: 'static,
    B: Builder<K, L, V>,
{
    pub(crate) fn from_config(cfg: &ConveyorConfig) -> Self {
        Self {
            supplier: None,
            readiness: None,
            dispatcher: None,
            labels: Arc::new(LabelTable::new()),
            timeout_action: None,
            idle_heartbeat: cfg.heartbeat_clamped(),
            build_timeout: cfg.build_timeout(),
            postpone_expiration: cfg.postpone_expiration,
            postpone_duration: cfg.postpone_duration,
            max_cart_age: cfg.max_cart_age,
            keep_carts: cfg.keep_carts_on_site,
            result_consumer: Arc::new(IgnoreResult),
            scrap_consumer: Arc::new(LogScrap),
            validators: Vec::new(),
            eviction_hooks: Vec::new(),
        }
    }
}

impl<K, L, V, B: Builder<K, L, V>> Settings<K, L, V, B> {
    /// Postponement step when enabled.
    pub(crate) fn postpone(&self) -> Option<Duration> {
        self.postpone_expiration.then_some(self.postpone_duration)
    }
}

impl<K, L, V, B: Builder<K, L, V>> Clone for Settings<K, L, V, B> {
    fn clone(&self) -> Self {
        Self {
            supplier: self.supplier.clone(),
            readiness: self.readiness.clone(),
            dispatcher: self.dispatcher.clone(),
            labels: Arc::clone(&self.labels),
            timeout_action: self.timeout_action.clone(),
            idle_heartbeat: self.idle_heartbeat,
            build_timeout: self.build_timeout,
            postpone_expiration: self.postpone_expiration,
            postpone_duration: self.postpone_duration,
            max_cart_age: self.max_cart_age,
            keep_carts: self.keep_carts,
            result_consumer: Arc::clone(&self.result_consumer),
            scrap_consumer: Arc::clone(&self.scrap_consumer),
            validators: self.validators.clone(),
            eviction_hooks: self.eviction_hooks.clone(),
        }
    }
}
