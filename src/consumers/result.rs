//! # Result consumers.
//!
//! The worker hands every finished product to exactly one [`ResultConsumer`].
//! An error (or panic) from the consumer fails the build with
//! `RESULT_CONSUMER_FAILED`, and product waiters see the failure.
//!
//! Built-ins:
//! - [`ResultQueue`] buffers bins for polling.
//! - [`LastResultReference`] keeps only the most recent bin.
//! - [`LogResult`] writes bins through `tracing`.
//! - [`ForwardResult`] places the product on another conveyor found in a [`Registry`].
//! - [`ResultChain`] runs several consumers in order.
//!
//! Plain closures `Fn(&ProductBin<K, P>) -> anyhow::Result<()>` are consumers too.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;

use crate::bins::ProductBin;
use crate::building::Builder;
use crate::carts::{Cart, CartKey, CartLabel, Outcome};
use crate::core::Registry;

/// Property set on forwarded carts; its value is the source conveyor name.
pub const FORWARDED: &str = "FORWARDED";

/// Receives finished products.
pub trait ResultConsumer<K, P>: Send + Sync + 'static {
    fn accept(&self, bin: &ProductBin<K, P>) -> anyhow::Result<()>;
}

impl<K, P, F> ResultConsumer<K, P> for F
where
    F: Fn(&ProductBin<K, P>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn accept(&self, bin: &ProductBin<K, P>) -> anyhow::Result<()> {
        self(bin)
    }
}

/// Consumer that discards everything. Default of a new conveyor.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreResult;

impl<K, P> ResultConsumer<K, P> for IgnoreResult {
    fn accept(&self, _bin: &ProductBin<K, P>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Unbounded FIFO of delivered bins. Clones share the same queue.
pub struct ResultQueue<K, P> {
    inner: Arc<Mutex<VecDeque<ProductBin<K, P>>>>,
}

impl<K, P> ResultQueue<K, P> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Removes and returns the oldest bin.
    pub fn poll(&self) -> Option<ProductBin<K, P>> {
        self.inner.lock().pop_front()
    }

    /// Removes and returns all bins, oldest first.
    pub fn drain(&self) -> Vec<ProductBin<K, P>> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<K, P> Default for ResultQueue<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> Clone for ResultQueue<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, P> ResultConsumer<K, P> for ResultQueue<K, P>
where
    K: Clone + Send + 'static,
    P: Clone + Send + 'static,
{
    fn accept(&self, bin: &ProductBin<K, P>) -> anyhow::Result<()> {
        self.inner.lock().push_back(bin.clone());
        Ok(())
    }
}

/// Keeps the most recently delivered bin. Clones share the same slot.
pub struct LastResultReference<K, P> {
    inner: Arc<Mutex<Option<ProductBin<K, P>>>>,
}

impl<K, P> LastResultReference<K, P> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn get(&self) -> Option<ProductBin<K, P>>
    where
        K: Clone,
        P: Clone,
    {
        self.inner.lock().clone()
    }

    pub fn product(&self) -> Option<P>
    where
        P: Clone,
    {
        self.inner.lock().as_ref().map(|bin| bin.product.clone())
    }
}

impl<K, P> Default for LastResultReference<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> Clone for LastResultReference<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, P> ResultConsumer<K, P> for LastResultReference<K, P>
where
    K: Clone + Send + 'static,
    P: Clone + Send + 'static,
{
    fn accept(&self, bin: &ProductBin<K, P>) -> anyhow::Result<()> {
        *self.inner.lock() = Some(bin.clone());
        Ok(())
    }
}

/// Writes every bin at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogResult;

impl<K: Debug, P: Debug> ResultConsumer<K, P> for LogResult {
    fn accept(&self, bin: &ProductBin<K, P>) -> anyhow::Result<()> {
        tracing::info!(
            key = ?bin.key,
            status = %bin.status,
            remaining = ?bin.remaining,
            product = ?bin.product,
            "product ready"
        );
        Ok(())
    }
}

/// Runs consumers in order; stops at the first error.
pub struct ResultChain<K, P> {
    consumers: Vec<Arc<dyn ResultConsumer<K, P>>>,
}

impl<K, P> ResultChain<K, P> {
    pub fn new() -> Self {
        Self {
            consumers: Vec::new(),
        }
    }

    pub fn then(mut self, consumer: impl ResultConsumer<K, P>) -> Self {
        self.consumers.push(Arc::new(consumer));
        self
    }
}

impl<K, P> Default for ResultChain<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: 'static, P: 'static> ResultConsumer<K, P> for ResultChain<K, P> {
    fn accept(&self, bin: &ProductBin<K, P>) -> anyhow::Result<()> {
        for consumer in &self.consumers {
            consumer.accept(bin)?;
        }
        Ok(())
    }
}

/// Places each product as a cart on another conveyor looked up by name.
///
/// The forwarded cart:
/// - has key `key_transform(bin.key)` and the configured label
/// - expires after `bin.remaining` (never when `None` or zero)
/// - carries the [`FORWARDED`] property with the source name
///
/// The target is resolved on every delivery, so it may register later than the source.
/// A missing target or a rejected placement fails the delivery.
pub struct ForwardResult<K, P, K2, L2, B2> {
    registry: Registry,
    source: String,
    target: String,
    label: L2,
    key_transform: Arc<dyn Fn(&K) -> K2 + Send + Sync>,
    _types: PhantomData<fn() -> (P, B2)>,
}

impl<K, P, L2, B2> ForwardResult<K, P, K, L2, B2>
where
    K: Clone + 'static,
{
    /// Forwards under the same key.
    pub fn new(
        registry: Registry,
        source: impl Into<String>,
        target: impl Into<String>,
        label: L2,
    ) -> Self {
        Self {
            registry,
            source: source.into(),
            target: target.into(),
            label,
            key_transform: Arc::new(|k: &K| k.clone()),
            _types: PhantomData,
        }
    }
}

impl<K, P, K2, L2, B2> ForwardResult<K, P, K2, L2, B2> {
    /// Replaces the key mapping.
    pub fn with_key_transform<K3, F>(self, f: F) -> ForwardResult<K, P, K3, L2, B2>
    where
        F: Fn(&K) -> K3 + Send + Sync + 'static,
    {
        ForwardResult {
            registry: self.registry,
            source: self.source,
            target: self.target,
            label: self.label,
            key_transform: Arc::new(f),
            _types: PhantomData,
        }
    }
}

impl<K, P, K2, L2, B2> ResultConsumer<K, P> for ForwardResult<K, P, K2, L2, B2>
where
    K: Send + Sync + 'static,
    P: Clone + Debug + Send + Sync + 'static,
    K2: CartKey,
    L2: CartLabel,
    B2: Builder<K2, L2, P>,
{
    fn accept(&self, bin: &ProductBin<K, P>) -> anyhow::Result<()> {
        let target = self
            .registry
            .conveyor::<K2, L2, P, B2>(&self.target)
            .ok_or_else(|| anyhow!("forward target {:?} is not registered", self.target))?;

        let key = (self.key_transform)(&bin.key);
        let mut cart = Cart::new(key, self.label.clone(), bin.product.clone())
            .with_property(FORWARDED, self.source.as_str());
        // Timeout-forced products have no time left; they are forwarded without a deadline.
        if let Some(remaining) = bin.remaining.filter(|r| !r.is_zero()) {
            cart = cart.with_ttl(remaining);
        }
        // Placement rejections resolve the handle immediately.
        match target.place(cart).try_outcome() {
            Ok(Outcome::Rejected(err)) => Err(anyhow!(
                "forward target {:?} rejected the product: {err}",
                self.target
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SiteStatus;
    use std::collections::HashMap;

    fn bin(key: u32, product: &'static str) -> ProductBin<u32, &'static str> {
        ProductBin {
            key,
            product,
            remaining: None,
            status: SiteStatus::Ready,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn test_queue_is_fifo_and_shared() {
        let queue = ResultQueue::new();
        let sink = queue.clone();
        sink.accept(&bin(1, "a")).unwrap();
        sink.accept(&bin(2, "b")).unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.poll().map(|b| b.key), Some(1));
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_last_reference_overwrites() {
        let last = LastResultReference::new();
        last.accept(&bin(1, "a")).unwrap();
        last.accept(&bin(2, "b")).unwrap();
        assert_eq!(last.product(), Some("b"));
        assert_eq!(last.get().map(|b| b.key), Some(2));
    }

    #[test]
    fn test_chain_stops_on_error() {
        let queue = ResultQueue::new();
        let chain = ResultChain::new()
            .then(|_: &ProductBin<u32, &'static str>| -> anyhow::Result<()> {
                Err(anyhow!("nope"))
            })
            .then(queue.clone());
        assert!(chain.accept(&bin(1, "a")).is_err());
        assert!(queue.is_empty());
    }
}
