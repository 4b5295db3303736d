//! # Scrap consumers.
//!
//! Every discarded cart, command or build is reported once to the
//! [`ScrapConsumer`]. It is the single place where degraded behavior is visible.
//! Consumer errors are logged and otherwise ignored.
//!
//! Built-ins: [`LogScrap`], [`LastScrapReference`], [`ScrapCollector`].

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bins::ScrapBin;
use crate::error::FailureType;

/// Receives discarded work.
pub trait ScrapConsumer<K, L, V>: Send + Sync + 'static {
    fn accept(&self, bin: &ScrapBin<K, L, V>) -> anyhow::Result<()>;
}

impl<K, L, V, F> ScrapConsumer<K, L, V> for F
where
    F: Fn(&ScrapBin<K, L, V>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn accept(&self, bin: &ScrapBin<K, L, V>) -> anyhow::Result<()> {
        self(bin)
    }
}

/// Writes every bin at `warn` level (`debug` for cancellations and shutdown).
#[derive(Debug, Default, Clone, Copy)]
pub struct LogScrap;

impl<K: Debug, L, V> ScrapConsumer<K, L, V> for LogScrap {
    fn accept(&self, bin: &ScrapBin<K, L, V>) -> anyhow::Result<()> {
        let error = bin.error.as_ref().map(|e| e.as_label());
        match bin.failure_type {
            FailureType::BuildCanceled | FailureType::ConveyorStopped => tracing::debug!(
                key = ?bin.key,
                failure = %bin.failure_type,
                scrap = bin.scrap.as_label(),
                error,
                "{}",
                bin.comment
            ),
            _ => tracing::warn!(
                key = ?bin.key,
                failure = %bin.failure_type,
                scrap = bin.scrap.as_label(),
                error,
                "{}",
                bin.comment
            ),
        }
        Ok(())
    }
}

/// Keeps the most recent scrap bin. Clones share the same slot.
pub struct LastScrapReference<K, L, V> {
    inner: Arc<Mutex<Option<ScrapBin<K, L, V>>>>,
}

impl<K, L, V> LastScrapReference<K, L, V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn get(&self) -> Option<ScrapBin<K, L, V>>
    where
        K: Clone,
        L: Clone,
        V: Clone,
    {
        self.inner.lock().clone()
    }
}

impl<K, L, V> Default for LastScrapReference<K, L, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, L, V> Clone for LastScrapReference<K, L, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, L, V> ScrapConsumer<K, L, V> for LastScrapReference<K, L, V>
where
    K: Clone + Send + 'static,
    L: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn accept(&self, bin: &ScrapBin<K, L, V>) -> anyhow::Result<()> {
        *self.inner.lock() = Some(bin.clone());
        Ok(())
    }
}

/// Collects every scrap bin. Clones share the same storage.
pub struct ScrapCollector<K, L, V> {
    inner: Arc<Mutex<Vec<ScrapBin<K, L, V>>>>,
}

impl<K, L, V> ScrapCollector<K, L, V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn snapshot(&self) -> Vec<ScrapBin<K, L, V>>
    where
        K: Clone,
        L: Clone,
        V: Clone,
    {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Number of collected bins tagged `failure_type`.
    pub fn count(&self, failure_type: FailureType) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|bin| bin.failure_type == failure_type)
            .count()
    }
}

impl<K, L, V> Default for ScrapCollector<K, L, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, L, V> Clone for ScrapCollector<K, L, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, L, V> ScrapConsumer<K, L, V> for ScrapCollector<K, L, V>
where
    K: Clone + Send + 'static,
    L: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn accept(&self, bin: &ScrapBin<K, L, V>) -> anyhow::Result<()> {
        self.inner.lock().push(bin.clone());
        Ok(())
    }
}
