//! # Label dispatch and user hooks.
//!
//! A cart value reaches its builder through one of two paths:
//! 1. the handler registered for the cart label in a [`LabelTable`] ("smart label");
//! 2. otherwise, the conveyor's default [`Dispatcher`].
//!
//! An embedded handler always wins over the default dispatcher.
//!
//! ```rust
//! use conveyor::LabelTable;
//!
//! #[derive(Default)]
//! struct Person { first: String, year: u32 }
//!
//! #[derive(Clone, Debug, PartialEq, Eq, Hash)]
//! enum Field { First, Year }
//!
//! let table = LabelTable::<Field, String, Person>::new()
//!     .on(Field::First, |p, v| { p.first = v; Ok(()) })
//!     .on(Field::Year, |p, v| { p.year = v.parse()?; Ok(()) });
//!
//! assert!(table.contains(&Field::Year));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use super::state::State;

/// Zero-argument factory producing a fresh builder per key.
pub type BuilderSupplier<B> = Arc<dyn Fn() -> B + Send + Sync>;

/// Default dispatch function `(label, value, builder)`.
pub type Dispatcher<L, V, B> = Arc<dyn Fn(&L, V, &mut B) -> anyhow::Result<()> + Send + Sync>;

/// Handler embedded in a label.
pub type LabelHandler<V, B> = Arc<dyn Fn(&mut B, V) -> anyhow::Result<()> + Send + Sync>;

/// External readiness evaluator `(state, builder)`.
pub type ReadinessFn<K, L, V, B> = Arc<dyn Fn(&State<'_, K, L, V>, &B) -> bool + Send + Sync>;

/// Engine-level timeout action. May mutate the builder to force readiness.
pub type TimeoutAction<B> = Arc<dyn Fn(&mut B) -> anyhow::Result<()> + Send + Sync>;

/// Hook run before a key leaves the collector.
pub type EvictionHook<K> = Arc<dyn Fn(&K) -> anyhow::Result<()> + Send + Sync>;

/// Lookup table from label to embedded handler.
pub struct LabelTable<L, V, B> {
    handlers: HashMap<L, LabelHandler<V, B>>,
}

impl<L, V, B> LabelTable<L, V, B>
where
    L: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `label`, replacing any previous one.
    pub fn on<F>(mut self, label: L, handler: F) -> Self
    where
        F: Fn(&mut B, V) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(label, handler);
        self
    }

    pub fn insert<F>(&mut self, label: L, handler: F)
    where
        F: Fn(&mut B, V) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(label, Arc::new(handler));
    }

    pub fn get(&self, label: &L) -> Option<&LabelHandler<V, B>> {
        self.handlers.get(label)
    }

    pub fn contains(&self, label: &L) -> bool {
        self.handlers.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<L, V, B> Default for LabelTable<L, V, B>
where
    L: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<L, V, B> Clone for LabelTable<L, V, B>
where
    L: Clone,
{
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<L: fmt::Debug, V, B> fmt::Debug for LabelTable<L, V, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
