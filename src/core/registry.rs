//! # Conveyor registry: name → instance.
//!
//! An explicit, injectable directory of running conveyors. A conveyor built with
//! [`ConveyorBuilder::with_registry`](crate::ConveyorBuilder::with_registry) is
//! registered under its name when its worker starts and unregistered when the
//! worker exits. [`ForwardResult`](crate::ForwardResult) resolves targets here.
//!
//! ## Rules
//! - Names are unique; registering a taken name fails with `RuntimeError::NameTaken`.
//! - Entries are type-erased; `get::<T>` returns `None` when the type does not match.
//! - Clones share the same map.
//! - Conveyors are held weakly: once every handle is dropped the worker exits
//!   and removes its entry; until then [`Registry::conveyor`] returns `None`.
//!
//! ```rust
//! use std::sync::Arc;
//! use conveyor::Registry;
//!
//! let registry = Registry::new();
//! registry.register("answer", Arc::new(42u32)).unwrap();
//!
//! assert_eq!(registry.get::<u32>("answer").as_deref(), Some(&42));
//! assert!(registry.get::<String>("answer").is_none());
//! assert!(registry.register("answer", Arc::new(0u32)).is_err());
//! ```

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::building::Builder;
use crate::carts::{CartKey, CartLabel, CartValue};
use crate::core::AssemblingConveyor;
use crate::core::conveyor::Registered;
use crate::error::RuntimeError;

type Instance = Arc<dyn Any + Send + Sync>;

/// Concurrent name → instance map.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<DashMap<String, Instance>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under `name`.
    pub fn register<T>(&self, name: impl Into<String>, value: Arc<T>) -> Result<(), RuntimeError>
    where
        T: Any + Send + Sync,
    {
        match self.entries.entry(name.into()) {
            Entry::Occupied(o) => Err(RuntimeError::NameTaken {
                name: o.key().clone(),
            }),
            Entry::Vacant(v) => {
                v.insert(value);
                Ok(())
            }
        }
    }

    /// Removes `name`. Returns `true` if it was present.
    pub fn unregister(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Returns the instance registered under `name` if it has type `T`.
    pub fn get<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let entry = self.entries.get(name)?.value().clone();
        entry.downcast::<T>().ok()
    }

    /// Returns a handle to the conveyor registered under `name`.
    ///
    /// `None` if the name is unknown, the types differ, or the conveyor has no
    /// live handle left.
    pub fn conveyor<K, L, V, B>(&self, name: &str) -> Option<AssemblingConveyor<K, L, V, B>>
    where
        K: CartKey,
        L: CartLabel,
        V: CartValue,
        B: Builder<K, L, V>,
    {
        self.get::<Registered<K, L, V, B>>(name)?.upgrade()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns sorted list of registered names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}
