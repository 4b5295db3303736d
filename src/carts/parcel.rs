use tokio::time::Instant;

use crate::bins::Scrap;
use crate::building::{Builder, BuilderSupplier};
use crate::carts::{Ack, Cart, Waiter};

/// What a queued parcel asks the worker to do.
pub(crate) enum Load<K, L, V, B: Builder<K, L, V>> {
    /// Feed one part into a build (or into every matching build for multi-key carts).
    Part(Cart<K, L, V>),
    /// Create a build, optionally with its own supplier and a product waiter.
    Create {
        key: K,
        supplier: Option<BuilderSupplier<B>>,
        created: Instant,
        expires: Option<Instant>,
        waiter: Option<Waiter<B::Product>>,
    },
    /// Register interest in the product of a key.
    Future {
        key: K,
        created: Instant,
        waiter: Waiter<B::Product>,
    },
}

/// Unit of the cart queue: a load plus its completion handle.
pub(crate) struct Parcel<K, L, V, B: Builder<K, L, V>> {
    pub(crate) load: Load<K, L, V, B>,
    pub(crate) ack: Ack,
}

impl<K, L, V, B: Builder<K, L, V>> Load<K, L, V, B> {
    pub(crate) fn key(&self) -> Option<&K> {
        match self {
            Load::Part(cart) => cart.key(),
            Load::Create { key, .. } | Load::Future { key, .. } => Some(key),
        }
    }

    pub(crate) fn created(&self) -> Instant {
        match self {
            Load::Part(cart) => cart.created(),
            Load::Create { created, .. } | Load::Future { created, .. } => *created,
        }
    }

    pub(crate) fn expires(&self) -> Option<Instant> {
        match self {
            Load::Part(cart) => cart.expires(),
            Load::Create { expires, .. } => *expires,
            Load::Future { .. } => None,
        }
    }

    /// Drops any waiter and returns the object to report as scrap.
    pub(crate) fn into_scrap(self) -> Scrap<K, L, V> {
        match self {
            Load::Part(cart) => Scrap::Cart(cart),
            Load::Create { key, .. } => Scrap::Request {
                key,
                kind: "create",
            },
            Load::Future { key, .. } => Scrap::Request {
                key,
                kind: "future",
            },
        }
    }
}
