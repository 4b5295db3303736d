//! # Carts: immutable partial updates.
//!
//! A [`Cart`] carries one labeled value for one key. Carts are built by producers,
//! placed on a conveyor and consumed by the worker exactly once.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use conveyor::Cart;
//!
//! let cart = Cart::new(7u32, "first", "Ada".to_string())
//!     .with_ttl(Duration::from_secs(1))
//!     .with_property("source", "crm");
//!
//! assert_eq!(cart.key(), Some(&7));
//! assert_eq!(cart.property("source"), Some("crm"));
//! assert!(cart.expires().is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Predicate selecting the in-flight keys a multi-key cart applies to.
#[derive(Clone)]
pub struct KeyFilter<K>(Arc<dyn Fn(&K) -> bool + Send + Sync>);

impl<K> KeyFilter<K> {
    /// Wraps a predicate.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&K) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Matches every key.
    pub fn all() -> Self {
        Self(Arc::new(|_| true))
    }

    /// Returns `true` if `key` is selected.
    #[inline]
    pub fn matches(&self, key: &K) -> bool {
        (self.0)(key)
    }
}

impl<K> fmt::Debug for KeyFilter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyFilter")
    }
}

/// Immutable partial update for one key.
///
/// - `key`: groups updates into one build; absent only for multi-key carts
/// - `label`: semantic meaning of `value`, drives dispatch into the builder
/// - `expires`: absolute expiration (`None` = never)
/// - `priority`: carried as metadata, the queue itself is FIFO
#[derive(Clone, Debug)]
pub struct Cart<K, L, V> {
    key: Option<K>,
    label: L,
    value: V,
    created: Instant,
    expires: Option<Instant>,
    priority: i64,
    properties: HashMap<String, String>,
    filter: Option<KeyFilter<K>>,
}

impl<K, L, V> Cart<K, L, V> {
    /// Creates a cart for `key` that never expires.
    pub fn new(key: K, label: L, value: V) -> Self {
        Self {
            key: Some(key),
            label,
            value,
            created: Instant::now(),
            expires: None,
            priority: 0,
            properties: HashMap::new(),
            filter: None,
        }
    }

    /// Creates a cart applied to every in-flight key selected by `filter`.
    ///
    /// Multi-key carts never create new builds.
    pub fn multi_key(filter: KeyFilter<K>, label: L, value: V) -> Self {
        Self {
            key: None,
            label,
            value,
            created: Instant::now(),
            expires: None,
            priority: 0,
            properties: HashMap::new(),
            filter: Some(filter),
        }
    }

    /// Sets an absolute expiration.
    #[inline]
    pub fn with_expiration(mut self, at: Instant) -> Self {
        self.expires = Some(at);
        self
    }

    /// Sets the expiration relative to the creation time.
    #[inline]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires = Some(self.created + ttl);
        self
    }

    /// Overrides the creation time (replayed or forwarded data).
    #[inline]
    pub fn with_created(mut self, at: Instant) -> Self {
        self.created = at;
        self
    }

    /// Sets the priority metadata.
    #[inline]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches a property.
    #[inline]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    pub fn label(&self) -> &L {
        &self.label
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn expires(&self) -> Option<Instant> {
        self.expires
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Returns the key filter of a multi-key cart.
    pub fn filter(&self) -> Option<&KeyFilter<K>> {
        self.filter.as_ref()
    }

    /// Returns `true` if the expiration is at or before `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    /// Splits the cart into its label and value.
    pub fn into_parts(self) -> (L, V) {
        (self.label, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_is_relative_to_creation() {
        let cart = Cart::new("k", 'a', 1).with_ttl(Duration::from_millis(100));
        let created = cart.created();
        assert_eq!(cart.expires(), Some(created + Duration::from_millis(100)));
        assert!(!cart.is_expired_at(created + Duration::from_millis(99)));
        assert!(cart.is_expired_at(created + Duration::from_millis(100)));
    }

    #[test]
    fn test_cart_without_expiration_never_expires() {
        let cart = Cart::new(1, "x", ()).with_priority(5);
        assert!(!cart.is_expired_at(Instant::now() + Duration::from_secs(3600)));
        assert_eq!(cart.priority(), 5);
    }

    #[test]
    fn test_multi_key_cart_has_no_key() {
        let cart = Cart::multi_key(KeyFilter::new(|k: &u32| k % 2 == 0), "tag", 3);
        assert!(cart.key().is_none());
        let filter = cart.filter().unwrap();
        assert!(filter.matches(&4));
        assert!(!filter.matches(&5));
        assert_eq!(cart.into_parts(), ("tag", 3));
    }
}
