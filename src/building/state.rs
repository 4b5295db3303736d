//! Read-only view of a building site handed to readiness evaluators.

use std::collections::HashMap;
use std::hash::Hash;

use tokio::time::Instant;

use crate::carts::Cart;

/// Snapshot of one in-flight build.
///
/// Borrowed from the site for the duration of a readiness check.
#[derive(Debug)]
pub struct State<'a, K, L, V> {
    pub key: &'a K,
    pub created: Instant,
    pub expires: Option<Instant>,
    /// Number of carts accepted so far.
    pub accept_count: usize,
    /// Accepted carts per label.
    pub histogram: &'a HashMap<L, usize>,
    /// Accepted carts, only populated when `keep_carts_on_site` is set.
    pub carts: &'a [Cart<K, L, V>],
}

impl<K, L, V> State<'_, K, L, V>
where
    L: Eq + Hash,
{
    /// Number of accepted carts with `label`.
    pub fn count(&self, label: &L) -> usize {
        self.histogram.get(label).copied().unwrap_or(0)
    }

    /// Returns `true` if at least one cart with `label` was accepted.
    pub fn has(&self, label: &L) -> bool {
        self.count(label) > 0
    }

    /// Returns `true` if every label in `labels` was accepted at least once.
    pub fn has_all<'l>(&self, labels: impl IntoIterator<Item = &'l L>) -> bool
    where
        L: 'l,
    {
        labels.into_iter().all(|l| self.has(l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_label() {
        let mut histogram = HashMap::new();
        histogram.insert("first", 2);
        histogram.insert("last", 1);
        let state: State<'_, u8, &str, ()> = State {
            key: &1,
            created: Instant::now(),
            expires: None,
            accept_count: 3,
            histogram: &histogram,
            carts: &[],
        };
        assert_eq!(state.count(&"first"), 2);
        assert_eq!(state.count(&"year"), 0);
        assert!(state.has_all(&["first", "last"]));
        assert!(!state.has_all(&["first", "year"]));
    }
}
