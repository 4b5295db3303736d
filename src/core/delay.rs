//! # Expiration index for in-flight builds.
//!
//! [`DelayIndex`] maps absolute expiration instants to the keys expiring then.
//! Instants are grouped into buckets of a fixed resolution so the sweep touches
//! a bucket per resolution step instead of every key.
//!
//! ## Rules
//! - Instants are rounded **up** to the bucket boundary: a key never pops before its deadline.
//! - A key lives in at most one bucket; `insert` moves it and leaves no stale entry.
//! - Keys without an expiration are never inserted.
//!
//! ```text
//! insert(k, t) ──► bucket = ceil((t - epoch) / resolution)
//!                     ├─ buckets[bucket] += k
//!                     └─ index[k] = bucket   (previous bucket cleaned up)
//!
//! pop_expired(now) ──► every bucket <= floor((now - epoch) / resolution)
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Bucketed index from expiration instant to keys.
#[derive(Debug)]
pub(crate) struct DelayIndex<K> {
    epoch: Instant,
    resolution: Duration,
    buckets: BTreeMap<u64, HashSet<K>>,
    index: HashMap<K, u64>,
}

impl<K> DelayIndex<K>
where
    K: Clone + Eq + Hash,
{
    /// Creates an empty index. Resolution is clamped to at least 1 microsecond.
    pub(crate) fn new(resolution: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            resolution: resolution.max(Duration::from_micros(1)),
            buckets: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    fn bucket_ceil(&self, at: Instant) -> u64 {
        let nanos = at.saturating_duration_since(self.epoch).as_nanos();
        let res = self.resolution.as_nanos();
        nanos.div_ceil(res).min(u128::from(u64::MAX)) as u64
    }

    fn bucket_floor(&self, at: Instant) -> u64 {
        let nanos = at.saturating_duration_since(self.epoch).as_nanos();
        let res = self.resolution.as_nanos();
        (nanos / res).min(u128::from(u64::MAX)) as u64
    }

    /// Schedules `key` to expire at `at`, replacing any earlier schedule.
    pub(crate) fn insert(&mut self, key: K, at: Instant) {
        let bucket = self.bucket_ceil(at);
        if let Some(old) = self.index.insert(key.clone(), bucket) {
            if old == bucket {
                return;
            }
            self.detach(&key, old);
        }
        self.buckets.entry(bucket).or_default().insert(key);
    }

    /// Removes `key` from the index. Returns `true` if it was scheduled.
    pub(crate) fn remove(&mut self, key: &K) -> bool {
        match self.index.remove(key) {
            Some(bucket) => {
                self.detach(key, bucket);
                true
            }
            None => false,
        }
    }

    fn detach(&mut self, key: &K, bucket: u64) {
        if let Some(keys) = self.buckets.get_mut(&bucket) {
            keys.remove(key);
            if keys.is_empty() {
                self.buckets.remove(&bucket);
            }
        }
    }

    /// Removes and returns every key whose bucket is at or before `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<K> {
        let limit = self.bucket_floor(now);
        let Some(first) = self.buckets.keys().next().copied() else {
            return Vec::new();
        };
        if first > limit {
            return Vec::new();
        }

        let later = match limit.checked_add(1) {
            Some(next) => self.buckets.split_off(&next),
            None => BTreeMap::new(),
        };
        let expired = std::mem::replace(&mut self.buckets, later);

        let mut keys = Vec::new();
        for (_, set) in expired {
            for key in set {
                self.index.remove(&key);
                keys.push(key);
            }
        }
        keys
    }

    /// Returns the bucket boundary of the earliest scheduled key.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let bucket = *self.buckets.keys().next()?;
        let nanos = u128::from(bucket) * self.resolution.as_nanos();
        let offset = Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64);
        self.epoch.checked_add(offset)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
        self.index.clear();
    }
}
