//! # ParallelConveyor: key-balanced shards.
//!
//! Composes N independent [`AssemblingConveyor`]s. Every key lives on exactly
//! one shard, chosen by hashing the key, so per-key ordering and the single
//! site per key guarantee carry over unchanged.
//!
//! ```text
//! place(cart{key}) ──► hash(key) % N ──► shard[i].place
//! place(multi-key) ──► every shard   ──► CartHandle::join
//! stop / complete_and_stop ──► every shard
//! ```

use std::hash::{BuildHasher, RandomState};

use futures::future::join_all;

use crate::building::Builder;
use crate::carts::{Cart, CartHandle, CartKey, CartLabel, CartValue, Command, ProductHandle};
use crate::core::AssemblingConveyor;
use crate::error::RuntimeError;

/// Routes carts across several conveyors by key.
pub struct ParallelConveyor<K, L, V, B: Builder<K, L, V>> {
    shards: Vec<AssemblingConveyor<K, L, V, B>>,
    hasher: RandomState,
}

impl<K, L, V, B> ParallelConveyor<K, L, V, B>
where
    K: CartKey,
    L: CartLabel,
    V: CartValue,
    B: Builder<K, L, V>,
{
    /// Wraps already built shards.
    ///
    /// # Panics
    /// Panics if `shards` is empty.
    pub fn new(shards: Vec<AssemblingConveyor<K, L, V, B>>) -> Self {
        assert!(!shards.is_empty(), "parallel conveyor needs at least one shard");
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    /// Builds `n` shards with `make(index)`; stops the ones already built on failure.
    pub fn build<F>(n: usize, mut make: F) -> Result<Self, RuntimeError>
    where
        F: FnMut(usize) -> Result<AssemblingConveyor<K, L, V, B>, RuntimeError>,
    {
        let mut shards = Vec::with_capacity(n.max(1));
        for i in 0..n.max(1) {
            match make(i) {
                Ok(shard) => shards.push(shard),
                Err(err) => {
                    shards.iter().for_each(AssemblingConveyor::stop);
                    return Err(err);
                }
            }
        }
        Ok(Self::new(shards))
    }

    pub fn shards(&self) -> &[AssemblingConveyor<K, L, V, B>] {
        &self.shards
    }

    /// Shard owning `key`.
    pub fn shard(&self, key: &K) -> &AssemblingConveyor<K, L, V, B> {
        let idx = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    pub fn place(&self, cart: Cart<K, L, V>) -> CartHandle {
        match cart.key() {
            Some(key) => self.shard(key).place(cart),
            None => CartHandle::join(
                self.shards
                    .iter()
                    .map(|shard| shard.place(cart.clone()))
                    .collect(),
            ),
        }
    }

    pub fn add_command(&self, command: Command<K>) -> CartHandle {
        self.shard(command.key()).add_command(command)
    }

    pub fn create_build(&self, key: K) -> CartHandle {
        self.shard(&key).create_build(key)
    }

    pub fn create_build_future(&self, key: K) -> ProductHandle<B::Product> {
        self.shard(&key).create_build_future(key)
    }

    pub fn future(&self, key: K) -> ProductHandle<B::Product> {
        self.shard(&key).future(key)
    }

    pub fn is_running(&self) -> bool {
        self.shards.iter().any(AssemblingConveyor::is_running)
    }

    pub fn collector_size(&self) -> usize {
        self.shards.iter().map(AssemblingConveyor::collector_size).sum()
    }

    pub fn input_queue_size(&self) -> usize {
        self.shards.iter().map(AssemblingConveyor::input_queue_size).sum()
    }

    pub fn delayed_size(&self) -> usize {
        self.shards.iter().map(AssemblingConveyor::delayed_size).sum()
    }

    pub fn stop(&self) {
        self.shards.iter().for_each(AssemblingConveyor::stop);
    }

    /// Completes every shard; returns the first error.
    pub async fn complete_and_stop(&self) -> Result<(), RuntimeError> {
        join_all(self.shards.iter().map(AssemblingConveyor::complete_and_stop))
            .await
            .into_iter()
            .collect()
    }
}
