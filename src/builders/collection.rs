//! # CollectionBuilder: gathers items until told to stop.
//!
//! Values are `Option<T>`: an `Item` cart appends its value, a `Complete` cart
//! appends its value (if any) and marks the collection ready. Optionally, an
//! expiring collection completes with what it has instead of being scrapped.
//!
//! ```rust
//! use conveyor::{Builder, CollectionBuilder, CollectionLabel};
//!
//! let labels = CollectionBuilder::<u8>::labels();
//! let mut b = CollectionBuilder::new();
//! (labels.get(&CollectionLabel::Item).unwrap())(&mut b, Some(1)).unwrap();
//! (labels.get(&CollectionLabel::Complete).unwrap())(&mut b, None).unwrap();
//!
//! assert!(<CollectionBuilder<u8> as Builder<u32, _, _>>::test(&b));
//! assert_eq!(<CollectionBuilder<u8> as Builder<u32, _, _>>::build(&mut b).unwrap(), vec![1]);
//! ```

use std::fmt::Debug;

use crate::building::{Builder, Capabilities, LabelTable};

/// Labels understood by [`CollectionBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionLabel {
    Item,
    Complete,
}

/// Collects `T` values into a `Vec<T>`.
#[derive(Debug, Clone)]
pub struct CollectionBuilder<T> {
    items: Vec<T>,
    complete: bool,
    complete_on_timeout: bool,
}

impl<T> Default for CollectionBuilder<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            complete: false,
            complete_on_timeout: false,
        }
    }
}

impl<T> CollectionBuilder<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes with the items gathered so far when the build expires.
    pub fn complete_on_timeout(mut self) -> Self {
        self.complete_on_timeout = true;
        self
    }

    pub fn add(&mut self, item: Option<T>) {
        self.items.extend(item);
    }

    pub fn complete(&mut self, item: Option<T>) {
        self.add(item);
        self.complete = true;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Smart labels for both collection labels.
    pub fn labels() -> LabelTable<CollectionLabel, Option<T>, Self> {
        LabelTable::new()
            .on(CollectionLabel::Item, |b: &mut Self, v| {
                b.add(v);
                Ok(())
            })
            .on(CollectionLabel::Complete, |b: &mut Self, v| {
                b.complete(v);
                Ok(())
            })
    }
}

impl<K, T> Builder<K, CollectionLabel, Option<T>> for CollectionBuilder<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    type Product = Vec<T>;

    fn build(&mut self) -> anyhow::Result<Vec<T>> {
        Ok(std::mem::take(&mut self.items))
    }

    fn capabilities(&self) -> Capabilities {
        let caps = Capabilities::NONE.with_self_test();
        if self.complete_on_timeout {
            caps.with_timeout()
        } else {
            caps
        }
    }

    fn test(&self) -> bool {
        self.complete
    }

    fn on_timeout(&mut self) -> anyhow::Result<()> {
        self.complete = true;
        Ok(())
    }
}
