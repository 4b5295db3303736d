//! Ready-made builders.

mod collection;

pub use collection::{CollectionBuilder, CollectionLabel};
