//! Builder contract: the user side of a build.
//!
//! ## Contents
//! - [`Builder`], [`Capabilities`] per-key accumulator and its optional behavior
//! - [`State`] read-only site snapshot for readiness evaluation
//! - [`LabelTable`] and hook aliases ([`Dispatcher`], [`ReadinessFn`], ...)

mod builder;
mod labels;
mod state;

pub use builder::{Builder, Capabilities};
pub use labels::{
    BuilderSupplier, Dispatcher, EvictionHook, LabelHandler, LabelTable, ReadinessFn,
    TimeoutAction,
};
pub use state::State;
