//! Producer-side units of work.
//!
//! ## Contents
//! - [`Cart`] immutable partial update (key, label, value, timestamps, properties)
//! - [`Command`] management instruction against one key
//! - [`CartHandle`], [`ProductHandle`] completion handles
//! - [`CartKey`], [`CartLabel`], [`CartValue`] bounds shared by the whole runtime
//!
//! Internally every placed unit becomes a [`Parcel`] on the worker queue.

mod cart;
mod command;
mod handle;
mod parcel;

use std::fmt::Debug;
use std::hash::Hash;

pub use cart::{Cart, KeyFilter};
pub use command::{Command, CommandKind};
pub use handle::{CartHandle, Outcome, ProductError, ProductHandle};

pub(crate) use handle::{Ack, Waiter};
pub(crate) use parcel::{Load, Parcel};

/// Bounds for build keys.
pub trait CartKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T> CartKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bounds for labels.
pub trait CartLabel: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T> CartLabel for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bounds for cart values.
pub trait CartValue: Clone + Debug + Send + Sync + 'static {}
impl<T> CartValue for T where T: Clone + Debug + Send + Sync + 'static {}
