//! Runtime core: the conveyor engine and its lifecycle.
//!
//! The public API from this module is [`AssemblingConveyor`], built with
//! [`ConveyorBuilder`] from a [`ConveyorConfig`].
//!
//! Internal modules:
//! - [`worker`]: the single writer; owns the collector and the expiration index;
//! - [`site`]: one in-flight build (builder, accumulated state, status, waiters);
//! - [`delay`]: bucketed expiration index;
//! - [`settings`]: live hooks and knobs shared by the handle and the worker;
//! - [`validate`]: placement checks;
//! - [`guard`]: isolates user code failures and panics;
//! - [`registry`]: name → conveyor directory.

mod builder;
mod config;
mod conveyor;
mod delay;
mod guard;
mod registry;
mod settings;
mod site;
mod status;
mod validate;
mod worker;

pub use builder::ConveyorBuilder;
pub use config::ConveyorConfig;
pub use conveyor::AssemblingConveyor;
pub use registry::Registry;
pub use site::ProductSupplier;
pub use status::SiteStatus;
pub use validate::CartValidator;

pub(crate) use guard::panic_message;
