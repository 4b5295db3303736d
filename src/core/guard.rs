//! Panic isolation for user code running on the worker.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::ConveyorError;

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `f`, turning a panic into [`ConveyorError::Panicked`].
pub(crate) fn guarded<R>(f: impl FnOnce() -> Result<R, ConveyorError>) -> Result<R, ConveyorError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(ConveyorError::Panicked {
            info: panic_message(payload.as_ref()),
        }),
    }
}
