//! Error types used by the conveyor runtime and its building sites.
//!
//! This module defines three types:
//!
//! - [`RuntimeError`]: errors raised by the engine itself (worker defects, registry conflicts).
//! - [`ConveyorError`]: errors attached to a single unit of work (a cart, a command or a build).
//! - [`FailureType`]: the stage at which a unit of work was discarded.
//!
//! Every type provides `as_label` for logs/metrics; errors additionally provide `as_message`.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the conveyor runtime.
///
/// These represent failures of the engine as a whole rather than of one build.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The worker loop died from a defect that escaped its own isolation.
    #[error("conveyor worker panicked: {info}")]
    WorkerPanicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// A conveyor with the same name is already present in the registry.
    #[error("name {name:?} is already registered")]
    NameTaken {
        /// The conflicting name.
        name: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use conveyor::RuntimeError;
    ///
    /// let err = RuntimeError::NameTaken { name: "orders".into() };
    /// assert_eq!(err.as_label(), "runtime_name_taken");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::WorkerPanicked { .. } => "runtime_worker_panicked",
            RuntimeError::NameTaken { .. } => "runtime_name_taken",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::WorkerPanicked { info } => format!("worker panicked: {info}"),
            RuntimeError::NameTaken { name } => format!("name taken: {name}"),
        }
    }
}

/// # Errors attached to a single cart, command or build.
///
/// Causes carried by [`Outcome::Rejected`](crate::Outcome::Rejected),
/// [`Outcome::Failed`](crate::Outcome::Failed) and [`ScrapBin::error`](crate::ScrapBin).
/// Errors returned by user callbacks are rendered into the `error` fields.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConveyorError {
    /// The conveyor is stopped or completing and no longer accepts work.
    #[error("conveyor is not running")]
    NotRunning,

    /// The cart or command expired before it could be processed.
    #[error("expired {overdue:?} ago")]
    CartExpired {
        /// How long ago the expiration passed.
        overdue: Duration,
    },

    /// The cart or command is older than the configured maximum age.
    #[error("too old: age {age:?} exceeds {max:?}")]
    CartTooOld {
        /// Age of the cart at validation time.
        age: Duration,
        /// Configured limit.
        max: Duration,
    },

    /// The cart label is not in the accepted set.
    #[error("label {label} is not accepted")]
    LabelRejected {
        /// Debug rendering of the label.
        label: String,
    },

    /// A user validator refused the cart.
    #[error("validation failed: {error}")]
    Validation {
        /// Validator message.
        error: String,
    },

    /// Neither the cart nor the conveyor provides a builder supplier.
    #[error("no builder supplier available")]
    MissingBuilderSupplier,

    /// The label carries no handler and no default dispatcher is set.
    #[error("no dispatcher for label {label}")]
    NoDispatcher {
        /// Debug rendering of the label.
        label: String,
    },

    /// The builder does not test itself and no readiness evaluator is set.
    #[error("no readiness evaluator")]
    NoReadiness,

    /// The label handler or default dispatcher returned an error.
    #[error("dispatch of {label} failed: {error}")]
    Dispatch {
        /// Debug rendering of the label.
        label: String,
        /// Handler message.
        error: String,
    },

    /// The builder failed to produce its product.
    #[error("build failed: {error}")]
    Build {
        /// Builder message.
        error: String,
    },

    /// `build` was requested before readiness was established.
    #[error("site is not ready")]
    NotReady,

    /// The result consumer refused the product.
    #[error("result consumer failed: {error}")]
    ResultConsumer {
        /// Consumer message.
        error: String,
    },

    /// A before-eviction hook failed.
    #[error("eviction hook failed: {error}")]
    Eviction {
        /// Hook message.
        error: String,
    },

    /// The timeout action failed.
    #[error("timeout action failed: {error}")]
    TimeoutAction {
        /// Action message.
        error: String,
    },

    /// No in-flight build exists for the key.
    #[error("key {key} not found")]
    KeyNotFound {
        /// Debug rendering of the key.
        key: String,
    },

    /// The site already left the waiting state.
    #[error("site is closed with status {status}")]
    SiteClosed {
        /// Status label at the time of the call.
        status: &'static str,
    },

    /// Partial product reads require `synchronize_builder`.
    #[error("builder is not synchronized")]
    NotSynchronized,

    /// The conveyor stopped before the work was done.
    #[error("conveyor stopped")]
    Stopped,

    /// User code panicked.
    #[error("panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },
}

impl ConveyorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use conveyor::ConveyorError;
    ///
    /// assert_eq!(ConveyorError::NotRunning.as_label(), "cart_not_running");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ConveyorError::NotRunning => "cart_not_running",
            ConveyorError::CartExpired { .. } => "cart_expired",
            ConveyorError::CartTooOld { .. } => "cart_too_old",
            ConveyorError::LabelRejected { .. } => "cart_label_rejected",
            ConveyorError::Validation { .. } => "cart_validation",
            ConveyorError::MissingBuilderSupplier => "site_missing_supplier",
            ConveyorError::NoDispatcher { .. } => "site_no_dispatcher",
            ConveyorError::NoReadiness => "site_no_readiness",
            ConveyorError::Dispatch { .. } => "site_dispatch",
            ConveyorError::Build { .. } => "site_build",
            ConveyorError::NotReady => "site_not_ready",
            ConveyorError::ResultConsumer { .. } => "site_result_consumer",
            ConveyorError::Eviction { .. } => "site_eviction",
            ConveyorError::TimeoutAction { .. } => "site_timeout_action",
            ConveyorError::KeyNotFound { .. } => "site_key_not_found",
            ConveyorError::SiteClosed { .. } => "site_closed",
            ConveyorError::NotSynchronized => "site_not_synchronized",
            ConveyorError::Stopped => "conveyor_stopped",
            ConveyorError::Panicked { .. } => "user_panicked",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }

    /// Indicates whether the error was raised before the work reached the worker.
    ///
    /// # Example
    /// ```
    /// use conveyor::ConveyorError;
    ///
    /// assert!(ConveyorError::NotRunning.is_rejection());
    /// assert!(!ConveyorError::NotReady.is_rejection());
    /// ```
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ConveyorError::NotRunning
                | ConveyorError::CartExpired { .. }
                | ConveyorError::CartTooOld { .. }
                | ConveyorError::LabelRejected { .. }
                | ConveyorError::Validation { .. }
        )
    }
}

/// Stage at which a unit of work was discarded.
///
/// Every [`ScrapBin`](crate::ScrapBin) carries exactly one tag.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureType {
    /// A placement validator refused the cart.
    CartRejected,
    /// A command validator refused the command, or the command failed.
    CommandRejected,
    /// No builder could be created for a new key.
    BuildInitializationFailed,
    /// Dispatching a cart into the builder failed.
    DataRejected,
    /// Readiness evaluation failed.
    ReadyFailed,
    /// A before-eviction hook failed.
    BeforeEvictionFailed,
    /// The builder failed to produce its product.
    BuildFailed,
    /// The result consumer refused the product.
    ResultConsumerFailed,
    /// The timeout action failed.
    OnTimeoutFailed,
    /// The build timed out without becoming ready.
    BuildExpired,
    /// The build was cancelled by command.
    BuildCanceled,
    /// The conveyor stopped while the work was pending.
    ConveyorStopped,
    /// Anything else.
    GeneralFailure,
}

impl FailureType {
    /// Returns a short stable label (SCREAMING_SNAKE_CASE) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use conveyor::FailureType;
    ///
    /// assert_eq!(FailureType::BuildExpired.as_label(), "BUILD_EXPIRED");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureType::CartRejected => "CART_REJECTED",
            FailureType::CommandRejected => "COMMAND_REJECTED",
            FailureType::BuildInitializationFailed => "BUILD_INITIALIZATION_FAILED",
            FailureType::DataRejected => "DATA_REJECTED",
            FailureType::ReadyFailed => "READY_FAILED",
            FailureType::BeforeEvictionFailed => "BEFORE_EVICTION_FAILED",
            FailureType::BuildFailed => "BUILD_FAILED",
            FailureType::ResultConsumerFailed => "RESULT_CONSUMER_FAILED",
            FailureType::OnTimeoutFailed => "ON_TIMEOUT_FAILED",
            FailureType::BuildExpired => "BUILD_EXPIRED",
            FailureType::BuildCanceled => "BUILD_CANCELED",
            FailureType::ConveyorStopped => "CONVEYOR_STOPPED",
            FailureType::GeneralFailure => "GENERAL_FAILURE",
        }
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_classified() {
        let err = ConveyorError::CartTooOld {
            age: Duration::from_secs(5),
            max: Duration::from_secs(1),
        };
        assert!(err.is_rejection());
        assert!(!ConveyorError::Build { error: "x".into() }.is_rejection());
        assert!(!ConveyorError::Stopped.is_rejection());
    }

    #[test]
    fn test_messages_carry_details() {
        let err = ConveyorError::Dispatch {
            label: "First".into(),
            error: "bad name".into(),
        };
        assert_eq!(err.as_message(), "dispatch of First failed: bad name");

        let err = RuntimeError::WorkerPanicked { info: "boom".into() };
        assert_eq!(err.as_message(), "worker panicked: boom");
    }

    #[test]
    fn test_failure_type_display_matches_label() {
        assert_eq!(FailureType::DataRejected.to_string(), "DATA_REJECTED");
        assert_eq!(
            format!("{}", FailureType::ConveyorStopped),
            FailureType::ConveyorStopped.as_label()
        );
    }
}
