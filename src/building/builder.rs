//! # Product builders.
//!
//! A [`Builder`] accumulates the parts of one key and eventually yields the
//! product. One builder instance is created per key and never shared.
//!
//! Optional behavior is declared explicitly through [`Capabilities`] and read
//! once when the building site is created:
//!
//! | Capability   | Method          | Effect                                                  |
//! |--------------|-----------------|---------------------------------------------------------|
//! | `state_test` | [`Builder::test_state`] | readiness from builder + site state (highest precedence) |
//! | `self_test`  | [`Builder::test`]       | readiness from the builder alone                   |
//! | `timeout`    | [`Builder::on_timeout`] | runs before expiry, may force readiness            |
//! | `expiration` | [`Builder::expiration`] | builder-owned expiration, first in the fallback order |
//!
//! Without a test capability, readiness comes from the conveyor's evaluator.
//!
//! ## Example
//! ```rust
//! use conveyor::{Builder, Capabilities};
//!
//! #[derive(Default)]
//! struct Name { first: Option<String>, last: Option<String> }
//!
//! impl Builder<u32, &'static str, String> for Name {
//!     type Product = String;
//!
//!     fn build(&mut self) -> anyhow::Result<String> {
//!         Ok(format!("{} {}", self.first.as_deref().unwrap_or("?"), self.last.as_deref().unwrap_or("?")))
//!     }
//!
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities::NONE.with_self_test()
//!     }
//!
//!     fn test(&self) -> bool {
//!         self.first.is_some() && self.last.is_some()
//!     }
//! }
//! ```

use std::fmt::Debug;

use tokio::time::Instant;

use super::state::State;

/// Optional behavior a builder opts into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub self_test: bool,
    pub state_test: bool,
    pub timeout: bool,
    pub expiration: bool,
}

impl Capabilities {
    /// No optional behavior.
    pub const NONE: Capabilities = Capabilities {
        self_test: false,
        state_test: false,
        timeout: false,
        expiration: false,
    };

    #[inline]
    pub const fn with_self_test(mut self) -> Self {
        self.self_test = true;
        self
    }

    #[inline]
    pub const fn with_state_test(mut self) -> Self {
        self.state_test = true;
        self
    }

    #[inline]
    pub const fn with_timeout(mut self) -> Self {
        self.timeout = true;
        self
    }

    #[inline]
    pub const fn with_expiration(mut self) -> Self {
        self.expiration = true;
        self
    }
}

/// Per-key accumulator producing a [`Builder::Product`].
///
/// Methods other than [`build`](Builder::build) are only called when the matching
/// capability is declared by [`capabilities`](Builder::capabilities).
pub trait Builder<K, L, V>: Send + 'static {
    /// Finished value. Cloned once per product waiter.
    type Product: Clone + Debug + Send + Sync + 'static;

    /// Produces the product. Called at most once, after readiness.
    fn build(&mut self) -> anyhow::Result<Self::Product>;

    /// Declares optional behavior. Read once per building site.
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    /// Readiness from the builder alone (`self_test`).
    fn test(&self) -> bool {
        false
    }

    /// Readiness from the builder and the site state (`state_test`).
    fn test_state(&self, _state: &State<'_, K, L, V>) -> bool {
        false
    }

    /// Called when the build expires (`timeout`). May complete the builder.
    fn on_timeout(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Builder-owned expiration (`expiration`).
    fn expiration(&self) -> Option<Instant> {
        None
    }
}
