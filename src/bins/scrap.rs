use std::collections::HashMap;
use std::fmt;

use tokio::time::Instant;

use crate::carts::{Cart, Command};
use crate::core::SiteStatus;
use crate::error::{ConveyorError, FailureType};

/// Snapshot of a discarded building site.
#[derive(Debug, Clone)]
pub struct SiteSnapshot<K, L, V> {
    pub key: K,
    pub status: SiteStatus,
    pub created: Instant,
    pub expires: Option<Instant>,
    pub accept_count: usize,
    pub histogram: HashMap<L, usize>,
    /// Accepted carts, when `keep_carts_on_site` is set.
    pub carts: Vec<Cart<K, L, V>>,
}

/// Offending object carried by a [`ScrapBin`].
#[derive(Debug, Clone)]
pub enum Scrap<K, L, V> {
    /// A data cart.
    Cart(Cart<K, L, V>),
    /// A management command.
    Command(Command<K>),
    /// A create or future request that never reached a site.
    Request { key: K, kind: &'static str },
    /// A whole build.
    Site(SiteSnapshot<K, L, V>),
}

impl<K, L, V> Scrap<K, L, V> {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Scrap::Cart(_) => "cart",
            Scrap::Command(_) => "command",
            Scrap::Request { .. } => "request",
            Scrap::Site(_) => "site",
        }
    }
}

/// Terminal failure record, delivered once per discarded unit of work.
#[derive(Debug, Clone)]
pub struct ScrapBin<K, L, V> {
    pub key: Option<K>,
    pub scrap: Scrap<K, L, V>,
    pub comment: String,
    pub error: Option<ConveyorError>,
    pub failure_type: FailureType,
}

impl<K, L, V> ScrapBin<K, L, V> {
    pub(crate) fn new(
        key: Option<K>,
        scrap: Scrap<K, L, V>,
        comment: impl Into<String>,
        error: Option<ConveyorError>,
        failure_type: FailureType,
    ) -> Self {
        Self {
            key,
            scrap,
            comment: comment.into(),
            error,
            failure_type,
        }
    }
}

impl<K: fmt::Debug, L, V> fmt::Display for ScrapBin<K, L, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] key={:?} {}: {}",
            self.failure_type,
            self.key,
            self.scrap.as_label(),
            self.comment
        )?;
        if let Some(err) = &self.error {
            write!(f, " ({err})")?;
        }
        Ok(())
    }
}
