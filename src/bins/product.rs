use std::collections::HashMap;
use std::time::Duration;

use crate::core::SiteStatus;

/// Terminal success of one key, delivered once to the result consumer.
#[derive(Debug, Clone)]
pub struct ProductBin<K, P> {
    pub key: K,
    pub product: P,
    /// Time left until the build would have expired (`None` = no expiration).
    pub remaining: Option<Duration>,
    /// `Ready`, or `TimedOut` when a timeout action forced readiness.
    pub status: SiteStatus,
    /// Properties of the last accepted cart.
    pub properties: HashMap<String, String>,
}

impl<K, P> ProductBin<K, P> {
    /// Returns `true` if the product was completed by a timeout action.
    #[inline]
    pub fn is_timeout_forced(&self) -> bool {
        self.status == SiteStatus::TimedOut
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}
