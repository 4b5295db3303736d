//! # Conveyor configuration.
//!
//! Provides [`ConveyorConfig`], the static settings of one conveyor.
//!
//! Config is consumed by [`ConveyorBuilder`](crate::ConveyorBuilder). Fields that
//! may change at runtime (heartbeat, default timeout, postponement, max cart age)
//! seed the live settings and can be changed later through conveyor setters.
//!
//! ## Sentinel values
//! - `default_build_timeout = 0s` → builds never expire unless a cart or builder says so
//! - `postpone_duration = 0s` → postponement only follows builder-owned expiration
//! - `max_cart_age = None` → no age check at placement

use std::time::Duration;

/// Configuration of one conveyor.
///
/// ## Field semantics
/// - `name`: registry name and `conveyor` field of every event
/// - `idle_heartbeat`: longest worker wait; bounds eviction latency (min 1ms)
/// - `default_build_timeout`: expiration of new builds relative to creation (`0s` = none)
/// - `postpone_expiration`/`postpone_duration`: extend the expiration on every accepted cart
/// - `max_cart_age`: reject carts and commands older than this at placement
/// - `synchronize_builder`: guard builders with a lock so partial products can be read
/// - `keep_carts_on_site`: retain accepted carts on the site (visible in [`State::carts`](crate::State))
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `delay_resolution`: bucket width of the expiration index
///
/// All fields are public; prefer the helper accessors over sentinel checks.
#[derive(Clone, Debug)]
pub struct ConveyorConfig {
    pub name: String,
    pub idle_heartbeat: Duration,
    pub default_build_timeout: Duration,
    pub postpone_expiration: bool,
    pub postpone_duration: Duration,
    pub max_cart_age: Option<Duration>,
    pub synchronize_builder: bool,
    pub keep_carts_on_site: bool,
    pub bus_capacity: usize,
    pub delay_resolution: Duration,
}

impl ConveyorConfig {
    /// Creates a default configuration with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the default build timeout as an `Option`.
    #[inline]
    pub fn build_timeout(&self) -> Option<Duration> {
        if self.default_build_timeout == Duration::ZERO {
            None
        } else {
            Some(self.default_build_timeout)
        }
    }

    /// Returns the idle heartbeat clamped to a minimum of 1ms.
    #[inline]
    pub fn heartbeat_clamped(&self) -> Duration {
        self.idle_heartbeat.max(Duration::from_millis(1))
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for ConveyorConfig {
    /// Default configuration:
    ///
    /// - `name = "conveyor"`
    /// - `idle_heartbeat = 1s`
    /// - `default_build_timeout = 0s` (no timeout)
    /// - postponement off, `postpone_duration = 0s`
    /// - no max cart age
    /// - unsynchronized builders, carts not retained
    /// - `bus_capacity = 1024`
    /// - `delay_resolution = 1ms`
    fn default() -> Self {
        Self {
            name: "conveyor".to_string(),
            idle_heartbeat: Duration::from_secs(1),
            default_build_timeout: Duration::ZERO,
            postpone_expiration: false,
            postpone_duration: Duration::ZERO,
            max_cart_age: None,
            synchronize_builder: false,
            keep_carts_on_site: false,
            bus_capacity: 1024,
            delay_resolution: Duration::from_millis(1),
        }
    }
}
