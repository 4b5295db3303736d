//! # Placement validators.
//!
//! Every cart and command passes an ordered chain before it is queued:
//!
//! ```text
//! running? ──► not expired? ──► not too old? ──► user validators (carts only)
//! ```
//!
//! The first failure wins; the unit is scrapped and its handle resolves as rejected.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::carts::{Cart, CartLabel};
use crate::error::ConveyorError;

/// User validator for data carts.
pub type CartValidator<K, L, V> =
    Arc<dyn Fn(&Cart<K, L, V>) -> Result<(), ConveyorError> + Send + Sync>;

/// Built-in checks shared by carts and commands.
pub(crate) fn check_envelope(
    running: bool,
    created: Instant,
    expires: Option<Instant>,
    max_age: Option<Duration>,
    now: Instant,
) -> Result<(), ConveyorError> {
    if !running {
        return Err(ConveyorError::NotRunning);
    }
    if let Some(at) = expires {
        if at <= now {
            return Err(ConveyorError::CartExpired {
                overdue: now.saturating_duration_since(at),
            });
        }
    }
    if let Some(max) = max_age {
        let age = now.saturating_duration_since(created);
        if age > max {
            return Err(ConveyorError::CartTooOld { age, max });
        }
    }
    Ok(())
}

/// Builds a validator accepting only the given labels.
pub(crate) fn accept_labels<K, L, V>(labels: impl IntoIterator<Item = L>) -> CartValidator<K, L, V>
where
    L: CartLabel,
{
    let allowed: HashSet<L> = labels.into_iter().collect();
    Arc::new(move |cart: &Cart<K, L, V>| {
        if allowed.contains(cart.label()) {
            Ok(())
        } else {
            Err(ConveyorError::LabelRejected {
                label: format!("{:?}", cart.label()),
            })
        }
    })
}
