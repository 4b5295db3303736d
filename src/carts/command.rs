//! # Management commands.
//!
//! Commands share the cart discipline (validated at placement, queued, one
//! completion handle each) but are interpreted by the engine itself. They are
//! executed at the start of every loop iteration, before any cart.

use std::time::Duration;

use tokio::time::Instant;

/// Operation requested by a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Instantiate a build with no data using the default supplier.
    Create,
    /// Evict the build immediately and report it as cancelled.
    Cancel,
    /// Move the build expiration to the given instant.
    Reschedule(Instant),
    /// Run the expiration path now.
    Timeout,
    /// Re-evaluate readiness without new data.
    Check,
}

impl CommandKind {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CommandKind::Create => "create",
            CommandKind::Cancel => "cancel",
            CommandKind::Reschedule(_) => "reschedule",
            CommandKind::Timeout => "timeout",
            CommandKind::Check => "check",
        }
    }
}

/// Management instruction targeting one key.
#[derive(Debug, Clone)]
pub struct Command<K> {
    key: K,
    kind: CommandKind,
    created: Instant,
    expires: Option<Instant>,
}

impl<K> Command<K> {
    pub fn new(key: K, kind: CommandKind) -> Self {
        Self {
            key,
            kind,
            created: Instant::now(),
            expires: None,
        }
    }

    pub fn create(key: K) -> Self {
        Self::new(key, CommandKind::Create)
    }

    pub fn cancel(key: K) -> Self {
        Self::new(key, CommandKind::Cancel)
    }

    pub fn reschedule(key: K, at: Instant) -> Self {
        Self::new(key, CommandKind::Reschedule(at))
    }

    pub fn timeout(key: K) -> Self {
        Self::new(key, CommandKind::Timeout)
    }

    pub fn check(key: K) -> Self {
        Self::new(key, CommandKind::Check)
    }

    /// Sets the expiration relative to the creation time.
    ///
    /// For `Create` it also becomes the expiration of the new build.
    #[inline]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires = Some(self.created + ttl);
        self
    }

    #[inline]
    pub fn with_expiration(mut self, at: Instant) -> Self {
        self.expires = Some(at);
        self
    }

    #[inline]
    pub fn with_created(mut self, at: Instant) -> Self {
        self.created = at;
        self
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn expires(&self) -> Option<Instant> {
        self.expires
    }

    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}
