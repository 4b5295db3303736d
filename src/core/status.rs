//! # Building site status.
//!
//! ```text
//!               ┌──► Ready
//!               ├──► TimedOut
//! WaitingData ──┼──► Canceled
//!               └──► Invalid
//! ```
//!
//! Every terminal state is entered at most once and never left. The status is
//! held in a [`StatusCell`] shared with partial-product readers, which observe
//! it from foreign threads.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteStatus {
    /// Accepting data.
    WaitingData,
    /// Readiness established; the product is (being) built.
    Ready,
    /// Expired.
    TimedOut,
    /// Cancelled by command.
    Canceled,
    /// Failed while processing.
    Invalid,
}

impl SiteStatus {
    /// Returns a short stable label (SCREAMING_SNAKE_CASE) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SiteStatus::WaitingData => "WAITING_DATA",
            SiteStatus::Ready => "READY",
            SiteStatus::TimedOut => "TIMED_OUT",
            SiteStatus::Canceled => "CANCELED",
            SiteStatus::Invalid => "INVALID",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SiteStatus::WaitingData)
    }

    fn to_u8(self) -> u8 {
        match self {
            SiteStatus::WaitingData => 0,
            SiteStatus::Ready => 1,
            SiteStatus::TimedOut => 2,
            SiteStatus::Canceled => 3,
            SiteStatus::Invalid => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SiteStatus::WaitingData,
            1 => SiteStatus::Ready,
            2 => SiteStatus::TimedOut,
            3 => SiteStatus::Canceled,
            _ => SiteStatus::Invalid,
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Shared, one-way status holder.
#[derive(Clone, Debug, Default)]
pub(crate) struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub(crate) fn get(&self) -> SiteStatus {
        SiteStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Leaves `WaitingData` for `to`. Returns `false` if already terminal.
    pub(crate) fn finish(&self, to: SiteStatus) -> bool {
        debug_assert!(to.is_terminal());
        self.0
            .compare_exchange(
                SiteStatus::WaitingData.to_u8(),
                to.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_entered_once() {
        let cell = StatusCell::default();
        assert_eq!(cell.get(), SiteStatus::WaitingData);
        assert!(cell.finish(SiteStatus::Ready));
        assert!(!cell.finish(SiteStatus::TimedOut));
        assert!(!cell.finish(SiteStatus::Invalid));
        assert_eq!(cell.get(), SiteStatus::Ready);
    }

    #[test]
    fn test_shared_clone_observes_transition() {
        let cell = StatusCell::default();
        let reader = cell.clone();
        cell.finish(SiteStatus::Canceled);
        assert_eq!(reader.get(), SiteStatus::Canceled);
        assert!(reader.get().is_terminal());
    }
}
