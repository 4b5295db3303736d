//! # LogWriter: events through `tracing`
//!
//! A minimal subscriber that renders incoming [`Event`]s as `tracing` records.
//! Failures and expirations are logged at `warn`, everything else at `debug`.
//!
//! ## Example output
//! ```text
//! DEBUG conveyor: [site-created] conveyor="people" key="7"
//! DEBUG conveyor: [product-ready] conveyor="people" key="7" how="ready"
//!  WARN conveyor: [site-expired] conveyor="people" key="9"
//!  WARN conveyor: [site-failed] conveyor="people" key="3" failure=BUILD_FAILED reason="..."
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let conveyor = e.conveyor.as_deref().unwrap_or("-");
        let key = e.key.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ConveyorStarted => {
                tracing::debug!(target: "conveyor", "[started] conveyor={conveyor:?}");
            }
            EventKind::ConveyorStopping => {
                tracing::debug!(target: "conveyor", "[stopping] conveyor={conveyor:?} mode={:?}", e.reason);
            }
            EventKind::ConveyorStopped => {
                tracing::debug!(target: "conveyor", "[stopped] conveyor={conveyor:?}");
            }
            EventKind::SiteCreated => {
                tracing::debug!(target: "conveyor", "[site-created] conveyor={conveyor:?} key={key:?}");
            }
            EventKind::ProductReady => {
                tracing::debug!(
                    target: "conveyor",
                    "[product-ready] conveyor={conveyor:?} key={key:?} how={:?}",
                    e.reason.as_deref().unwrap_or("ready")
                );
            }
            EventKind::SiteRescheduled => {
                tracing::debug!(target: "conveyor", "[rescheduled] conveyor={conveyor:?} key={key:?}");
            }
            EventKind::SiteCanceled => {
                tracing::debug!(target: "conveyor", "[site-canceled] conveyor={conveyor:?} key={key:?}");
            }
            EventKind::SiteExpired => {
                tracing::warn!(target: "conveyor", "[site-expired] conveyor={conveyor:?} key={key:?}");
            }
            EventKind::SiteFailed | EventKind::CartRejected | EventKind::CommandRejected => {
                tracing::warn!(
                    target: "conveyor",
                    "[{}] conveyor={conveyor:?} key={key:?} label={:?} failure={} reason={:?}",
                    kind_tag(e.kind),
                    e.label.as_deref().unwrap_or("-"),
                    e.failure.map(|f| f.as_label()).unwrap_or("-"),
                    e.reason.as_deref().unwrap_or("-"),
                );
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(
                    target: "conveyor",
                    "[subscriber-overflow] conveyor={conveyor:?} subscriber={:?} key={key:?} reason={:?}",
                    e.subscriber.unwrap_or("-"),
                    e.reason.as_deref().unwrap_or("-"),
                );
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(
                    target: "conveyor",
                    "[subscriber-panicked] conveyor={conveyor:?} subscriber={:?} key={key:?} info={}",
                    e.subscriber.unwrap_or("-"),
                    e.reason.as_deref().unwrap_or("unknown"),
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}

fn kind_tag(kind: EventKind) -> &'static str {
    match kind {
        EventKind::CartRejected => "cart-rejected",
        EventKind::CommandRejected => "command-rejected",
        _ => "site-failed",
    }
}
