//! Per-session rate limiting for command handlers.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use bitgrid_core::error::Result;

use crate::commands::CommandHandler;
use crate::session::Session;

/// Wraps a handler so each session gets at most one accepted command per
/// `interval`. Excess commands are dropped without telling the sender.
pub struct Throttle<H> {
    inner: H,
    interval: Duration,
}

impl<H: CommandHandler> Throttle<H> {
    pub fn new(inner: H, interval: Duration) -> Self {
        Self { inner, interval }
    }
}

#[async_trait]
impl<H: CommandHandler> CommandHandler for Throttle<H> {
    async fn handle(&self, session: &Session, payload: &str) -> Result<()> {
        if !session.try_begin_action(self.interval) {
            trace!(session_id = %session.id(), "Command throttled");
            #[cfg(feature = "metrics")]
            crate::metrics::record_throttled();
            return Ok(());
        }
        self.inner.handle(session, payload).await
    }
}
