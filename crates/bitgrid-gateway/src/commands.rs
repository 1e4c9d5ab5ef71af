//! Inbound command handlers and the per-frame dispatcher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use bitgrid_core::error::{GridError, Result};
use bitgrid_core::grid::GridStore;
use bitgrid_core::protocol::{parse_cell, Frame, Outbound, Position};

use crate::hub::Hub;
use crate::session::Session;
use crate::throttle::Throttle;

/// Handles the payload of one inbound frame type.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, session: &Session, payload: &str) -> Result<()>;
}

/// `p:<id>:<x>:<y>`: relay a cursor position to everyone.
pub struct PositionHandler {
    hub: Hub,
}

impl PositionHandler {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl CommandHandler for PositionHandler {
    async fn handle(&self, _session: &Session, payload: &str) -> Result<()> {
        let position = Position::parse(payload)?;
        self.hub.broadcast(&Outbound::Position(position)).await;
        Ok(())
    }
}

/// `s:<index>`: flip a cell and announce its new value.
pub struct ToggleHandler {
    hub: Hub,
    grid: Arc<GridStore>,
}

impl ToggleHandler {
    pub fn new(hub: Hub, grid: Arc<GridStore>) -> Self {
        Self { hub, grid }
    }
}

#[async_trait]
impl CommandHandler for ToggleHandler {
    async fn handle(&self, session: &Session, payload: &str) -> Result<()> {
        let index = parse_cell(payload)?;
        let bit = self.grid.toggle(index).await?;
        debug!(session_id = %session.id(), index, bit, "Cell toggled");

        #[cfg(feature = "metrics")]
        crate::metrics::record_toggle();

        self.hub.broadcast(&Outbound::Toggled { index, bit }).await;
        Ok(())
    }
}

/// Routes inbound text frames to their handlers.
pub struct Dispatcher {
    position: Box<dyn CommandHandler>,
    toggle: Box<dyn CommandHandler>,
}

impl Dispatcher {
    pub fn new(hub: Hub, grid: Arc<GridStore>, throttle: Duration) -> Self {
        Self {
            position: Box::new(PositionHandler::new(hub.clone())),
            toggle: Box::new(Throttle::new(ToggleHandler::new(hub, grid), throttle)),
        }
    }

    /// Handle one frame. Errors are logged here and never end the connection.
    pub async fn dispatch(&self, session: &Session, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(session_id = %session.id(), %e, "Dropping frame");
                return;
            }
        };

        let result = match frame.kind {
            "p" => self.position.handle(session, frame.payload).await,
            "s" => self.toggle.handle(session, frame.payload).await,
            other => {
                debug!(session_id = %session.id(), kind = other, "Unknown frame type");
                return;
            }
        };

        match result {
            Ok(()) => {}
            Err(e @ GridError::StorageUnavailable(_)) => {
                error!(session_id = %session.id(), %e, "Command failed");
            }
            Err(e) if e.is_client_error() => {
                warn!(session_id = %session.id(), kind = frame.kind, %e, "Rejected command");
            }
            Err(e) => {
                error!(session_id = %session.id(), kind = frame.kind, %e, "Command failed");
            }
        }
    }
}
