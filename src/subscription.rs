use crate::error::{MatrixError, Result};
use crate::types::{ConnectionStatus, ZoneId};
use crate::zone::ZoneRecord;
use tokio::sync::broadcast;

/// Change notification emitted by the matrix driver
#[derive(Debug, Clone)]
pub enum ZoneUpdate {
    /// A zone's record changed (user action or refresh)
    Changed(Box<ZoneRecord>),

    /// A zone was deactivated in configuration and removed
    Removed(ZoneId),

    /// Connection status changed; zone data is stale unless `Connected`
    Connection(ConnectionStatus),
}

/// Receiver for zone updates
pub struct ZoneUpdateReceiver {
    rx: broadcast::Receiver<ZoneUpdate>,
}

impl ZoneUpdateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<ZoneUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next update
    ///
    /// Fails with `ConnectionLost` once the driver has shut down.
    pub async fn recv(&mut self) -> Result<ZoneUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(update) => return Ok(update),
                Err(broadcast::error::RecvError::Closed) => return Err(MatrixError::ConnectionLost),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Zone update receiver lagged by {} messages", n);
                }
            }
        }
    }

    /// Try to receive an update without blocking
    pub fn try_recv(&mut self) -> Result<Option<ZoneUpdate>> {
        loop {
            match self.rx.try_recv() {
                Ok(update) => return Ok(Some(update)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(MatrixError::ConnectionLost),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::debug!("Zone update receiver lagged by {} messages", n);
                }
            }
        }
    }
}
