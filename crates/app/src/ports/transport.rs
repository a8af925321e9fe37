//! Transport port: a live, writable connection to a hub device.

use std::time::Duration;

use async_trait::async_trait;

/// Failure while dialing or writing to a hub.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no network driver for kind {0}")]
    UnknownNetwork(String),
}

/// A connection handed out by a [`ConnectionPool`](crate::pool::ConnectionPool).
///
/// Implementations are owned by exactly one task at a time; the pool
/// serializes access.
#[async_trait]
pub trait Connection: Send {
    /// Write one complete frame.
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Cheap check run before an idle connection is reused.
    async fn is_alive(&mut self) -> bool {
        true
    }
}
