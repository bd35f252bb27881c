use thiserror::Error;

/// Result type for matrix operations
pub type Result<T> = std::result::Result<T, MatrixError>;

/// Errors that can occur when talking to an audio matrix
#[derive(Error, Debug)]
pub enum MatrixError {
    /// The socket could not be established (refused, unreachable, timed out)
    #[error("Connection error: {0}")]
    Connection(String),

    /// An established connection dropped while a command was pending
    #[error("Connection lost")]
    ConnectionLost,

    /// No response arrived within the response timeout
    #[error("Request timeout")]
    Timeout,

    /// Response was malformed or did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Device rejected the command (`command error` or an empty frame)
    #[error("Device error: {0}")]
    Device(String),

    /// Turn-on requested but there is no remembered or default input
    #[error("No source available for output {0}")]
    NoSourceAvailable(u8),

    /// Command references an inactive zone/input or an unlinked input
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// A delegated call on an external player failed
    #[error("External player error: {0}")]
    External(String),

    /// Configuration rejected during validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MatrixError {
    /// True for transport-level failures that leave device state unknown.
    ///
    /// Periodic refresh treats these as "retry next cycle".
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            MatrixError::Connection(_)
                | MatrixError::ConnectionLost
                | MatrixError::Timeout
                | MatrixError::Io(_)
        )
    }

    pub(crate) fn invalid_target(detail: impl Into<String>) -> Self {
        MatrixError::InvalidTarget(detail.into())
    }
}
