//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the device
#[derive(Error, Debug)]
pub enum CommunicationError {
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Timed out after {received} of {expected} bytes")]
    Timeout { expected: usize, received: usize },

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Unexpected response from device: {0}")]
    UnexpectedResponse(String),

    #[error("Connection is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommunicationError {
    /// Whether resending the same request can plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommunicationError::Timeout { .. } | CommunicationError::Checksum { .. }
        )
    }

    /// Whether this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommunicationError::Timeout { .. })
    }
}

impl From<serialport::Error> for CommunicationError {
    fn from(e: serialport::Error) -> Self {
        CommunicationError::Serial(e.to_string())
    }
}
