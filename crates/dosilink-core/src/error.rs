//! Crate-level errors

use thiserror::Error;

use crate::decoder::{DecodeError, IncompleteLog};
use crate::protocol::{CommunicationError, ProtocolVersion};

/// Hint printed when PC-mode firmware does not answer
pub const PC_MODE_HINT: &str =
    "the device did not answer; make sure it is switched to PC mode before connecting";

/// Malformed operation arguments, rejected before any device I/O
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("Operation '{operation}' expects {expected}")]
    BadArguments {
        operation: String,
        expected: &'static str,
    },

    #[error("Unknown log format '{0}'")]
    UnknownFormat(String),

    #[error("Invalid timestamp '{0}', expected YYYY-MM-DD HH:MM:SS")]
    BadTimestamp(String),

    #[error("Unknown protocol version '{0}', expected v1 or v2")]
    UnknownProtocol(String),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Any failure of a top-level operation
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Communication(#[from] CommunicationError),

    #[error("Log decoding failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Log decoding failed: {0}")]
    Incomplete(#[from] IncompleteLog),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),
}

impl Error {
    /// Extra advice for the user, if any applies to this failure
    pub fn hint(&self, version: ProtocolVersion) -> Option<&'static str> {
        match (self, version) {
            (Error::Communication(e), ProtocolVersion::V1) if e.is_timeout() => Some(PC_MODE_HINT),
            _ => None,
        }
    }
}
