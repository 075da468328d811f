//! Log decoding errors

use thiserror::Error;

use super::DecodedRecord;

/// Why a log buffer could not be decoded to the end
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record at offset {offset} needs {needed} bytes, only {available} remain")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid tag {tag:#04x} at offset {offset}")]
    InvalidTag { offset: usize, tag: u8 },

    #[error("invalid {field} in record at offset {offset}")]
    InvalidField { offset: usize, field: &'static str },
}

impl DecodeError {
    /// Byte offset where decoding stopped
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::Truncated { offset, .. }
            | DecodeError::InvalidTag { offset, .. }
            | DecodeError::InvalidField { offset, .. } => *offset,
        }
    }
}

/// Records decoded before a failure, marked as incomplete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("log incomplete after {} records: {error}", .records.len())]
pub struct IncompleteLog {
    /// Everything decoded up to the failure point
    pub records: Vec<DecodedRecord>,
    /// What stopped the decoder
    pub error: DecodeError,
}
