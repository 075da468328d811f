//! Data exchanged with the device

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::CommunicationError;

/// What the device reported about itself
///
/// Every field is optional: older firmware omits some of them, and nothing
/// is filled in that the device did not send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device clock at the time of the query
    pub datetime: Option<NaiveDateTime>,
    /// Serial number
    pub serial_number: Option<u32>,
    /// Firmware version string
    pub software_version: Option<String>,
    /// Bytes used in the log buffer
    pub log_buffer_fill: Option<u32>,
}

impl DeviceInfo {
    /// True when the device reported nothing at all
    pub fn is_empty(&self) -> bool {
        self.datetime.is_none()
            && self.serial_number.is_none()
            && self.software_version.is_none()
            && self.log_buffer_fill.is_none()
    }
}

/// Raw log dump as retrieved from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBuffer {
    /// Size the device announced before sending
    pub declared_size: u32,
    /// Raw, undecoded log bytes
    pub data: Vec<u8>,
}

impl LogBuffer {
    /// Pair a payload with its announced size, rejecting any mismatch
    pub fn new(declared_size: u32, data: Vec<u8>) -> Result<Self, CommunicationError> {
        if data.len() != declared_size as usize {
            return Err(CommunicationError::Framing(format!(
                "device announced {} bytes but sent {}",
                declared_size,
                data.len()
            )));
        }
        Ok(Self {
            declared_size,
            data,
        })
    }

    /// An empty log
    pub fn empty() -> Self {
        Self {
            declared_size: 0,
            data: Vec::new(),
        }
    }

    /// True when the device sent no log data
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
