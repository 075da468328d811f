//! Protocol commands
//!
//! Defines the device operations and their command codes for both firmware
//! generations.

use serde::{Deserialize, Serialize};

/// Commands understood by the dosimeter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Query firmware version, serial number and log fill
    GetVersion,

    /// Set the device clock
    SetTime,

    /// Dump the event log buffer
    ReadLog,

    /// Erase the event log buffer
    ClearLog,

    /// Dump the configuration block
    ReadConfig,

    /// Factory reset
    DeviceReset,
}

impl Command {
    /// Command letter for the PC-mode text protocol
    pub fn v1_code(&self) -> u8 {
        match self {
            Command::GetVersion => b'v',
            Command::SetTime => b't',
            Command::ReadLog => b'b',
            Command::ClearLog => b'z',
            Command::ReadConfig => b'c',
            Command::DeviceReset => b'i',
        }
    }

    /// Command byte for the binary framed protocol
    pub fn v2_code(&self) -> u8 {
        match self {
            Command::GetVersion => 0x01,
            Command::SetTime => 0x02,
            Command::ReadLog => 0x03,
            Command::ClearLog => 0x04,
            Command::ReadConfig => 0x05,
            Command::DeviceReset => 0x06,
        }
    }

    /// Whether the reply is a size-prefixed data stream
    pub fn streams_data(&self) -> bool {
        matches!(self, Command::ReadLog | Command::ReadConfig)
    }

    /// Minimum response timeout in milliseconds
    pub fn timeout_ms(&self) -> u64 {
        match self {
            Command::ClearLog => 5000,    // Flash erase
            Command::DeviceReset => 3000, // Rewrites the config block
            _ => 0,                       // Configured timeout applies
        }
    }
}
