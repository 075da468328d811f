//! Frame encoding/decoding
//!
//! Binary frame format used by newer firmware:
//! - 1 byte: start marker (0xA5)
//! - 1 byte: command
//! - 2 bytes: payload length (little-endian)
//! - N bytes: payload
//! - 1 byte: checksum over every preceding byte

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::{CommunicationError, MAX_FRAME_PAYLOAD};

/// Start-of-frame marker
pub const FRAME_START: u8 = 0xA5;

/// Bytes before the payload: start, command, length
pub const HEADER_LEN: usize = 4;

/// Command byte the device uses to reject a request
pub const NAK_COMMAND: u8 = 0xEE;

/// Checksum algorithm used by the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    /// Wrapping sum of all bytes
    #[default]
    Additive,
    /// XOR of all bytes
    Xor,
}

impl ChecksumKind {
    /// Compute the checksum of `data`
    pub fn compute(self, data: &[u8]) -> u8 {
        match self {
            ChecksumKind::Additive => data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)),
            ChecksumKind::Xor => data.iter().fold(0u8, |acc, b| acc ^ b),
        }
    }
}

/// A protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command byte
    pub command: u8,
    /// Frame payload
    pub payload: Vec<u8>,
}

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Command byte
    pub command: u8,
    /// Payload length
    pub length: usize,
}

impl FrameHeader {
    /// Parse and validate the 4 header bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, CommunicationError> {
        if bytes.len() != HEADER_LEN {
            return Err(CommunicationError::Framing(format!(
                "header must be {} bytes, got {}",
                HEADER_LEN,
                bytes.len()
            )));
        }
        if bytes[0] != FRAME_START {
            return Err(CommunicationError::Framing(format!(
                "bad start marker {:#04x}",
                bytes[0]
            )));
        }
        let length = LittleEndian::read_u16(&bytes[2..4]) as usize;
        if length > MAX_FRAME_PAYLOAD {
            return Err(CommunicationError::Framing(format!(
                "frame length {} exceeds {}",
                length, MAX_FRAME_PAYLOAD
            )));
        }
        Ok(Self {
            command: bytes[1],
            length,
        })
    }
}

impl Frame {
    /// Create a new frame
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self, checksum: ChecksumKind) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_size());
        bytes.push(FRAME_START);
        bytes.push(self.command);

        let mut len_bytes = [0u8; 2];
        LittleEndian::write_u16(&mut len_bytes, self.payload.len() as u16);
        bytes.extend_from_slice(&len_bytes);

        bytes.extend_from_slice(&self.payload);
        bytes.push(checksum.compute(&bytes));
        bytes
    }

    /// Decode a frame from raw bytes (header, payload and checksum)
    pub fn from_bytes(data: &[u8], checksum: ChecksumKind) -> Result<Self, CommunicationError> {
        if data.len() < HEADER_LEN + 1 {
            return Err(CommunicationError::Framing(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }
        let header = FrameHeader::parse(&data[..HEADER_LEN])?;
        let body_end = HEADER_LEN + header.length;
        if data.len() != body_end + 1 {
            return Err(CommunicationError::Framing(format!(
                "frame declares {} payload bytes but carries {}",
                header.length,
                data.len() - HEADER_LEN - 1
            )));
        }

        let expected = checksum.compute(&data[..body_end]);
        let actual = data[body_end];
        if expected != actual {
            return Err(CommunicationError::Checksum { expected, actual });
        }

        Ok(Self {
            command: header.command,
            payload: data[HEADER_LEN..body_end].to_vec(),
        })
    }

    /// Get the total encoded size
    pub fn encoded_size(&self) -> usize {
        HEADER_LEN + self.payload.len() + 1
    }
}
