//! Serial Protocol Communication
//!
//! Implements the two dosimeter firmware protocols.
//!
//! Older firmware speaks a handshake-based text protocol ("PC mode"); newer
//! firmware speaks a binary framed protocol with an 8-bit checksum.

pub mod commands;
mod connection;
mod error;
pub mod frame;
pub mod scripted;
mod session;
pub mod transport;
mod types;
pub mod v1;
pub mod v2;

pub use commands::Command;
pub use connection::{Connection, ConnectionConfig, ProtocolVersion};
pub use error::CommunicationError;
pub use frame::{ChecksumKind, Frame};
pub use scripted::{ScriptHandle, ScriptedTransport};
pub use session::Session;
pub use transport::{list_ports, PortInfo, SerialSettings, SerialTransport, Transport};
pub use types::{DeviceInfo, LogBuffer};
pub use v1::ProtocolV1;
pub use v2::ProtocolV2;

/// Baud rate of PC-mode firmware
pub const V1_BAUD_RATE: u32 = 2400;

/// Baud rate of binary-protocol firmware
pub const V2_BAUD_RATE: u32 = 9600;

/// Default timeout for responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default transmissions per request on the binary protocol
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Maximum frame payload
pub const MAX_FRAME_PAYLOAD: usize = 4096;

/// Largest log or config dump accepted from a device
pub const MAX_STREAM_SIZE: usize = 1 << 20;
