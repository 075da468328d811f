//! # Dosilink Core Library
//!
//! Core functionality for talking to radiation dosimeters over a serial line.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The PC-mode text protocol of older firmware
//! - The binary framed protocol of newer firmware
//! - Decoding of the compressed device event log into dose records
//! - Raw log and configuration dumps
//!
//! ## Example
//!
//! ```rust,ignore
//! use dosilink_core::prelude::*;
//!
//! let config = ConnectionConfig::new("/dev/ttyUSB0", ProtocolVersion::V2);
//! let mut conn = Connection::new(&config);
//!
//! let info = conn.get_version()?;
//! println!("serial: {:?}", info.serial_number);
//!
//! let log = conn.read_log()?;
//! for record in decode_log(LogEncoding::V2, &log) {
//!     println!("{:?}", record?.record);
//! }
//! conn.close();
//! ```

pub mod decoder;
pub mod dump;
pub mod error;
pub mod operation;
pub mod protocol;

pub use error::Error;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::decoder::{
        decode, decode_all, decode_log, DecodeError, DecodedRecord, LogEncoding, LogRecord,
    };
    pub use crate::error::{Error, UsageError};
    pub use crate::operation::{execute, parse_operations, LogFormat, Operation, RecordSink};
    pub use crate::protocol::{
        CommunicationError, Connection, ConnectionConfig, DeviceInfo, LogBuffer, ProtocolVersion,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
