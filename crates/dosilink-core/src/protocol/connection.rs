//! Connection management
//!
//! One facade over both firmware generations. The protocol variant is a
//! closed enum, so every operation dispatches exhaustively.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    frame::ChecksumKind,
    session::Session,
    transport::{list_ports, LineFormat, PortInfo, SerialSettings},
    CommunicationError, DeviceInfo, LogBuffer, ProtocolV1, ProtocolV2, Transport,
    DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS, V1_BAUD_RATE, V2_BAUD_RATE,
};
use crate::error::{ConfigError, UsageError};

/// Firmware protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// PC-mode text protocol
    V1,
    /// Binary framed protocol
    V2,
}

impl ProtocolVersion {
    /// Line settings the firmware generation expects
    pub fn default_serial_settings(self) -> SerialSettings {
        match self {
            ProtocolVersion::V1 => SerialSettings {
                baud_rate: V1_BAUD_RATE,
                line_format: LineFormat::SevenEvenOne,
            },
            ProtocolVersion::V2 => SerialSettings {
                baud_rate: V2_BAUD_RATE,
                line_format: LineFormat::EightNoneOne,
            },
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(ProtocolVersion::V1),
            "v2" | "2" => Ok(ProtocolVersion::V2),
            _ => Err(UsageError::UnknownProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => write!(f, "v1"),
            ProtocolVersion::V2 => write!(f, "v2"),
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Firmware protocol generation
    pub protocol: ProtocolVersion,
    /// Baud rate override; the protocol default applies when unset
    pub baud_rate: Option<u32>,
    /// Response timeout per attempt in milliseconds
    pub timeout_ms: u64,
    /// Transmissions per request on the binary protocol, the first one
    /// included: 3 allows two resends after a checksum error or timeout
    pub max_retries: u32,
    /// Checksum algorithm of the binary protocol
    pub checksum: ChecksumKind,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            protocol: ProtocolVersion::V2,
            baud_rate: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            checksum: ChecksumKind::default(),
        }
    }
}

impl ConnectionConfig {
    /// Config for a port and protocol, everything else default
    pub fn new(port_name: impl Into<String>, protocol: ProtocolVersion) -> Self {
        Self {
            port_name: port_name.into(),
            protocol,
            baud_rate: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            checksum: ChecksumKind::default(),
        }
    }

    /// Parse from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Line settings after applying the baud override
    pub fn serial_settings(&self) -> SerialSettings {
        let mut settings = self.protocol.default_serial_settings();
        if let Some(baud) = self.baud_rate {
            settings.baud_rate = baud;
        }
        settings
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// The protocol driver behind a connection
enum Driver {
    V1(ProtocolV1),
    V2(ProtocolV2),
}

/// Dosimeter connection
///
/// Every operation takes `&mut self`, so commands can never overlap. The
/// port is opened (and for v1, PC mode entered) by the first operation.
/// Dropping the connection closes it.
pub struct Connection {
    driver: Driver,
    version: ProtocolVersion,
}

impl Connection {
    /// Create a connection that opens the configured port on first use
    pub fn new(config: &ConnectionConfig) -> Self {
        let session = Session::lazy(
            config.port_name.clone(),
            config.serial_settings(),
            config.timeout(),
        );
        Self::with_session(config, session)
    }

    /// Create a connection over an already opened transport
    pub fn with_transport(config: &ConnectionConfig, transport: Box<dyn Transport>) -> Self {
        let session = Session::with_transport(transport, config.timeout());
        Self::with_session(config, session)
    }

    fn with_session(config: &ConnectionConfig, session: Session) -> Self {
        debug!(
            "connection to {} using protocol {}",
            config.port_name, config.protocol
        );
        let driver = match config.protocol {
            ProtocolVersion::V1 => {
                Driver::V1(ProtocolV1::new(session, config.serial_settings().baud_rate))
            }
            ProtocolVersion::V2 => Driver::V2(ProtocolV2::new(
                session,
                config.checksum,
                config.max_retries,
            )),
        };
        Self {
            driver,
            version: config.protocol,
        }
    }

    /// List available serial ports
    pub fn list_ports() -> Vec<PortInfo> {
        list_ports()
    }

    /// Protocol generation in use
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    fn session(&self) -> &Session {
        match &self.driver {
            Driver::V1(p) => p.session(),
            Driver::V2(p) => p.session(),
        }
    }

    /// Whether the port is currently held
    pub fn is_open(&self) -> bool {
        self.session().is_open()
    }

    /// Cumulative (tx, rx) byte counters
    pub fn counters(&self) -> (u64, u64) {
        self.session().counters()
    }

    /// Query device identification
    pub fn get_version(&mut self) -> Result<DeviceInfo, CommunicationError> {
        match &mut self.driver {
            Driver::V1(p) => p.get_version(),
            Driver::V2(p) => p.get_version(),
        }
    }

    /// Set the device clock to the host clock
    pub fn sync_time(&mut self, use_utc: bool) -> Result<(), CommunicationError> {
        match &mut self.driver {
            Driver::V1(p) => p.sync_time(use_utc),
            Driver::V2(p) => p.sync_time(use_utc),
        }
    }

    /// Set the device clock
    pub fn set_time(&mut self, datetime: NaiveDateTime) -> Result<(), CommunicationError> {
        match &mut self.driver {
            Driver::V1(p) => p.set_time(datetime),
            Driver::V2(p) => p.set_time(datetime),
        }
    }

    /// Retrieve the raw log buffer
    pub fn read_log(&mut self) -> Result<LogBuffer, CommunicationError> {
        let log = match &mut self.driver {
            Driver::V1(p) => p.read_log(),
            Driver::V2(p) => p.read_log(),
        }?;
        info!("read {} log bytes", log.declared_size);
        Ok(log)
    }

    /// Erase the log buffer
    pub fn clear_log(&mut self) -> Result<(), CommunicationError> {
        match &mut self.driver {
            Driver::V1(p) => p.clear_log(),
            Driver::V2(p) => p.clear_log(),
        }
    }

    /// Retrieve the raw configuration block
    pub fn read_config(&mut self) -> Result<Vec<u8>, CommunicationError> {
        match &mut self.driver {
            Driver::V1(p) => p.read_config(),
            Driver::V2(p) => p.read_config(),
        }
    }

    /// Factory reset
    pub fn device_reset(&mut self) -> Result<(), CommunicationError> {
        match &mut self.driver {
            Driver::V1(p) => p.device_reset(),
            Driver::V2(p) => p.device_reset(),
        }
    }

    /// Close the connection; later calls are no-ops
    pub fn close(&mut self) {
        match &mut self.driver {
            Driver::V1(p) => p.close(),
            Driver::V2(p) => p.close(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
