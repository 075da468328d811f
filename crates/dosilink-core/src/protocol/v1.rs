//! PC-mode text protocol (older firmware)
//!
//! The device has to be woken into "PC mode" before it accepts anything.
//! After that every command is a single ASCII letter plus an optional
//! argument, terminated by CR LF. Replies are text lines, except for log and
//! config dumps where a hex size line is followed by that many raw bytes.

use chrono::{Local, NaiveDateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    session::Session, Command, CommunicationError, DeviceInfo, LogBuffer, MAX_STREAM_SIZE,
};

/// Wake sequence that enters PC mode
pub const WAKE: &[u8] = b"P";

/// Leaves PC mode
pub const LEAVE: &[u8] = b"X";

/// Token in the wake acknowledgment line
pub const PC_MODE_ACK: &str = "PC-Mode";

/// Acknowledgment line for commands without data
pub const OK_ACK: &str = "OK";

/// Line terminator for commands
pub const LINE_END: &[u8] = b"\r\n";

/// Timestamp layout used by `t` commands and the `DT` field
pub const TIME_FORMAT: &str = "%d%m%y%H%M%S";

/// Longest text line accepted from the device
const MAX_LINE_LEN: usize = 256;

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum V1State {
    /// Not in PC mode
    Idle,
    /// Wake sequence sent, waiting for acknowledgment
    EnteringMode,
    /// In PC mode, ready for a command
    Ready,
    /// Writing a command
    Sending,
    /// Waiting for the reply
    AwaitingResponse,
}

/// Driver for the PC-mode text protocol
pub struct ProtocolV1 {
    session: Session,
    state: V1State,
    baud_rate: u32,
}

impl ProtocolV1 {
    /// Create a driver over a session. PC mode is entered lazily.
    pub fn new(session: Session, baud_rate: u32) -> Self {
        Self {
            session,
            state: V1State::Idle,
            baud_rate,
        }
    }

    /// Current handshake state
    pub fn state(&self) -> V1State {
        self.state
    }

    /// Access the session (counters, open state)
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run one command cycle; any failure drops back to Idle so the next
    /// command re-enters PC mode.
    fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, CommunicationError>,
    ) -> Result<T, CommunicationError> {
        let result = self.enter_pc_mode().and_then(|()| f(self));
        match result {
            Ok(value) => {
                self.state = V1State::Ready;
                Ok(value)
            }
            Err(e) => {
                warn!("v1 command failed in state {:?}: {}", self.state, e);
                self.state = V1State::Idle;
                Err(e)
            }
        }
    }

    fn enter_pc_mode(&mut self) -> Result<(), CommunicationError> {
        if self.state == V1State::Ready {
            return Ok(());
        }
        self.session.ensure_open()?;
        self.state = V1State::EnteringMode;
        debug!("entering PC mode");

        self.session.clear_input()?;
        self.session.write(WAKE)?;
        let line = self.read_line(self.session.timeout())?;
        if !line.contains(PC_MODE_ACK) {
            return Err(CommunicationError::UnexpectedResponse(format!(
                "wake acknowledged with {:?}",
                line
            )));
        }

        info!("device in PC mode: {}", line);
        self.state = V1State::Ready;
        Ok(())
    }

    fn send_command(&mut self, cmd: Command, arg: &str) -> Result<(), CommunicationError> {
        self.state = V1State::Sending;
        let mut bytes = Vec::with_capacity(1 + arg.len() + LINE_END.len());
        bytes.push(cmd.v1_code());
        bytes.extend_from_slice(arg.as_bytes());
        bytes.extend_from_slice(LINE_END);
        debug!("v1 {:?}: {:?}", cmd, String::from_utf8_lossy(&bytes).trim_end());
        self.session.write(&bytes)?;
        self.state = V1State::AwaitingResponse;
        Ok(())
    }

    fn command_timeout(&self, cmd: Command) -> Duration {
        self.session
            .timeout()
            .max(Duration::from_millis(cmd.timeout_ms()))
    }

    /// Read one CR LF terminated line, without the terminator
    fn read_line(&mut self, timeout: Duration) -> Result<String, CommunicationError> {
        let deadline = Instant::now() + timeout;
        let mut line = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let byte = match self.session.read_exact_within(1, remaining) {
                Ok(b) => b[0],
                Err(CommunicationError::Timeout { .. }) => {
                    return Err(CommunicationError::Timeout {
                        expected: line.len() + 1,
                        received: line.len(),
                    })
                }
                Err(e) => return Err(e),
            };
            match byte {
                b'\n' => break,
                b'\r' => {}
                _ => {
                    line.push(byte);
                    if line.len() > MAX_LINE_LEN {
                        return Err(CommunicationError::Framing(format!(
                            "reply line longer than {} bytes",
                            MAX_LINE_LEN
                        )));
                    }
                }
            }
        }

        let text = String::from_utf8_lossy(&line).trim().to_string();
        debug!("v1 rx line: {:?}", text);
        Ok(text)
    }

    fn expect_ok(&mut self, cmd: Command) -> Result<(), CommunicationError> {
        let line = self.read_line(self.command_timeout(cmd))?;
        if line != OK_ACK {
            return Err(CommunicationError::UnexpectedResponse(format!(
                "{:?} answered {:?}",
                cmd, line
            )));
        }
        Ok(())
    }

    /// Size line, then exactly that many raw bytes
    fn read_stream(&mut self, cmd: Command) -> Result<LogBuffer, CommunicationError> {
        self.send_command(cmd, "")?;
        let size_line = self.read_line(self.session.timeout())?;
        let declared = u32::from_str_radix(&size_line, 16).map_err(|_| {
            CommunicationError::UnexpectedResponse(format!("bad size line {:?}", size_line))
        })?;
        if declared as usize > MAX_STREAM_SIZE {
            return Err(CommunicationError::Framing(format!(
                "announced size {} exceeds {}",
                declared, MAX_STREAM_SIZE
            )));
        }
        debug!("{:?}: device announced {} bytes", cmd, declared);

        let timeout = self.session.timeout() + transfer_time(declared as usize, self.baud_rate);
        let data = match self.session.read_exact_within(declared as usize, timeout) {
            Ok(data) => data,
            Err(CommunicationError::Timeout { expected, received }) => {
                return Err(CommunicationError::Framing(format!(
                    "short read: {} of {} bytes",
                    received, expected
                )))
            }
            Err(e) => return Err(e),
        };
        LogBuffer::new(declared, data)
    }

    /// Query version, serial number, log fill and clock
    pub fn get_version(&mut self) -> Result<DeviceInfo, CommunicationError> {
        self.transact(|p| {
            p.send_command(Command::GetVersion, "")?;
            let line = p.read_line(p.session.timeout())?;
            parse_version_line(&line)
        })
    }

    /// Set the device clock to `datetime`; the device must echo it back
    pub fn set_time(&mut self, datetime: NaiveDateTime) -> Result<(), CommunicationError> {
        let stamp = datetime.format(TIME_FORMAT).to_string();
        self.transact(|p| {
            p.send_command(Command::SetTime, &stamp)?;
            let echo = p.read_line(p.session.timeout())?;
            let expected = format!("{}{}", Command::SetTime.v1_code() as char, stamp);
            if echo != expected {
                return Err(CommunicationError::UnexpectedResponse(format!(
                    "time echo {:?}, expected {:?}",
                    echo, expected
                )));
            }
            info!("device clock set to {}", datetime);
            Ok(())
        })
    }

    /// Set the device clock to the host's local or UTC time
    pub fn sync_time(&mut self, use_utc: bool) -> Result<(), CommunicationError> {
        let now = if use_utc {
            Utc::now().naive_utc()
        } else {
            Local::now().naive_local()
        };
        self.set_time(now)
    }

    /// Dump the log buffer
    pub fn read_log(&mut self) -> Result<LogBuffer, CommunicationError> {
        self.transact(|p| p.read_stream(Command::ReadLog))
    }

    /// Dump the configuration block
    pub fn read_config(&mut self) -> Result<Vec<u8>, CommunicationError> {
        self.transact(|p| p.read_stream(Command::ReadConfig))
            .map(|buf| buf.data)
    }

    /// Erase the log buffer
    pub fn clear_log(&mut self) -> Result<(), CommunicationError> {
        self.transact(|p| {
            p.send_command(Command::ClearLog, "")?;
            p.expect_ok(Command::ClearLog)
        })
    }

    /// Factory reset. Nothing more is expected once the device acknowledges.
    pub fn device_reset(&mut self) -> Result<(), CommunicationError> {
        self.transact(|p| {
            p.send_command(Command::DeviceReset, "")?;
            p.expect_ok(Command::DeviceReset)
        })?;
        // The device reboots and leaves PC mode on its own
        self.state = V1State::Idle;
        Ok(())
    }

    /// Leave PC mode (best effort) and release the port
    pub fn close(&mut self) {
        if self.state == V1State::Ready && self.session.is_open() {
            debug!("leaving PC mode");
            let left = self
                .session
                .write(LEAVE)
                .and_then(|()| self.read_line(self.session.timeout()).map(|_| ()));
            if let Err(e) = left {
                warn!("leaving PC mode failed: {} (closing anyway)", e);
            }
        }
        self.state = V1State::Idle;
        self.session.close();
    }
}

/// Time to clock `len` bytes through the line, 10 bits per character
fn transfer_time(len: usize, baud_rate: u32) -> Duration {
    let baud = u64::from(baud_rate.max(1));
    Duration::from_millis(len as u64 * 10 * 1000 / baud)
}

/// Parse a `KEY=VALUE;KEY=VALUE` version line. Only fields that are present
/// are filled in.
pub fn parse_version_line(line: &str) -> Result<DeviceInfo, CommunicationError> {
    let mut info = DeviceInfo::default();
    let bad = |key: &str, value: &str| {
        CommunicationError::UnexpectedResponse(format!("bad {} field {:?}", key, value))
    };

    for field in line.split(';').map(str::trim).filter(|f| !f.is_empty()) {
        let Some((key, value)) = field.split_once('=') else {
            debug!("ignoring version field without value: {:?}", field);
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "VER" => info.software_version = Some(value.to_string()),
            "SN" => info.serial_number = Some(value.parse().map_err(|_| bad(key, value))?),
            "FILL" => {
                info.log_buffer_fill =
                    Some(u32::from_str_radix(value, 16).map_err(|_| bad(key, value))?)
            }
            "DT" => {
                info.datetime = Some(
                    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
                        .map_err(|_| bad(key, value))?,
                )
            }
            _ => debug!("ignoring unknown version field {:?}", key),
        }
    }

    if info.is_empty() {
        warn!("version reply carried no known fields: {:?}", line);
    }
    Ok(info)
}
