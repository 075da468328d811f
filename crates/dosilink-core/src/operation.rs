//! Device operations
//!
//! The operation strings a front end accepts (`identify`, `readlog:csv:out.csv`,
//! ...), parsed and validated before any device I/O, and their execution
//! against a [`Connection`].

use chrono::NaiveDateTime;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info};

use crate::decoder::{decode_all, DecodedRecord, LogEncoding};
use crate::dump::{save_config, save_raw_log};
use crate::error::{Error, UsageError};
use crate::protocol::{Connection, ConnectionConfig, DeviceInfo};

/// Timestamp layout accepted by `settime:`
pub const SETTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Output formats for `readlog`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogFormat {
    /// Plain text
    Text,
    /// Comma-separated values
    Csv,
    /// XML document
    Xml,
    /// SQLite database
    Sqlite,
    /// Raw dump: size prefix plus undecoded bytes
    Binary,
}

impl FromStr for LogFormat {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(LogFormat::Text),
            "csv" => Ok(LogFormat::Csv),
            "xml" => Ok(LogFormat::Xml),
            "sqlite" => Ok(LogFormat::Sqlite),
            "bin" => Ok(LogFormat::Binary),
            _ => Err(UsageError::UnknownFormat(s.to_string())),
        }
    }
}

/// One requested device operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Query version, serial number and clock
    Identify,
    /// Set the device clock to host local time
    SyncTime,
    /// Set the device clock to host UTC
    SyncUtcTime,
    /// Set the device clock to a given time
    SetTime(NaiveDateTime),
    /// Retrieve the log and write it in `format`
    ReadLog {
        /// Output format
        format: LogFormat,
        /// Output file
        destination: PathBuf,
    },
    /// Erase the device log
    ClearLog,
    /// Save the configuration block verbatim
    ReadConfig {
        /// Output file
        destination: PathBuf,
    },
    /// Factory reset
    DeviceReset,
}

fn destination(
    operation: &str,
    value: Option<&str>,
    expected: &'static str,
) -> Result<PathBuf, UsageError> {
    match value {
        Some(v) if !v.is_empty() => Ok(PathBuf::from(v)),
        _ => Err(UsageError::BadArguments {
            operation: operation.to_string(),
            expected,
        }),
    }
}

impl FromStr for Operation {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Destinations may contain ':' themselves (C:\...), so split sparingly
        let (name, args) = match s.split_once(':') {
            Some((name, args)) => (name, Some(args)),
            None => (s, None),
        };
        let no_args = |op: Operation| match args {
            None => Ok(op),
            Some(_) => Err(UsageError::BadArguments {
                operation: name.to_string(),
                expected: "no arguments",
            }),
        };

        match name {
            "identify" => no_args(Operation::Identify),
            "synctime" => no_args(Operation::SyncTime),
            "syncutctime" => no_args(Operation::SyncUtcTime),
            "clearlog" => no_args(Operation::ClearLog),
            "devicereset" => no_args(Operation::DeviceReset),
            "settime" => {
                let stamp = args.ok_or(UsageError::BadArguments {
                    operation: name.to_string(),
                    expected: "settime:<YYYY-MM-DD HH:MM:SS>",
                })?;
                NaiveDateTime::parse_from_str(stamp.trim(), SETTIME_FORMAT)
                    .map(Operation::SetTime)
                    .map_err(|_| UsageError::BadTimestamp(stamp.to_string()))
            }
            "readlog" => {
                const EXPECTED: &str = "readlog:<format>:<destination>";
                let (format, dest) = match args.and_then(|a| a.split_once(':')) {
                    Some((format, dest)) => (format, Some(dest)),
                    None => {
                        return Err(UsageError::BadArguments {
                            operation: name.to_string(),
                            expected: EXPECTED,
                        })
                    }
                };
                Ok(Operation::ReadLog {
                    format: format.parse()?,
                    destination: destination(name, dest, EXPECTED)?,
                })
            }
            "readcfg" => Ok(Operation::ReadConfig {
                destination: destination(name, args, "readcfg:<destination>")?,
            }),
            _ => Err(UsageError::UnknownOperation(s.to_string())),
        }
    }
}

/// Parse every operation up front so nothing runs if any is malformed
pub fn parse_operations<S: AsRef<str>>(args: &[S]) -> Result<Vec<Operation>, UsageError> {
    args.iter().map(|a| a.as_ref().parse()).collect()
}

/// Consumer of decoded log records
///
/// Implemented by the output back ends (text, CSV, XML, SQLite). The sink
/// owns the format and the destination file.
pub trait RecordSink {
    /// Write `records` to `destination`
    fn write_log(
        &mut self,
        format: LogFormat,
        destination: &Path,
        records: &[DecodedRecord],
    ) -> io::Result<()>;
}

/// What an operation produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(missing_docs)]
pub enum Outcome {
    Identified(DeviceInfo),
    ClockSet,
    LogWritten { format: LogFormat, records: usize },
    LogDumped { bytes: u32 },
    ConfigSaved { bytes: usize },
    LogCleared,
    Reset,
}

/// Run a single operation
pub fn execute(
    conn: &mut Connection,
    operation: &Operation,
    sink: &mut dyn RecordSink,
) -> Result<Outcome, Error> {
    info!("executing {:?}", operation);
    let outcome = match operation {
        Operation::Identify => Outcome::Identified(conn.get_version()?),
        Operation::SyncTime => {
            conn.sync_time(false)?;
            Outcome::ClockSet
        }
        Operation::SyncUtcTime => {
            conn.sync_time(true)?;
            Outcome::ClockSet
        }
        Operation::SetTime(datetime) => {
            conn.set_time(*datetime)?;
            Outcome::ClockSet
        }
        Operation::ReadLog {
            format: LogFormat::Binary,
            destination,
        } => {
            let log = conn.read_log()?;
            save_raw_log(destination, &log)?;
            Outcome::LogDumped {
                bytes: log.declared_size,
            }
        }
        Operation::ReadLog {
            format,
            destination,
        } => {
            let log = conn.read_log()?;
            let encoding = LogEncoding::from(conn.version());
            let records = decode_all(encoding, &log.data, log.declared_size as usize)?;
            sink.write_log(*format, destination, &records)?;
            Outcome::LogWritten {
                format: *format,
                records: records.len(),
            }
        }
        Operation::ClearLog => {
            conn.clear_log()?;
            Outcome::LogCleared
        }
        Operation::ReadConfig { destination } => {
            let config = conn.read_config()?;
            save_config(destination, &config)?;
            Outcome::ConfigSaved {
                bytes: config.len(),
            }
        }
        Operation::DeviceReset => {
            conn.device_reset()?;
            Outcome::Reset
        }
    };
    Ok(outcome)
}

/// Run operations in order on one connection, stopping at the first failure.
/// The connection is closed on every path.
pub fn run_all(
    mut conn: Connection,
    operations: &[Operation],
    sink: &mut dyn RecordSink,
) -> Result<Vec<Outcome>, Error> {
    let mut outcomes = Vec::with_capacity(operations.len());
    let mut result = Ok(());
    for op in operations {
        match execute(&mut conn, op, sink) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                error!("{:?} failed: {}", op, e);
                if let Some(hint) = e.hint(conn.version()) {
                    error!("{}", hint);
                }
                result = Err(e);
                break;
            }
        }
    }
    conn.close();
    result.map(|()| outcomes)
}

/// Open a connection from `config` and run `operations`
pub fn run(
    config: &ConnectionConfig,
    operations: &[Operation],
    sink: &mut dyn RecordSink,
) -> Result<Vec<Outcome>, Error> {
    run_all(Connection::new(config), operations, sink)
}
