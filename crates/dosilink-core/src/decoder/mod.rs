//! Log Decoding
//!
//! Turns a raw device log into an ordered sequence of dose records.
//!
//! The device never stores a timestamp per event. The log is a compact
//! stream of count records, each covering one measurement interval, with
//! occasional time markers that re-anchor the clock, mode changes that set
//! a new interval, and overflow markers for counts too large for their
//! field. The decoder replays that stream with a running clock.
//!
//! Both firmware generations use this scheme with different byte layouts;
//! see [`v1`] and [`v2`].

mod error;
mod record;
pub mod v1;
pub mod v2;

pub use error::{DecodeError, IncompleteLog};
pub use record::{DecodedRecord, LogRecord};

use chrono::{Duration as TimeDelta, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::{LogBuffer, ProtocolVersion};

/// Interval assumed until the log announces one
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Byte layout of a device log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEncoding {
    /// PC-mode firmware layout
    V1,
    /// Binary-protocol firmware layout
    V2,
}

impl From<ProtocolVersion> for LogEncoding {
    fn from(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::V1 => LogEncoding::V1,
            ProtocolVersion::V2 => LogEncoding::V2,
        }
    }
}

/// A raw record before the running clock is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    Count(u32),
    Overflow(u32),
    Time(NaiveDateTime),
    Interval(Duration),
}

/// Fail with `Truncated` unless `rest` holds at least `len` bytes
pub(crate) fn need(rest: &[u8], offset: usize, len: usize) -> Result<(), DecodeError> {
    if rest.len() < len {
        return Err(DecodeError::Truncated {
            offset,
            needed: len,
            available: rest.len(),
        });
    }
    Ok(())
}

/// Running state while replaying a log
#[derive(Debug, Clone, Copy)]
struct Clock {
    anchor: Option<NaiveDateTime>,
    /// Time accumulated since the last anchor
    elapsed: TimeDelta,
    interval: Duration,
    carry: u32,
}

impl Clock {
    fn new() -> Self {
        Self {
            anchor: None,
            elapsed: TimeDelta::zero(),
            interval: DEFAULT_INTERVAL,
            carry: 0,
        }
    }

    fn apply(&mut self, token: Token) -> LogRecord {
        match token {
            Token::Count(value) => {
                let timestamp = self
                    .anchor
                    .and_then(|anchor| anchor.checked_add_signed(self.elapsed));
                let step = TimeDelta::from_std(self.interval).unwrap_or(TimeDelta::zero());
                self.elapsed = self.elapsed.checked_add(&step).unwrap_or(self.elapsed);
                let counts = value.saturating_add(self.carry);
                self.carry = 0;
                LogRecord::Count {
                    timestamp,
                    interval: self.interval,
                    counts,
                }
            }
            Token::Overflow(range) => {
                self.carry = self.carry.saturating_add(range);
                LogRecord::Overflow
            }
            Token::Time(time) => {
                self.anchor = Some(time);
                self.elapsed = TimeDelta::zero();
                self.carry = 0;
                LogRecord::TimeMarker(time)
            }
            Token::Interval(interval) => {
                self.interval = interval;
                self.carry = 0;
                LogRecord::ModeChange { interval }
            }
        }
    }
}

/// Lazy iterator over the records of a log buffer
///
/// Yields `Ok` records in log order. A decode failure is yielded once as
/// `Err`, after which the iterator is exhausted. A clone continues from the
/// same position; call [`decode`] again to replay from the start.
#[derive(Debug, Clone)]
pub struct LogRecords<'a> {
    encoding: LogEncoding,
    data: &'a [u8],
    declared_size: usize,
    offset: usize,
    clock: Clock,
    finished: bool,
}

impl<'a> LogRecords<'a> {
    /// Bytes consumed so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn fail(&mut self, error: DecodeError) -> Option<Result<DecodedRecord, DecodeError>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl Iterator for LogRecords<'_> {
    type Item = Result<DecodedRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.offset >= self.data.len() {
            self.finished = true;
            if self.data.len() < self.declared_size {
                // The device announced more than the buffer holds
                return Some(Err(DecodeError::Truncated {
                    offset: self.offset,
                    needed: self.declared_size - self.data.len(),
                    available: 0,
                }));
            }
            return None;
        }

        let token = match self.encoding {
            LogEncoding::V1 => v1::read_token(self.data, self.offset),
            LogEncoding::V2 => v2::read_token(self.data, self.offset),
        };
        match token {
            Ok((token, len)) => {
                let record = DecodedRecord {
                    offset: self.offset,
                    len,
                    record: self.clock.apply(token),
                };
                self.offset += len;
                Some(Ok(record))
            }
            Err(e) => self.fail(e),
        }
    }
}

impl std::iter::FusedIterator for LogRecords<'_> {}

/// Decode `buffer` lazily. At most `declared_size` bytes are read.
pub fn decode(encoding: LogEncoding, buffer: &[u8], declared_size: usize) -> LogRecords<'_> {
    let end = declared_size.min(buffer.len());
    LogRecords {
        encoding,
        data: &buffer[..end],
        declared_size,
        offset: 0,
        clock: Clock::new(),
        finished: false,
    }
}

/// Decode a retrieved log buffer
pub fn decode_log(encoding: LogEncoding, log: &LogBuffer) -> LogRecords<'_> {
    decode(encoding, &log.data, log.declared_size as usize)
}

/// Decode everything, keeping partial results on failure
pub fn decode_all(
    encoding: LogEncoding,
    buffer: &[u8],
    declared_size: usize,
) -> Result<Vec<DecodedRecord>, IncompleteLog> {
    let mut records = Vec::new();
    for item in decode(encoding, buffer, declared_size) {
        match item {
            Ok(record) => records.push(record),
            Err(error) => return Err(IncompleteLog { records, error }),
        }
    }
    Ok(records)
}
