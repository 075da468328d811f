//! Decoded log records

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One event from the device log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// Events counted during one measurement interval
    Count {
        /// Start of the interval; `None` until the log carried a time marker
        timestamp: Option<NaiveDateTime>,
        /// Length of the interval
        interval: Duration,
        /// Detected events, with any preceding overflow folded in
        counts: u32,
    },
    /// Clock re-anchored to an absolute time
    TimeMarker(NaiveDateTime),
    /// Measurement interval changed
    ModeChange {
        /// Interval used by subsequent counts
        interval: Duration,
    },
    /// The next count exceeded its field and was reconstructed
    Overflow,
}

impl LogRecord {
    /// Counts per minute for a count record
    pub fn counts_per_minute(&self) -> Option<f64> {
        match self {
            LogRecord::Count {
                interval, counts, ..
            } if !interval.is_zero() => Some(f64::from(*counts) * 60.0 / interval.as_secs_f64()),
            _ => None,
        }
    }
}

/// A record together with the bytes it was decoded from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedRecord {
    /// Offset of the first byte in the log buffer
    pub offset: usize,
    /// Number of bytes consumed
    pub len: usize,
    /// The decoded record
    pub record: LogRecord,
}
