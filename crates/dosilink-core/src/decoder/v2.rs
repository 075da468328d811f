//! Log encoding of binary-protocol firmware
//!
//! | Bytes               | Record                                   |
//! |---------------------|------------------------------------------|
//! | `0x00..=0x7F`       | count, value is the byte                 |
//! | `0x80..=0xBF b1`    | count, 14 bits `(b0 & 0x3F) << 8 \| b1`  |
//! | `0xC0`              | overflow, adds `0x4000` to next count    |
//! | `0xD0 u32`          | time marker, unix seconds, little-endian |
//! | `0xE0 u16`          | interval change, seconds, little-endian  |

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::{need, DecodeError, Token};

/// Range of a single count field
pub const COUNT_RANGE: u32 = 0x4000;

const OVERFLOW: u8 = 0xC0;
const TIME_MARKER: u8 = 0xD0;
const MODE_CHANGE: u8 = 0xE0;

/// Read one token starting at `offset`
pub(crate) fn read_token(data: &[u8], offset: usize) -> Result<(Token, usize), DecodeError> {
    let rest = &data[offset..];
    let tag = rest[0];
    match tag {
        0x00..=0x7F => Ok((Token::Count(u32::from(tag)), 1)),
        0x80..=0xBF => {
            need(rest, offset, 2)?;
            let value = (u32::from(tag & 0x3F) << 8) | u32::from(rest[1]);
            Ok((Token::Count(value), 2))
        }
        OVERFLOW => Ok((Token::Overflow(COUNT_RANGE), 1)),
        TIME_MARKER => {
            need(rest, offset, 5)?;
            let secs = LittleEndian::read_u32(&rest[1..5]);
            let time = DateTime::<Utc>::from_timestamp(i64::from(secs), 0)
                .map(|dt| dt.naive_utc())
                .ok_or(DecodeError::InvalidField {
                    offset,
                    field: "timestamp",
                })?;
            Ok((Token::Time(time), 5))
        }
        MODE_CHANGE => {
            need(rest, offset, 3)?;
            let secs = LittleEndian::read_u16(&rest[1..3]);
            if secs == 0 {
                return Err(DecodeError::InvalidField {
                    offset,
                    field: "interval",
                });
            }
            Ok((Token::Interval(Duration::from_secs(u64::from(secs))), 3))
        }
        _ => Err(DecodeError::InvalidTag { offset, tag }),
    }
}
