//! Log encoding of PC-mode firmware
//!
//! | Bytes                        | Record                                  |
//! |------------------------------|-----------------------------------------|
//! | `0x00..=0xEF b1`             | count, big-endian, below `0xF000`       |
//! | `0xF0`                       | overflow, adds `0xF000` to next count   |
//! | `0xF5 0xEF mm hh DD MM YY`   | time marker, BCD, years from 2000       |
//! | `0xF5 code`                  | interval change, see [`interval_for`]   |

use chrono::NaiveDate;
use std::time::Duration;

use super::{need, DecodeError, Token};

/// Range of a single count field
pub const COUNT_RANGE: u32 = 0xF000;

const OVERFLOW: u8 = 0xF0;
const ESCAPE: u8 = 0xF5;
const TIME_MARKER: u8 = 0xEF;
const TIME_MARKER_LEN: usize = 7;

/// Interval selected by a mode code
pub fn interval_for(code: u8) -> Option<Duration> {
    let secs = match code {
        0x01 => 10,
        0x02 => 30,
        0x03 => 60,
        0x04 => 120,
        0x05 => 300,
        0x06 => 600,
        0x07 => 1800,
        0x08 => 3600,
        0x09 => 7200,
        0x0A => 43_200,
        0x0B => 86_400,
        0x0C => 604_800,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

fn bcd(byte: u8) -> Option<u32> {
    let (hi, lo) = (byte >> 4, byte & 0x0F);
    (hi <= 9 && lo <= 9).then(|| u32::from(hi * 10 + lo))
}

/// Read one token starting at `offset`
pub(crate) fn read_token(data: &[u8], offset: usize) -> Result<(Token, usize), DecodeError> {
    let rest = &data[offset..];
    let tag = rest[0];
    match tag {
        0x00..=0xEF => {
            need(rest, offset, 2)?;
            let value = u32::from(u16::from_be_bytes([rest[0], rest[1]]));
            Ok((Token::Count(value), 2))
        }
        OVERFLOW => Ok((Token::Overflow(COUNT_RANGE), 1)),
        ESCAPE => {
            need(rest, offset, 2)?;
            match rest[1] {
                TIME_MARKER => {
                    need(rest, offset, TIME_MARKER_LEN)?;
                    let field = |i: usize| bcd(rest[i]);
                    let invalid = DecodeError::InvalidField {
                        offset,
                        field: "BCD timestamp",
                    };
                    let (Some(min), Some(hour), Some(day), Some(month), Some(year)) =
                        (field(2), field(3), field(4), field(5), field(6))
                    else {
                        return Err(invalid);
                    };
                    let time = NaiveDate::from_ymd_opt(2000 + year as i32, month, day)
                        .and_then(|d| d.and_hms_opt(hour, min, 0))
                        .ok_or(invalid)?;
                    Ok((Token::Time(time), TIME_MARKER_LEN))
                }
                code => match interval_for(code) {
                    Some(interval) => Ok((Token::Interval(interval), 2)),
                    None => Err(DecodeError::InvalidTag {
                        offset: offset + 1,
                        tag: code,
                    }),
                },
            }
        }
        _ => Err(DecodeError::InvalidTag { offset, tag }),
    }
}
