//! Binary framed protocol (newer firmware)
//!
//! Every request is one [`Frame`]; the device answers with one frame, or for
//! log and config dumps with a size frame followed by sequenced data frames.
//! Checksum failures and timeouts resend the whole request, up to the
//! configured number of transmissions.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use super::{
    frame::{ChecksumKind, Frame, FrameHeader, HEADER_LEN, NAK_COMMAND},
    session::Session,
    Command, CommunicationError, DeviceInfo, LogBuffer, MAX_STREAM_SIZE,
};

/// Length of the `GetVersion` reply payload
pub const VERSION_RECORD_LEN: usize = 16;

/// Driver for the binary framed protocol
pub struct ProtocolV2 {
    session: Session,
    checksum: ChecksumKind,
    /// Transmissions per request, the first one included
    max_attempts: u32,
}

impl ProtocolV2 {
    /// Create a driver. `max_attempts` counts every transmission of a
    /// request, the first one included, so 3 means at most two resends. It is
    /// clamped to at least one.
    pub fn new(session: Session, checksum: ChecksumKind, max_attempts: u32) -> Self {
        Self {
            session,
            checksum,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Access the session (counters, open state)
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Send a request and collect its reply frames, retrying on checksum
    /// errors and timeouts.
    fn request(&mut self, cmd: Command, payload: &[u8]) -> Result<Vec<Frame>, CommunicationError> {
        self.session.ensure_open()?;
        let request = Frame::new(cmd.v2_code(), payload.to_vec()).to_bytes(self.checksum);

        let mut attempt = 1;
        loop {
            match self.try_request(cmd, &request) {
                Ok(frames) => return Ok(frames),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "{:?} failed (attempt {}/{}): {}; retrying",
                        cmd, attempt, self.max_attempts, e
                    );
                    self.session.clear_input()?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single transmission of a request
    fn try_request(
        &mut self,
        cmd: Command,
        request: &[u8],
    ) -> Result<Vec<Frame>, CommunicationError> {
        debug!("v2 {:?}: sending {} bytes", cmd, request.len());
        self.session.write(request)?;

        let first = self.read_frame(cmd)?;
        if !cmd.streams_data() {
            return Ok(vec![first]);
        }

        // Size frame, then sequenced data frames until the size is reached
        let declared = parse_size(&first)?;
        let mut frames = vec![first];
        let mut collected = 0usize;
        let mut expected_seq = 0u8;
        while collected < declared as usize {
            let frame = self.read_frame(cmd)?;
            let Some((&seq, data)) = frame.payload.split_first() else {
                return Err(CommunicationError::Framing(
                    "data frame without sequence marker".into(),
                ));
            };
            if seq != expected_seq {
                return Err(CommunicationError::Framing(format!(
                    "data frame {} received, expected {}",
                    seq, expected_seq
                )));
            }
            collected += data.len();
            if collected > declared as usize {
                return Err(CommunicationError::Framing(format!(
                    "device sent {} bytes, announced {}",
                    collected, declared
                )));
            }
            expected_seq = expected_seq.wrapping_add(1);
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Read header, payload and checksum of one reply frame
    fn read_frame(&mut self, cmd: Command) -> Result<Frame, CommunicationError> {
        let timeout = self
            .session
            .timeout()
            .max(std::time::Duration::from_millis(cmd.timeout_ms()));

        let mut raw = self.session.read_exact_within(HEADER_LEN, timeout)?;
        let header = FrameHeader::parse(&raw)?;
        raw.extend(self.session.read_exact_within(header.length + 1, timeout)?);
        let frame = Frame::from_bytes(&raw, self.checksum)?;

        if frame.command == NAK_COMMAND {
            return Err(CommunicationError::UnexpectedResponse(format!(
                "device rejected {:?} (code {:02x?})",
                cmd, frame.payload
            )));
        }
        if frame.command != cmd.v2_code() {
            return Err(CommunicationError::UnexpectedResponse(format!(
                "reply to {:?} carries command {:#04x}",
                cmd, frame.command
            )));
        }
        Ok(frame)
    }

    fn read_stream(&mut self, cmd: Command) -> Result<LogBuffer, CommunicationError> {
        let frames = self.request(cmd, &[])?;
        let Some((size_frame, data_frames)) = frames.split_first() else {
            return Err(CommunicationError::Framing("no size frame".into()));
        };
        let declared = parse_size(size_frame)?;
        let data: Vec<u8> = data_frames
            .iter()
            .flat_map(|f| f.payload[1..].iter().copied())
            .collect();
        debug!(
            "{:?}: {} bytes in {} frames",
            cmd,
            data.len(),
            data_frames.len()
        );
        LogBuffer::new(declared, data)
    }

    fn expect_empty_ack(&mut self, cmd: Command, payload: &[u8]) -> Result<(), CommunicationError> {
        let frames = self.request(cmd, payload)?;
        match frames.first() {
            Some(f) if f.payload.is_empty() => Ok(()),
            Some(f) => Err(CommunicationError::UnexpectedResponse(format!(
                "{:?} acknowledged with {} payload bytes",
                cmd,
                f.payload.len()
            ))),
            None => Err(CommunicationError::Framing("no reply frame".into())),
        }
    }

    /// Query version, serial number, log fill and clock
    pub fn get_version(&mut self) -> Result<DeviceInfo, CommunicationError> {
        let frames = self.request(Command::GetVersion, &[])?;
        let frame = frames
            .first()
            .ok_or_else(|| CommunicationError::Framing("no reply frame".into()))?;
        parse_version_record(&frame.payload)
    }

    /// Set the device clock to `datetime`
    pub fn set_time(&mut self, datetime: NaiveDateTime) -> Result<(), CommunicationError> {
        let secs = u32::try_from(datetime.and_utc().timestamp()).map_err(|_| {
            CommunicationError::UnexpectedResponse(format!(
                "{} is outside the device clock range",
                datetime
            ))
        })?;
        let mut payload = [0u8; 4];
        LittleEndian::write_u32(&mut payload, secs);
        self.expect_empty_ack(Command::SetTime, &payload)?;
        info!("device clock set to {}", datetime);
        Ok(())
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
        self.read_stream(Command::ReadLog)
    }

    /// Dump the configuration block
    pub fn read_config(&mut self) -> Result<Vec<u8>, CommunicationError> {
        self.read_stream(Command::ReadConfig).map(|buf| buf.data)
    }

    /// Erase the log buffer
    pub fn clear_log(&mut self) -> Result<(), CommunicationError> {
        self.expect_empty_ack(Command::ClearLog, &[])
    }

    /// Factory reset
    pub fn device_reset(&mut self) -> Result<(), CommunicationError> {
        self.expect_empty_ack(Command::DeviceReset, &[])
    }

    /// Release the port
    pub fn close(&mut self) {
        self.session.close();
    }
}

fn parse_size(frame: &Frame) -> Result<u32, CommunicationError> {
    if frame.payload.len() != 4 {
        return Err(CommunicationError::Framing(format!(
            "size frame carries {} bytes, expected 4",
            frame.payload.len()
        )));
    }
    let size = LittleEndian::read_u32(&frame.payload);
    if size as usize > MAX_STREAM_SIZE {
        return Err(CommunicationError::Framing(format!(
            "announced size {} exceeds {}",
            size, MAX_STREAM_SIZE
        )));
    }
    Ok(size)
}

/// Decode the fixed version record.
///
/// The serial and clock fields read zero on firmware that does not report
/// them, so zero maps to `None`. Fill and version are always part of the
/// record; a zero fill is a genuinely empty log buffer and stays `Some(0)`.
pub fn parse_version_record(payload: &[u8]) -> Result<DeviceInfo, CommunicationError> {
    if payload.len() != VERSION_RECORD_LEN {
        return Err(CommunicationError::UnexpectedResponse(format!(
            "version record is {} bytes, expected {}",
            payload.len(),
            VERSION_RECORD_LEN
        )));
    }

    let serial = LittleEndian::read_u32(&payload[0..4]);
    let fill = LittleEndian::read_u32(&payload[4..8]);
    let time = LittleEndian::read_u32(&payload[8..12]);
    let (major, minor) = (payload[12], payload[13]);

    Ok(DeviceInfo {
        datetime: (time != 0)
            .then(|| DateTime::<Utc>::from_timestamp(i64::from(time), 0).map(|dt| dt.naive_utc()))
            .flatten(),
        serial_number: (serial != 0).then_some(serial),
        software_version: Some(format!("{}.{:02}", major, minor)),
        log_buffer_fill: Some(fill),
    })
}
