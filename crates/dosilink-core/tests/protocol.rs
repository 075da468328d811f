use chrono::NaiveDate;
use dosilink_core::decoder::{decode_log, LogEncoding};
use dosilink_core::protocol::{
    ChecksumKind, Command, CommunicationError, Connection, ConnectionConfig, Frame,
    ProtocolVersion, ScriptHandle, ScriptedTransport,
};
use dosilink_core::{error::PC_MODE_HINT, Error};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

fn scripted(protocol: ProtocolVersion, max_retries: u32) -> (Connection, ScriptHandle) {
    init_tracing();
    let mut config = ConnectionConfig::new("scripted", protocol);
    config.timeout_ms = 20;
    config.max_retries = max_retries;
    let (transport, handle) = ScriptedTransport::new();
    (Connection::with_transport(&config, Box::new(transport)), handle)
}

fn v2_reply(cmd: Command, payload: Vec<u8>) -> Vec<u8> {
    Frame::new(cmd.v2_code(), payload).to_bytes(ChecksumKind::Additive)
}

fn corrupt(mut frame: Vec<u8>) -> Vec<u8> {
    if let Some(last) = frame.last_mut() {
        *last = last.wrapping_add(1);
    }
    frame
}

#[test]
fn test_v1_identify_reports_only_present_fields() {
    let (mut conn, handle) = scripted(ProtocolVersion::V1, 3);
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    handle.push_reply(b"SN=4242;VER=5.10\r\n".to_vec());

    let info = conn.get_version().unwrap();
    assert_eq!(info.serial_number, Some(4242));
    assert_eq!(info.software_version.as_deref(), Some("5.10"));
    assert_eq!(info.datetime, None);
    assert_eq!(info.log_buffer_fill, None);
}

#[test]
fn test_v1_read_log_returns_announced_bytes() {
    let (mut conn, handle) = scripted(ProtocolVersion::V1, 3);
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    let mut dump = b"4\r\n".to_vec();
    dump.extend_from_slice(&[0x00, 0x05, 0x00, 0x07]);
    handle.push_reply(dump);

    let log = conn.read_log().unwrap();
    assert_eq!(log.declared_size, 4);
    assert_eq!(log.data, vec![0x00, 0x05, 0x00, 0x07]);
    assert_eq!(handle.writes()[1], b"b\r\n".to_vec());
}

#[test]
fn test_v1_short_log_is_framing_error() {
    let (mut conn, handle) = scripted(ProtocolVersion::V1, 3);
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    let mut dump = b"10\r\n".to_vec();
    dump.extend_from_slice(&[0u8; 6]);
    handle.push_reply(dump);

    assert!(matches!(
        conn.read_log(),
        Err(CommunicationError::Framing(_))
    ));
}

#[test]
fn test_v1_silent_device_gets_pc_mode_hint() {
    let (mut conn, _handle) = scripted(ProtocolVersion::V1, 3);
    let err = Error::from(conn.get_version().unwrap_err());
    assert_eq!(err.hint(conn.version()), Some(PC_MODE_HINT));
}

#[test]
fn test_v1_failure_rewakes_on_next_command() {
    let (mut conn, handle) = scripted(ProtocolVersion::V1, 3);
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    handle.push_reply(b"FAIL\r\n".to_vec());
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    handle.push_reply(b"OK\r\n".to_vec());

    assert!(conn.clear_log().is_err());
    conn.clear_log().unwrap();

    let writes = handle.writes();
    assert_eq!(writes[0], b"P".to_vec());
    assert_eq!(writes[2], b"P".to_vec());
}

#[test]
fn test_v1_close_leaves_pc_mode() {
    let (mut conn, handle) = scripted(ProtocolVersion::V1, 3);
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    handle.push_reply(b"OK\r\n".to_vec());
    handle.push_reply(b"OK\r\n".to_vec());

    conn.clear_log().unwrap();
    conn.close();
    assert_eq!(handle.writes().last(), Some(&b"X".to_vec()));
    assert!(!handle.is_open());
}

fn is_time_command(write: &[u8]) -> bool {
    write.len() == 15
        && write[0] == b't'
        && write[1..13].iter().all(u8::is_ascii_digit)
        && write.ends_with(b"\r\n")
}

#[test]
fn test_v1_set_time_accepts_matching_echo() {
    let (mut conn, handle) = scripted(ProtocolVersion::V1, 3);
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    handle.push_echo();

    let when = NaiveDate::from_ymd_opt(2024, 3, 9)
        .and_then(|d| d.and_hms_opt(14, 5, 7))
        .unwrap();
    conn.set_time(when).unwrap();
    assert_eq!(handle.writes()[1], b"t090324140507\r\n".to_vec());
}

#[test]
fn test_v1_sync_time_local_and_utc() {
    let (mut conn, handle) = scripted(ProtocolVersion::V1, 3);
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    handle.push_echo();
    handle.push_echo();

    conn.sync_time(false).unwrap();
    conn.sync_time(true).unwrap();

    let writes = handle.writes();
    assert_eq!(writes.len(), 3);
    assert!(is_time_command(&writes[1]), "{:?}", writes[1]);
    assert!(is_time_command(&writes[2]), "{:?}", writes[2]);
}

#[test]
fn test_v1_read_config() {
    let (mut conn, handle) = scripted(ProtocolVersion::V1, 3);
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    let mut dump = b"3\r\n".to_vec();
    dump.extend_from_slice(&[1, 2, 3]);
    handle.push_reply(dump);

    assert_eq!(conn.read_config().unwrap(), vec![1, 2, 3]);
    assert_eq!(handle.writes()[1], b"c\r\n".to_vec());
}

#[test]
fn test_v1_empty_log_decodes_to_nothing() {
    let (mut conn, handle) = scripted(ProtocolVersion::V1, 3);
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    handle.push_reply(b"0\r\n".to_vec());

    let log = conn.read_log().unwrap();
    assert_eq!(log.declared_size, 0);
    assert!(log.is_empty());
    assert_eq!(decode_log(LogEncoding::V1, &log).count(), 0);
}

#[test]
fn test_v1_device_reset_requires_new_wake() {
    let (mut conn, handle) = scripted(ProtocolVersion::V1, 3);
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    handle.push_reply(b"OK\r\n".to_vec());
    handle.push_reply(b"PC-Mode\r\n".to_vec());
    handle.push_reply(b"OK\r\n".to_vec());

    conn.device_reset().unwrap();
    conn.clear_log().unwrap();

    let writes = handle.writes();
    assert_eq!(
        writes,
        vec![
            b"P".to_vec(),
            b"i\r\n".to_vec(),
            b"P".to_vec(),
            b"z\r\n".to_vec()
        ]
    );
}

#[test]
fn test_v2_persistent_checksum_error_exhausts_retries() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 3);
    for _ in 0..5 {
        handle.push_reply(corrupt(v2_reply(Command::ClearLog, Vec::new())));
    }

    assert!(matches!(
        conn.clear_log(),
        Err(CommunicationError::Checksum { .. })
    ));
    assert_eq!(handle.write_count(), 3);
    assert!(handle
        .writes()
        .iter()
        .all(|w| w == &v2_reply(Command::ClearLog, Vec::new())));
}

#[test]
fn test_v2_checksum_recovers_on_second_attempt() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 3);
    let mut record = vec![0u8; 16];
    record[0..4].copy_from_slice(&99u32.to_le_bytes());
    record[12] = 2;
    record[13] = 1;
    handle.push_reply(corrupt(v2_reply(Command::GetVersion, record.clone())));
    handle.push_reply(v2_reply(Command::GetVersion, record));

    let info = conn.get_version().unwrap();
    assert_eq!(info.serial_number, Some(99));
    assert_eq!(info.software_version.as_deref(), Some("2.01"));
    assert_eq!(handle.write_count(), 2);
}

#[test]
fn test_v2_single_transmission_when_retries_is_one() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 1);
    assert!(conn.device_reset().unwrap_err().is_timeout());
    assert_eq!(handle.write_count(), 1);
}

#[test]
fn test_v2_set_time_sends_unix_seconds() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 3);
    handle.push_reply(v2_reply(Command::SetTime, Vec::new()));

    let when = chrono::DateTime::<chrono::Utc>::from_timestamp(1_700_000_000, 0)
        .unwrap()
        .naive_utc();
    conn.set_time(when).unwrap();
    assert_eq!(
        handle.writes()[0],
        v2_reply(Command::SetTime, 1_700_000_000u32.to_le_bytes().to_vec())
    );
}

#[test]
fn test_close_is_idempotent() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 3);
    conn.close();
    conn.close();
    drop(conn);
    assert_eq!(handle.releases(), 1);
}

#[test]
fn test_operations_after_close_fail() {
    let (mut conn, _handle) = scripted(ProtocolVersion::V2, 3);
    conn.close();
    assert!(matches!(conn.clear_log(), Err(CommunicationError::Closed)));
}

#[test]
fn test_counters_track_traffic() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 3);
    handle.push_reply(v2_reply(Command::ClearLog, Vec::new()));
    conn.clear_log().unwrap();
    // 5 byte request, 5 byte empty ack
    assert_eq!(conn.counters(), (5, 5));
}

#[test]
fn test_v2_read_config() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 3);
    let mut stream = v2_reply(Command::ReadConfig, 3u32.to_le_bytes().to_vec());
    stream.extend(v2_reply(Command::ReadConfig, vec![0, 1, 2, 3]));
    handle.push_reply(stream);

    assert_eq!(conn.read_config().unwrap(), vec![1, 2, 3]);
    assert_eq!(handle.writes()[0], v2_reply(Command::ReadConfig, Vec::new()));
}

#[test]
fn test_v2_empty_log_decodes_to_nothing() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 3);
    handle.push_reply(v2_reply(Command::ReadLog, 0u32.to_le_bytes().to_vec()));

    let log = conn.read_log().unwrap();
    assert_eq!(log.declared_size, 0);
    assert_eq!(decode_log(LogEncoding::V2, &log).count(), 0);
    assert_eq!(handle.pending_replies(), 0);
}

#[test]
fn test_v2_out_of_order_frames_are_rejected() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 3);
    let mut stream = v2_reply(Command::ReadLog, 4u32.to_le_bytes().to_vec());
    stream.extend(v2_reply(Command::ReadLog, vec![1, 3, 4]));
    stream.extend(v2_reply(Command::ReadLog, vec![0, 1, 2]));
    handle.push_reply(stream);

    assert!(matches!(
        conn.read_log(),
        Err(CommunicationError::Framing(_))
    ));
    assert_eq!(handle.write_count(), 1);
}

#[test]
fn test_v2_device_reset_acknowledged() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 3);
    handle.push_reply(v2_reply(Command::DeviceReset, Vec::new()));

    conn.device_reset().unwrap();
    assert_eq!(handle.writes(), vec![v2_reply(Command::DeviceReset, Vec::new())]);
}

#[test]
fn test_v2_sync_time_sends_current_clock() {
    let (mut conn, handle) = scripted(ProtocolVersion::V2, 3);
    handle.push_reply(v2_reply(Command::SetTime, Vec::new()));
    handle.push_reply(v2_reply(Command::SetTime, Vec::new()));

    let before = chrono::Utc::now().timestamp();
    conn.sync_time(true).unwrap();
    conn.sync_time(false).unwrap();
    let after = chrono::Utc::now().timestamp();

    let writes = handle.writes();
    let utc = Frame::from_bytes(&writes[0], ChecksumKind::Additive).unwrap();
    assert_eq!(utc.command, Command::SetTime.v2_code());
    let secs = i64::from(u32::from_le_bytes(utc.payload[..4].try_into().unwrap()));
    assert!((before..=after).contains(&secs));

    let local = Frame::from_bytes(&writes[1], ChecksumKind::Additive).unwrap();
    assert_eq!(local.payload.len(), 4);
}
