use dosilink_core::decoder::{DecodedRecord, LogRecord};
use dosilink_core::operation::{parse_operations, run_all, LogFormat, Outcome, RecordSink};
use dosilink_core::protocol::{
    ChecksumKind, Command, Connection, ConnectionConfig, Frame, ProtocolVersion, ScriptHandle,
    ScriptedTransport,
};
use dosilink_core::Error;
use std::io;
use std::path::{Path, PathBuf};

/// Sink that keeps what it was given
#[derive(Default)]
struct MemorySink {
    written: Vec<(LogFormat, PathBuf, Vec<DecodedRecord>)>,
}

impl RecordSink for MemorySink {
    fn write_log(
        &mut self,
        format: LogFormat,
        destination: &Path,
        records: &[DecodedRecord],
    ) -> io::Result<()> {
        self.written
            .push((format, destination.to_path_buf(), records.to_vec()));
        Ok(())
    }
}

fn v2_connection() -> (Connection, ScriptHandle) {
    let mut config = ConnectionConfig::new("scripted", ProtocolVersion::V2);
    config.timeout_ms = 20;
    let (transport, handle) = ScriptedTransport::new();
    (Connection::with_transport(&config, Box::new(transport)), handle)
}

fn reply(cmd: Command, payload: Vec<u8>) -> Vec<u8> {
    Frame::new(cmd.v2_code(), payload).to_bytes(ChecksumKind::Additive)
}

#[test]
fn test_readlog_hands_decoded_records_to_sink() {
    let (conn, handle) = v2_connection();
    let mut stream = reply(Command::ReadLog, 3u32.to_le_bytes().to_vec());
    stream.extend(reply(Command::ReadLog, vec![0, 0x05, 0x81, 0x00]));
    handle.push_reply(stream);

    let ops = parse_operations(&["readlog:csv:dose.csv"]).unwrap();
    let mut sink = MemorySink::default();
    let outcomes = run_all(conn, &ops, &mut sink).unwrap();

    assert_eq!(
        outcomes,
        vec![Outcome::LogWritten {
            format: LogFormat::Csv,
            records: 2
        }]
    );
    let (format, dest, records) = &sink.written[0];
    assert_eq!(*format, LogFormat::Csv);
    assert_eq!(dest, &PathBuf::from("dose.csv"));
    assert!(matches!(
        records[1].record,
        LogRecord::Count { counts: 256, .. }
    ));
    assert!(!handle.is_open());
}

#[test]
fn test_binary_readlog_writes_dump() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.bin");
    let (conn, handle) = v2_connection();
    let mut stream = reply(Command::ReadLog, 2u32.to_le_bytes().to_vec());
    stream.extend(reply(Command::ReadLog, vec![0, 0xF7, 0xF7]));
    handle.push_reply(stream);

    let op = format!("readlog:bin:{}", path.display());
    let ops = parse_operations(&[op]).unwrap();
    let mut sink = MemorySink::default();
    let outcomes = run_all(conn, &ops, &mut sink).unwrap();

    // Undecodable bytes are fine for a raw dump
    assert_eq!(outcomes, vec![Outcome::LogDumped { bytes: 2 }]);
    assert!(sink.written.is_empty());
    assert_eq!(std::fs::read(&path).unwrap(), vec![2, 0, 0, 0, 0xF7, 0xF7]);
}

#[test]
fn test_failure_stops_remaining_operations() {
    let (conn, handle) = v2_connection();
    handle.push_reply(Frame::new(0xEE, vec![0x01]).to_bytes(ChecksumKind::Additive));

    let ops = parse_operations(&["clearlog", "devicereset"]).unwrap();
    let mut sink = MemorySink::default();
    let err = run_all(conn, &ops, &mut sink).unwrap_err();

    assert!(matches!(err, Error::Communication(_)));
    assert_eq!(handle.write_count(), 1);
    assert_eq!(handle.releases(), 1);
}

#[test]
fn test_undecodable_log_keeps_partial_records() {
    let (conn, handle) = v2_connection();
    let mut stream = reply(Command::ReadLog, 2u32.to_le_bytes().to_vec());
    stream.extend(reply(Command::ReadLog, vec![0, 0x05, 0xF7]));
    handle.push_reply(stream);

    let ops = parse_operations(&["readlog:txt:dose.txt"]).unwrap();
    let mut sink = MemorySink::default();
    match run_all(conn, &ops, &mut sink) {
        Err(Error::Incomplete(log)) => assert_eq!(log.records.len(), 1),
        other => panic!("expected incomplete log, got {:?}", other),
    }
}

#[test]
fn test_clock_operations_send_set_time() {
    let (conn, handle) = v2_connection();
    handle.push_reply(reply(Command::SetTime, Vec::new()));
    handle.push_reply(reply(Command::SetTime, Vec::new()));
    handle.push_reply(reply(Command::SetTime, Vec::new()));

    let ops =
        parse_operations(&["synctime", "syncutctime", "settime:2024-06-01 12:30:00"]).unwrap();
    let mut sink = MemorySink::default();
    let outcomes = run_all(conn, &ops, &mut sink).unwrap();

    assert_eq!(outcomes, vec![Outcome::ClockSet; 3]);
    let writes = handle.writes();
    assert_eq!(writes.len(), 3);
    assert!(writes.iter().all(|w| w[1] == Command::SetTime.v2_code()));
    // 2024-06-01 12:30:00 UTC
    assert_eq!(
        writes[2],
        reply(Command::SetTime, 1_717_245_000u32.to_le_bytes().to_vec())
    );
}

#[test]
fn test_readcfg_saves_config_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.cfg");
    let (conn, handle) = v2_connection();
    let mut stream = reply(Command::ReadConfig, 3u32.to_le_bytes().to_vec());
    stream.extend(reply(Command::ReadConfig, vec![0, 0xC0, 0xFF, 0xEE]));
    handle.push_reply(stream);

    let ops = parse_operations(&[format!("readcfg:{}", path.display())]).unwrap();
    let mut sink = MemorySink::default();
    let outcomes = run_all(conn, &ops, &mut sink).unwrap();

    assert_eq!(outcomes, vec![Outcome::ConfigSaved { bytes: 3 }]);
    assert_eq!(std::fs::read(&path).unwrap(), vec![0xC0, 0xFF, 0xEE]);
    assert_eq!(handle.writes(), vec![reply(Command::ReadConfig, Vec::new())]);
}

#[test]
fn test_device_reset_operation() {
    let (conn, handle) = v2_connection();
    handle.push_reply(reply(Command::DeviceReset, Vec::new()));

    let ops = parse_operations(&["devicereset"]).unwrap();
    let mut sink = MemorySink::default();
    assert_eq!(run_all(conn, &ops, &mut sink).unwrap(), vec![Outcome::Reset]);
    assert_eq!(handle.releases(), 1);
}
