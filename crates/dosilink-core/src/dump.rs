//! Raw dump files
//!
//! A raw log dump is the announced size as a little-endian `u32`, followed
//! by the undecoded payload. Config dumps are the bytes as received.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

use crate::protocol::{LogBuffer, MAX_STREAM_SIZE};

/// Write a raw log dump
pub fn write_raw_log<W: Write>(mut writer: W, log: &LogBuffer) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(log.declared_size)?;
    writer.write_all(&log.data)?;
    writer.flush()
}

/// Read a raw log dump back
pub fn read_raw_log<R: Read>(mut reader: R) -> io::Result<LogBuffer> {
    let declared = reader.read_u32::<LittleEndian>()?;
    if declared as usize > MAX_STREAM_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("dump declares {} bytes, limit is {}", declared, MAX_STREAM_SIZE),
        ));
    }
    let mut data = vec![0u8; declared as usize];
    reader.read_exact(&mut data)?;

    let mut extra = [0u8; 1];
    if reader.read(&mut extra)? != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("trailing data after {} declared bytes", declared),
        ));
    }
    LogBuffer::new(declared, data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Save a raw log dump to `path`
pub fn save_raw_log<P: AsRef<Path>>(path: P, log: &LogBuffer) -> io::Result<()> {
    let path = path.as_ref();
    write_raw_log(BufWriter::new(File::create(path)?), log)?;
    debug!("wrote {} byte log dump to {}", log.declared_size, path.display());
    Ok(())
}

/// Load a raw log dump from `path`
pub fn load_raw_log<P: AsRef<Path>>(path: P) -> io::Result<LogBuffer> {
    read_raw_log(BufReader::new(File::open(path)?))
}

/// Save a config block verbatim
pub fn save_config<P: AsRef<Path>>(path: P, config: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    std::fs::write(path, config)?;
    debug!("wrote {} config bytes to {}", config.len(), path.display());
    Ok(())
}
