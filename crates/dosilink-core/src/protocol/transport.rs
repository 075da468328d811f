//! Serial transport
//!
//! Raw byte exchange with the dosimeter. The [`Transport`] trait is the seam
//! the protocol layers talk through; [`SerialTransport`] backs it with a real
//! serial port.

use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::cmp::Ordering;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::CommunicationError;

/// Poll interval while waiting for bytes
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Half-duplex byte link to the device
pub trait Transport {
    /// Send bytes
    fn write(&mut self, data: &[u8]) -> Result<(), CommunicationError>;

    /// Block until exactly `n` bytes arrive or `timeout` elapses
    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, CommunicationError>;

    /// Discard anything waiting in the input buffer
    fn clear_input(&mut self) -> Result<(), CommunicationError>;

    /// Release the device. Calling it twice is a no-op.
    fn close(&mut self);

    /// Whether the device is still held
    fn is_open(&self) -> bool;
}

/// Character framing on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineFormat {
    /// 8 data bits, no parity, 1 stop bit
    EightNoneOne,
    /// 7 data bits, even parity, 1 stop bit
    SevenEvenOne,
}

/// Serial line settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Line speed
    pub baud_rate: u32,
    /// Data bits, parity and stop bits
    pub line_format: LineFormat,
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

/// Vendor IDs of the USB-serial bridges found in dosimeter cables
/// (FTDI, Prolific, Silicon Labs, WCH)
const CABLE_VENDORS: [u16; 4] = [0x0403, 0x067B, 0x10C4, 0x1A86];

impl PortInfo {
    fn plain(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }

    /// 0 for a known cable bridge, 1 for other USB devices, 2 otherwise
    fn cable_rank(&self) -> u8 {
        match self.vid {
            Some(vid) if CABLE_VENDORS.contains(&vid) => 0,
            Some(_) => 1,
            None => 2,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::plain(info.port_name),
        }
    }
}

/// Split "COM12" or "/dev/ttyUSB3" into stem and unit number, so that
/// unit 10 sorts after unit 9
fn natural_name(name: &str) -> (&str, Option<u32>) {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    (stem, name[stem.len()..].parse().ok())
}

fn port_order(a: &PortInfo, b: &PortInfo) -> Ordering {
    a.cable_rank()
        .cmp(&b.cable_rank())
        .then_with(|| natural_name(&a.name).cmp(&natural_name(&b.name)))
}

/// Candidate ports, likeliest dosimeter cable first
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match serialport::available_ports() {
        Ok(found) => found.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            warn!("port enumeration failed: {}", e);
            Vec::new()
        }
    };
    ports.sort_by(port_order);
    ports.dedup_by(|a, b| a.name == b.name);
    debug!("{} candidate ports", ports.len());
    ports
}

/// Transport over a real serial port
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    /// Open the port exclusively and configure the line
    pub fn open(path: &str, settings: SerialSettings) -> Result<Self, CommunicationError> {
        let (data_bits, parity) = match settings.line_format {
            LineFormat::EightNoneOne => (serialport::DataBits::Eight, serialport::Parity::None),
            LineFormat::SevenEvenOne => (serialport::DataBits::Seven, serialport::Parity::Even),
        };

        let mut port = serialport::new(path, settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            // Short port timeout; the real deadline is enforced in read_exact
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| CommunicationError::Unavailable(format!("{}: {}", path, e)))?;

        // serialport takes TIOCEXCL on unix, so the handle is already exclusive
        if let Err(e) = port.write_data_terminal_ready(true) {
            warn!("failed to assert DTR on {}: {} (continuing)", path, e);
        }
        port.clear(serialport::ClearBuffer::All)?;

        debug!(
            "opened {} at {} baud ({:?})",
            path, settings.baud_rate, settings.line_format
        );

        Ok(Self {
            port: Some(port),
            name: path.to_string(),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, CommunicationError> {
        self.port.as_mut().ok_or(CommunicationError::Closed)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), CommunicationError> {
        let port = self.port()?;
        debug!("tx {} bytes: {:02x?}", data.len(), data);
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    // Polls bytes_to_read() instead of trusting blocking reads, which do not
    // honour the port timeout reliably on every platform.
    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, CommunicationError> {
        let port = self.port()?;
        let mut buf = vec![0u8; n];
        let start = Instant::now();
        let mut offset = 0;

        while offset < n {
            if start.elapsed() > timeout {
                debug!("rx timed out after {} of {} bytes", offset, n);
                return Err(CommunicationError::Timeout {
                    expected: n,
                    received: offset,
                });
            }

            let available = port.bytes_to_read()? as usize;
            if available == 0 {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }

            let to_read = available.min(n - offset);
            match port.read(&mut buf[offset..offset + to_read]) {
                Ok(0) => {
                    return Err(CommunicationError::Timeout {
                        expected: n,
                        received: offset,
                    })
                }
                Ok(k) => offset += k,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!("rx {} bytes: {:02x?}", n, buf);
        Ok(buf)
    }

    fn clear_input(&mut self) -> Result<(), CommunicationError> {
        self.port()?.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("closed {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    fn usb(name: &str, vid: u16) -> PortInfo {
        PortInfo {
            vid: Some(vid),
            pid: Some(0x6001),
            ..PortInfo::plain(name.to_string())
        }
    }

    #[test]
    fn test_natural_name() {
        assert_eq!(natural_name("COM12"), ("COM", Some(12)));
        assert_eq!(natural_name("/dev/ttyUSB3"), ("/dev/ttyUSB", Some(3)));
        assert_eq!(natural_name("/dev/cu.usbserial"), ("/dev/cu.usbserial", None));
    }

    #[test]
    fn test_cable_bridges_rank_first() {
        let mut ports = vec![
            PortInfo::plain("/dev/ttyS0".into()),
            usb("/dev/ttyACM0", 0x2341),
            usb("/dev/ttyUSB10", 0x0403),
            usb("/dev/ttyUSB9", 0x067B),
        ];
        ports.sort_by(port_order);
        let ordered: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            ordered,
            vec!["/dev/ttyUSB9", "/dev/ttyUSB10", "/dev/ttyACM0", "/dev/ttyS0"]
        );
    }

    #[test]
    fn test_open_missing_device_is_unavailable() {
        let settings = SerialSettings {
            baud_rate: 9600,
            line_format: LineFormat::EightNoneOne,
        };
        match SerialTransport::open("/dev/does-not-exist-dosilink", settings) {
            Err(CommunicationError::Unavailable(msg)) => assert!(msg.contains("does-not-exist")),
            Err(other) => panic!("expected Unavailable, got {:?}", other),
            Ok(_) => panic!("opening a missing device must fail"),
        }
    }
}
