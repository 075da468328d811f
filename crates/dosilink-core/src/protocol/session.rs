//! Connection session
//!
//! Owns the transport handle and its lifecycle. The port is opened on first
//! use and released exactly once, either by an explicit [`Session::close`]
//! or when the session is dropped.

use std::time::Duration;
use tracing::{debug, info};

use super::{
    transport::{SerialSettings, SerialTransport},
    CommunicationError, Transport,
};

/// Where the session is in its lifecycle
enum Link {
    /// Not opened yet; holds what is needed to open it
    Pending {
        path: String,
        settings: SerialSettings,
    },
    /// Transport is held
    Open(Box<dyn Transport>),
    /// Released; cannot be reopened
    Closed,
}

/// Exclusive owner of the device transport
pub struct Session {
    link: Link,
    timeout: Duration,
    tx_bytes: u64,
    rx_bytes: u64,
}

impl Session {
    /// A session that opens `path` on first use
    pub fn lazy(path: impl Into<String>, settings: SerialSettings, timeout: Duration) -> Self {
        Self {
            link: Link::Pending {
                path: path.into(),
                settings,
            },
            timeout,
            tx_bytes: 0,
            rx_bytes: 0,
        }
    }

    /// A session around an already opened transport
    pub fn with_transport(transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Self {
            link: Link::Open(transport),
            timeout,
            tx_bytes: 0,
            rx_bytes: 0,
        }
    }

    /// Configured per-read timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the transport is currently held
    pub fn is_open(&self) -> bool {
        matches!(self.link, Link::Open(_))
    }

    /// Cumulative (tx, rx) byte counters
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    /// Open the transport if it is still pending
    pub fn ensure_open(&mut self) -> Result<(), CommunicationError> {
        if let Link::Pending { path, settings } = &self.link {
            let transport = SerialTransport::open(path, *settings)?;
            info!("connected to {}", path);
            self.link = Link::Open(Box::new(transport));
        }
        match self.link {
            Link::Open(_) => Ok(()),
            _ => Err(CommunicationError::Closed),
        }
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>, CommunicationError> {
        self.ensure_open()?;
        match &mut self.link {
            Link::Open(t) => Ok(t),
            _ => Err(CommunicationError::Closed),
        }
    }

    /// Send bytes
    pub fn write(&mut self, data: &[u8]) -> Result<(), CommunicationError> {
        self.transport()?.write(data)?;
        self.tx_bytes = self.tx_bytes.saturating_add(data.len() as u64);
        Ok(())
    }

    /// Read exactly `n` bytes within `timeout`
    pub fn read_exact_within(
        &mut self,
        n: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, CommunicationError> {
        let data = self.transport()?.read_exact(n, timeout)?;
        self.rx_bytes = self.rx_bytes.saturating_add(data.len() as u64);
        Ok(data)
    }

    /// Drop stale input before resending
    pub fn clear_input(&mut self) -> Result<(), CommunicationError> {
        self.transport()?.clear_input()
    }

    /// Release the transport. Safe to call more than once.
    pub fn close(&mut self) {
        if let Link::Open(transport) = &mut self.link {
            transport.close();
            debug!(
                "session closed (tx {} bytes, rx {} bytes)",
                self.tx_bytes, self.rx_bytes
            );
        }
        self.link = Link::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
