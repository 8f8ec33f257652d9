//! Bootcode transport abstraction.
//!
//! Defines the `PlcTransport` trait for the raw-Ethernet management channel,
//! allowing different implementations (a real L2 backend, mock, etc.).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::device::{DeviceSession, MacAddr};
use crate::payload::{CpuId, CpuImage};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("No session open")]
    NotConnected,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Request rejected by device: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn timeout(timeout: Duration) -> Self {
        TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Lifecycle state reported by a device query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// ROM bootcode waiting for an image.
    Bootcode,
    /// Downloaded firmware is up.
    FirmwareRunning,
    /// Any other raw state value.
    Other(u8),
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Bootcode => write!(f, "bootcode"),
            DeviceState::FirmwareRunning => write!(f, "firmware running"),
            DeviceState::Other(raw) => write!(f, "unknown (0x{:02X})", raw),
        }
    }
}

/// Answer to a device query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub state: DeviceState,
    pub mac: MacAddr,
}

/// Abstract bootcode transport.
///
/// Every call is a blocking request/confirmation exchange. Implementations
/// report an expired confirmation as [`TransportError::Timeout`] so callers
/// can tell it apart from a hard failure.
pub trait PlcTransport: Send + Sync {
    /// Open a session described by `session`.
    fn connect(&self, session: &DeviceSession) -> Result<(), TransportError>;

    /// Close the current session.
    fn disconnect(&self) -> Result<(), TransportError>;

    /// Ask the peer for its state and MAC address.
    fn query_device(&self, timeout: Duration) -> Result<DeviceInfo, TransportError>;

    /// Write raw bytes to device memory.
    fn write_memory(&self, address: u32, data: &[u8], timeout: Duration)
    -> Result<(), TransportError>;

    /// Announce the CPU image whose data follows.
    fn set_image_header(&self, image: &CpuImage) -> Result<(), TransportError>;

    /// Send one packet of CPU image data.
    fn set_image_data(&self, address: u32, data: &[u8]) -> Result<(), TransportError>;

    /// Start `cpu` at `address`.
    fn execute(&self, address: u32, cpu: CpuId) -> Result<(), TransportError>;

    /// Have the bootcode copy the control processor image into place.
    fn init_copy(&self) -> Result<(), TransportError>;

    /// Decompress a block staged at `source` into `destination`.
    fn decompress(&self, source: u32, destination: u32) -> Result<(), TransportError>;
}

impl<T: PlcTransport + ?Sized> PlcTransport for &T {
    fn connect(&self, session: &DeviceSession) -> Result<(), TransportError> {
        (**self).connect(session)
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        (**self).disconnect()
    }

    fn query_device(&self, timeout: Duration) -> Result<DeviceInfo, TransportError> {
        (**self).query_device(timeout)
    }

    fn write_memory(
        &self,
        address: u32,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        (**self).write_memory(address, data, timeout)
    }

    fn set_image_header(&self, image: &CpuImage) -> Result<(), TransportError> {
        (**self).set_image_header(image)
    }

    fn set_image_data(&self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        (**self).set_image_data(address, data)
    }

    fn execute(&self, address: u32, cpu: CpuId) -> Result<(), TransportError> {
        (**self).execute(address, cpu)
    }

    fn init_copy(&self) -> Result<(), TransportError> {
        (**self).init_copy()
    }

    fn decompress(&self, source: u32, destination: u32) -> Result<(), TransportError> {
        (**self).decompress(source, destination)
    }
}
