//! plcfw-core: firmware load engine for G.hn power-line modems.
//!
//! Takes a device sitting in bootcode, pushes a vendor firmware container
//! and a user configuration into its memory, starts the control processor
//! and waits for the firmware to answer.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Wire constants and little-endian record layouts
//! - **Container / Boot header**: Section table and target addresses
//! - **Transfer / Payload**: Chunked writes, CPU images, address remapping
//! - **Transport**: Bootcode channel abstraction (mock included)
//! - **Device**: Sessions and the three connection phases
//! - **Loader**: High-level orchestrator
//! - **Events**: Observer pattern for UI decoupling
//! - **Analysis**: Offline container inspection
//!
//! # Example
//!
//! ```no_run
//! use plcfw_core::{FirmwareLoader, IoReader, LoaderConfig, MacAddr, MockTransport};
//!
//! let transport = MockTransport::default();
//! let loader = FirmwareLoader::new(&transport, LoaderConfig::default());
//! let mut firmware = IoReader::open("firmware.bin").unwrap();
//! let mut user_config = IoReader::open("user_config.bin").unwrap();
//! let adapter: MacAddr = "02:00:00:00:00:01".parse().unwrap();
//!
//! loader
//!     .load_firmware(adapter, &mut firmware, &mut user_config, false)
//!     .expect("firmware load failed");
//! ```

pub mod analysis;
pub mod boot_header;
pub mod checksum;
pub mod config;
pub mod container;
pub mod device;
pub mod error;
pub mod events;
pub mod loader;
pub mod payload;
pub mod protocol;
pub mod reader;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use analysis::{FirmwareAnalysis, ValidationCheck};
pub use boot_header::{Destination, TargetAddressTable};
pub use config::{ConfigError, LoaderConfig};
pub use container::{Section, SectionKind, SectionTable, parse_container};
pub use device::{DeviceSession, MacAddr};
pub use error::{ErrorKind, LoadError};
pub use events::{LoadEvent, LoadObserver, LoadPhase, NullObserver, TracingObserver};
pub use loader::{FirmwareLoader, load_firmware};
pub use payload::{CpuId, CpuImage};
pub use reader::{IoReader, Reader};
pub use transport::{DeviceState, MockTransport, PlcTransport, TransportError};
