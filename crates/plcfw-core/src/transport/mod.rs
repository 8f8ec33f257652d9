//! Transport layer module.

pub mod mock;
pub mod traits;

pub use mock::{Fault, MockTransport, Op, OpKind};
pub use traits::{DeviceInfo, DeviceState, PlcTransport, TransportError};
