//! CPU image handling.
//!
//! Provides image parsing, per-core address remapping and streaming of
//! images to the device.

pub mod cpu_image;
pub mod remap;

pub use cpu_image::{CpuImage, CpuImageLoader, LoadedImage, read_images};
pub use remap::{CoreWindow, CpuId, remap, remap_address};
