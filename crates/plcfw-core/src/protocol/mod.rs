//! Protocol module - container and bootcode wire definitions.

pub mod constants;
pub mod header;

pub use constants::*;
pub use header::{
    AppFlashHeader, CpuImageHeader, FlashSectionDescriptor, HeaderError, ImageSectionHeader,
    RootHeader, SectionHeader,
};
