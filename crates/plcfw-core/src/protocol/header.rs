//! Wire records of the firmware container.
//!
//! Every record is decoded field by field from a little-endian byte slice.
//! Offsets in the field docs are relative to the start of the record.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::MAX_FLASH_SECTIONS;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small for {record}: expected {expected}, got {actual}")]
    BufferTooSmall {
        record: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn check_len(record: &'static str, data: &[u8], expected: usize) -> Result<(), HeaderError> {
    if data.len() < expected {
        return Err(HeaderError::BufferTooSmall {
            record,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Section header (12 bytes), immediately followed by `length` payload bytes.
///
/// | Offset | Width | Field    |
/// |--------|-------|----------|
/// | 0x00   | 4     | id       |
/// | 0x04   | 4     | checksum |
/// | 0x08   | 4     | length   |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub id: u32,
    pub checksum: u32,
    pub length: u32,
}

impl SectionHeader {
    pub const SIZE: usize = 12;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        check_len("section header", data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            id: cursor.read_u32::<LittleEndian>()?,
            checksum: cursor.read_u32::<LittleEndian>()?,
            length: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.id);
        LittleEndian::write_u32(&mut buf[4..8], self.checksum);
        LittleEndian::write_u32(&mut buf[8..12], self.length);
        buf
    }
}

/// EBL root header (24 bytes) at offset 0 of the EBL section.
///
/// | Offset | Width | Field           |
/// |--------|-------|-----------------|
/// | 0x00   | 4     | bcb_magic       |
/// | 0x04   | 4     | bcb_offset      |
/// | 0x08   | 4     | app_magic       |
/// | 0x0C   | 4     | app_offset      |
/// | 0x10   | 4     | app_launch_addr |
/// | 0x14   | 4     | app_target_addr |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootHeader {
    pub bcb_magic: u32,
    pub bcb_offset: u32,
    pub app_magic: u32,
    pub app_offset: u32,
    pub app_launch_addr: u32,
    /// Default device address of the CPU images.
    pub app_target_addr: u32,
}

impl RootHeader {
    pub const SIZE: usize = 24;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        check_len("EBL root header", data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            bcb_magic: cursor.read_u32::<LittleEndian>()?,
            bcb_offset: cursor.read_u32::<LittleEndian>()?,
            app_magic: cursor.read_u32::<LittleEndian>()?,
            app_offset: cursor.read_u32::<LittleEndian>()?,
            app_launch_addr: cursor.read_u32::<LittleEndian>()?,
            app_target_addr: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.bcb_magic);
        LittleEndian::write_u32(&mut buf[4..8], self.bcb_offset);
        LittleEndian::write_u32(&mut buf[8..12], self.app_magic);
        LittleEndian::write_u32(&mut buf[12..16], self.app_offset);
        LittleEndian::write_u32(&mut buf[16..20], self.app_launch_addr);
        LittleEndian::write_u32(&mut buf[20..24], self.app_target_addr);
        buf
    }
}

/// One flash section descriptor (12 bytes): `magic`, `offset`, `target_addr`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashSectionDescriptor {
    pub magic: u32,
    pub offset: u32,
    pub target_addr: u32,
}

impl FlashSectionDescriptor {
    pub const SIZE: usize = 12;
}

/// Application flash header (60 bytes), directly after the root header.
///
/// | Offset | Width  | Field                          |
/// |--------|--------|--------------------------------|
/// | 0x00   | 4      | spi_magic                      |
/// | 0x04   | 4      | spi_version                    |
/// | 0x08   | 1      | num_sections                   |
/// | 0x09   | 3      | reserved                       |
/// | 0x0C   | 4 x 12 | sections (`FlashSectionDescriptor`) |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppFlashHeader {
    pub spi_magic: u32,
    pub spi_version: u32,
    pub num_sections: u8,
    pub sections: [FlashSectionDescriptor; MAX_FLASH_SECTIONS],
}

impl AppFlashHeader {
    pub const SIZE: usize = 12 + MAX_FLASH_SECTIONS * FlashSectionDescriptor::SIZE;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        check_len("application flash header", data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        let spi_magic = cursor.read_u32::<LittleEndian>()?;
        let spi_version = cursor.read_u32::<LittleEndian>()?;
        let num_sections = cursor.read_u8()?;
        cursor.set_position(12);

        let mut sections = [FlashSectionDescriptor::default(); MAX_FLASH_SECTIONS];
        for section in sections.iter_mut() {
            section.magic = cursor.read_u32::<LittleEndian>()?;
            section.offset = cursor.read_u32::<LittleEndian>()?;
            section.target_addr = cursor.read_u32::<LittleEndian>()?;
        }

        Ok(Self {
            spi_magic,
            spi_version,
            num_sections,
            sections,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.spi_magic);
        LittleEndian::write_u32(&mut buf[4..8], self.spi_version);
        buf[8] = self.num_sections;
        for (i, section) in self.sections.iter().enumerate() {
            let base = 12 + i * FlashSectionDescriptor::SIZE;
            LittleEndian::write_u32(&mut buf[base..base + 4], section.magic);
            LittleEndian::write_u32(&mut buf[base + 4..base + 8], section.offset);
            LittleEndian::write_u32(&mut buf[base + 8..base + 12], section.target_addr);
        }
        buf
    }

    /// Descriptors actually in use (at most four).
    pub fn active_sections(&self) -> &[FlashSectionDescriptor] {
        let count = (self.num_sections as usize).min(MAX_FLASH_SECTIONS);
        &self.sections[..count]
    }
}

/// CPU image header (20 bytes).
///
/// | Offset | Width | Field         |
/// |--------|-------|---------------|
/// | 0x00   | 4     | cpu_id        |
/// | 0x04   | 4     | version       |
/// | 0x08   | 4     | section_count |
/// | 0x0C   | 4     | total_size    |
/// | 0x10   | 4     | checksum      |
///
/// `total_size` spans the header, the section table and all section data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuImageHeader {
    pub cpu_id: u32,
    pub version: u32,
    pub section_count: u32,
    pub total_size: u32,
    /// Byte-sum over the data of all sections.
    pub checksum: u32,
}

impl CpuImageHeader {
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        check_len("CPU image header", data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            cpu_id: cursor.read_u32::<LittleEndian>()?,
            version: cursor.read_u32::<LittleEndian>()?,
            section_count: cursor.read_u32::<LittleEndian>()?,
            total_size: cursor.read_u32::<LittleEndian>()?,
            checksum: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.cpu_id);
        LittleEndian::write_u32(&mut buf[4..8], self.version);
        LittleEndian::write_u32(&mut buf[8..12], self.section_count);
        LittleEndian::write_u32(&mut buf[12..16], self.total_size);
        LittleEndian::write_u32(&mut buf[16..20], self.checksum);
        buf
    }
}

/// Image section header (28 bytes).
///
/// | Offset | Width | Field                         |
/// |--------|-------|-------------------------------|
/// | 0x00   | 16    | name, NUL padded ASCII        |
/// | 0x10   | 4     | address                       |
/// | 0x14   | 4     | offset (from the image start) |
/// | 0x18   | 4     | size                          |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSectionHeader {
    pub name: [u8; 16],
    pub address: u32,
    pub offset: u32,
    pub size: u32,
}

impl ImageSectionHeader {
    pub const SIZE: usize = 28;
    pub const NAME_LEN: usize = 16;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        check_len("image section header", data, Self::SIZE)?;
        let mut name = [0u8; Self::NAME_LEN];
        name.copy_from_slice(&data[..Self::NAME_LEN]);
        let mut cursor = Cursor::new(&data[Self::NAME_LEN..]);
        Ok(Self {
            name,
            address: cursor.read_u32::<LittleEndian>()?,
            offset: cursor.read_u32::<LittleEndian>()?,
            size: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..Self::NAME_LEN].copy_from_slice(&self.name);
        LittleEndian::write_u32(&mut buf[16..20], self.address);
        LittleEndian::write_u32(&mut buf[20..24], self.offset);
        LittleEndian::write_u32(&mut buf[24..28], self.size);
        buf
    }

    /// Build a header with `name` truncated to 16 bytes.
    pub fn new(name: &str, address: u32, offset: u32, size: u32) -> Self {
        let mut raw = [0u8; Self::NAME_LEN];
        let len = name.len().min(Self::NAME_LEN);
        raw[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            name: raw,
            address,
            offset,
            size,
        }
    }

    /// Section name up to the first NUL.
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(Self::NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}
