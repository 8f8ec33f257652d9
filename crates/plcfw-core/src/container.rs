//! Firmware container section table.
//!
//! The container is a plain concatenation of `{id, checksum, length}`
//! headers, each followed by `length` payload bytes. Parsing stops as soon
//! as every recognized kind has been seen once.

use std::fmt;

use tracing::{debug, instrument};

use crate::error::LoadError;
use crate::protocol::SectionHeader;
use crate::protocol::constants::*;
use crate::reader::Reader;

/// Kinds of section a firmware container must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    /// Extended boot loader header block.
    Ebl,
    /// Default user configuration shipped with the firmware.
    UserConfig,
    HwVectors,
    GlobalParams,
    CpuImages,
    BinFileHeader,
}

impl SectionKind {
    pub const ALL: [SectionKind; 6] = [
        SectionKind::Ebl,
        SectionKind::UserConfig,
        SectionKind::HwVectors,
        SectionKind::GlobalParams,
        SectionKind::CpuImages,
        SectionKind::BinFileHeader,
    ];

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            SECTION_ID_EBL => Some(SectionKind::Ebl),
            SECTION_ID_USER_CONFIG => Some(SectionKind::UserConfig),
            SECTION_ID_HW_VECTORS => Some(SectionKind::HwVectors),
            SECTION_ID_GLOBAL_PARAMS => Some(SectionKind::GlobalParams),
            SECTION_ID_CPU_IMAGES => Some(SectionKind::CpuImages),
            SECTION_ID_BIN_FILE_HEADER => Some(SectionKind::BinFileHeader),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            SectionKind::Ebl => SECTION_ID_EBL,
            SectionKind::UserConfig => SECTION_ID_USER_CONFIG,
            SectionKind::HwVectors => SECTION_ID_HW_VECTORS,
            SectionKind::GlobalParams => SECTION_ID_GLOBAL_PARAMS,
            SectionKind::CpuImages => SECTION_ID_CPU_IMAGES,
            SectionKind::BinFileHeader => SECTION_ID_BIN_FILE_HEADER,
        }
    }

    fn index(&self) -> usize {
        match self {
            SectionKind::Ebl => 0,
            SectionKind::UserConfig => 1,
            SectionKind::HwVectors => 2,
            SectionKind::GlobalParams => 3,
            SectionKind::CpuImages => 4,
            SectionKind::BinFileHeader => 5,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionKind::Ebl => write!(f, "EBL"),
            SectionKind::UserConfig => write!(f, "User Config"),
            SectionKind::HwVectors => write!(f, "HW Vectors"),
            SectionKind::GlobalParams => write!(f, "Global Params"),
            SectionKind::CpuImages => write!(f, "CPU Images"),
            SectionKind::BinFileHeader => write!(f, "Bin File Header"),
        }
    }
}

/// Location of one section's payload inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    /// Payload offset (just past the section header).
    pub offset: u64,
    pub size: u32,
    pub checksum: u32,
}

impl Section {
    /// Offset one past the last payload byte.
    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }
}

/// One section per [`SectionKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTable {
    // Indexed by `SectionKind::index`
    sections: Vec<Section>,
}

impl SectionTable {
    pub fn get(&self, kind: SectionKind) -> &Section {
        &self.sections[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }
}

/// Walk the container from offset 0 and collect the section table.
///
/// Every section must lie entirely inside the container.
#[instrument(level = "debug", skip(reader))]
pub fn parse_container<R: Reader + ?Sized>(reader: &mut R) -> Result<SectionTable, LoadError> {
    let container_size = reader.size()?;
    let mut found: [Option<Section>; 6] = [None; 6];
    let mut offset: u64 = 0;

    while found.iter().any(Option::is_none) {
        let raw = reader.read_at(offset, SECTION_HEADER_LEN)?;
        let header = SectionHeader::from_bytes(&raw)?;

        let kind = SectionKind::from_id(header.id).ok_or(LoadError::UnsupportedSection {
            id: header.id,
            offset,
        })?;

        let slot = &mut found[kind.index()];
        if slot.is_some() {
            return Err(LoadError::DuplicateSection(kind));
        }

        let section = Section {
            kind,
            offset: offset + SECTION_HEADER_LEN as u64,
            size: header.length,
            checksum: header.checksum,
        };
        if section.end() > container_size {
            return Err(LoadError::ShortRead {
                offset: section.offset,
                requested: section.size as usize,
                actual: container_size.saturating_sub(section.offset) as usize,
            });
        }
        debug!(
            kind = %kind,
            offset = %format!("0x{:X}", section.offset),
            size = section.size,
            checksum = %format!("0x{:08X}", section.checksum),
            "Found section"
        );
        *slot = Some(section);

        offset = section.end();
    }

    let sections = SectionKind::ALL
        .iter()
        .zip(found)
        .map(|(kind, slot)| slot.ok_or(LoadError::MissingSection(*kind)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SectionTable { sections })
}
