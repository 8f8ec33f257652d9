//! Extended Boot Loader (EBL) header interpretation.
//!
//! The EBL section tells the host where every other firmware section lives
//! in device memory. It is verified, decoded into a [`TargetAddressTable`],
//! and then written verbatim to [`EBL_LOAD_ADDRESS`] in one piece.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::checksum::WordSum;
use crate::container::Section;
use crate::error::LoadError;
use crate::protocol::constants::*;
use crate::protocol::{AppFlashHeader, RootHeader};
use crate::reader::Reader;
use crate::transport::PlcTransport;

/// Logical placement target of a firmware section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    CpImage,
    BinFileHeader,
    HwVectors,
    GlobalParams,
    UserConfig,
}

impl Destination {
    pub const ALL: [Destination; 5] = [
        Destination::CpImage,
        Destination::BinFileHeader,
        Destination::HwVectors,
        Destination::GlobalParams,
        Destination::UserConfig,
    ];

    /// Map a flash section descriptor magic to its destination.
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            MAGIC_BIN_FILE_HEADER => Some(Destination::BinFileHeader),
            MAGIC_GLOBAL_PARAMS => Some(Destination::GlobalParams),
            MAGIC_HW_VECTORS => Some(Destination::HwVectors),
            MAGIC_USER_CONFIG => Some(Destination::UserConfig),
            MAGIC_APP => Some(Destination::CpImage),
            _ => None,
        }
    }

    fn index(&self) -> usize {
        match self {
            Destination::CpImage => 0,
            Destination::BinFileHeader => 1,
            Destination::HwVectors => 2,
            Destination::GlobalParams => 3,
            Destination::UserConfig => 4,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::CpImage => write!(f, "CP image"),
            Destination::BinFileHeader => write!(f, "bin file header"),
            Destination::HwVectors => write!(f, "HW vectors"),
            Destination::GlobalParams => write!(f, "global params"),
            Destination::UserConfig => write!(f, "user config"),
        }
    }
}

/// Device-physical address per [`Destination`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetAddressTable {
    addresses: [Option<u32>; 5],
}

impl TargetAddressTable {
    pub fn get(&self, dest: Destination) -> Option<u32> {
        self.addresses[dest.index()]
    }

    /// Address for `dest`, or [`LoadError::MissingTarget`].
    pub fn require(&self, dest: Destination) -> Result<u32, LoadError> {
        self.get(dest).ok_or(LoadError::MissingTarget(dest))
    }

    pub fn set(&mut self, dest: Destination, address: u32) {
        self.addresses[dest.index()] = Some(address);
    }
}

/// Decoded EBL root and application headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootLoaderHeader {
    pub root: RootHeader,
    pub app: AppFlashHeader,
}

impl BootLoaderHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self, LoadError> {
        let root = RootHeader::from_bytes(data)?;
        let app = AppFlashHeader::from_bytes(data.get(RootHeader::SIZE..).unwrap_or(&[]))?;
        Ok(Self { root, app })
    }

    /// Resolve the target table from the root default and the descriptors.
    pub fn targets(&self) -> Result<TargetAddressTable, LoadError> {
        let mut table = TargetAddressTable::default();
        table.set(Destination::CpImage, self.root.app_target_addr);

        for desc in self.app.active_sections() {
            let dest = Destination::from_magic(desc.magic)
                .ok_or(LoadError::UnsupportedMagic(desc.magic))?;
            debug!(
                dest = %dest,
                target = %format!("0x{:08X}", desc.target_addr),
                "Flash section descriptor"
            );
            table.set(dest, desc.target_addr);
        }
        Ok(table)
    }
}

/// Verified EBL section contents.
#[derive(Debug, Clone)]
pub struct EblBlock {
    pub bytes: Vec<u8>,
    pub header: BootLoaderHeader,
    pub targets: TargetAddressTable,
}

/// Read the EBL section, check its word-sum and decode it.
pub fn read_ebl<R: Reader + ?Sized>(reader: &mut R, section: &Section) -> Result<EblBlock, LoadError> {
    let bytes = reader.read_at(section.offset, section.size as usize)?;

    let actual = WordSum::of(&bytes);
    if actual != section.checksum {
        return Err(LoadError::ChecksumMismatch {
            target: section.kind.to_string(),
            expected: section.checksum,
            actual,
        });
    }

    let header = BootLoaderHeader::from_bytes(&bytes)?;
    let targets = header.targets()?;
    Ok(EblBlock {
        bytes,
        header,
        targets,
    })
}

/// Verify and decode the EBL, then write it unmodified to the device.
#[instrument(level = "info", skip_all, fields(size = section.size))]
pub fn load_ebl<R, T>(
    reader: &mut R,
    section: &Section,
    transport: &T,
    timeout: Duration,
) -> Result<TargetAddressTable, LoadError>
where
    R: Reader + ?Sized,
    T: PlcTransport + ?Sized,
{
    let ebl = read_ebl(reader, section)?;
    transport.write_memory(EBL_LOAD_ADDRESS, &ebl.bytes, timeout)?;
    info!(
        address = %format!("0x{:08X}", EBL_LOAD_ADDRESS),
        "EBL written"
    );
    Ok(ebl.targets)
}
