//! Synthetic firmware containers for unit tests.

use crate::checksum::{ByteSum, WordSum};
use crate::container::SectionKind;
use crate::protocol::constants::*;
use crate::protocol::{
    AppFlashHeader, CpuImageHeader, FlashSectionDescriptor, ImageSectionHeader, RootHeader,
};

pub const CP_TARGET: u32 = 0x4000_0000;
pub const BIN_HEADER_TARGET: u32 = 0x4100_0000;
pub const GLOBAL_PARAMS_TARGET: u32 = 0x4200_0000;
pub const HW_VECTORS_TARGET: u32 = 0x4300_0000;
pub const USER_CONFIG_TARGET: u32 = 0x4400_0000;
pub const CP_ENTRY: u32 = 0x4000_1000;

/// Appends `{id, checksum, length}` sections back to back.
#[derive(Default)]
pub struct ContainerBuilder {
    data: Vec<u8>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a section verbatim. Returns the payload offset.
    pub fn raw_section(&mut self, id: u32, checksum: u32, payload: &[u8]) -> u64 {
        let header = crate::protocol::SectionHeader {
            id,
            checksum,
            length: payload.len() as u32,
        };
        self.data.extend_from_slice(&header.to_bytes());
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(payload);
        offset
    }

    /// Append a section with a correct word-sum.
    pub fn section(&mut self, kind: SectionKind, payload: &[u8]) -> u64 {
        self.raw_section(kind.id(), WordSum::of(payload), payload)
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

/// EBL block: root header followed by the application flash header.
pub fn ebl_bytes(app_target_addr: u32, descriptors: &[FlashSectionDescriptor]) -> Vec<u8> {
    let root = RootHeader {
        bcb_magic: 0x4243_4221,
        bcb_offset: 0x100,
        app_magic: MAGIC_APP,
        app_offset: 0x200,
        app_launch_addr: app_target_addr,
        app_target_addr,
    };
    let mut app = AppFlashHeader {
        spi_magic: 0x5350_4921,
        spi_version: 1,
        num_sections: descriptors.len() as u8,
        ..Default::default()
    };
    for (slot, desc) in app.sections.iter_mut().zip(descriptors) {
        *slot = *desc;
    }

    let mut out = Vec::new();
    out.extend_from_slice(&root.to_bytes());
    out.extend_from_slice(&app.to_bytes());
    out
}

/// One CPU image with the given `(name, address, data)` sections and a
/// correct byte-sum.
pub fn cpu_image(cpu_id: u32, sections: &[(&str, u32, &[u8])]) -> Vec<u8> {
    let table_len = CpuImageHeader::SIZE + sections.len() * ImageSectionHeader::SIZE;
    let data_len: usize = sections.iter().map(|(_, _, data)| data.len()).sum();

    let mut checksum = ByteSum::new();
    let mut table = Vec::new();
    let mut body = Vec::new();
    for (name, address, data) in sections {
        let offset = (table_len + body.len()) as u32;
        table.extend_from_slice(
            &ImageSectionHeader::new(name, *address, offset, data.len() as u32).to_bytes(),
        );
        body.extend_from_slice(data);
        checksum = checksum.update(data);
    }

    let header = CpuImageHeader {
        cpu_id,
        version: 0x0102_0003,
        section_count: sections.len() as u32,
        total_size: (table_len + data_len) as u32,
        checksum: checksum.finalize(),
    };
    [header.to_bytes().to_vec(), table, body].concat()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed)).collect()
}

/// Well-formed container with every section the loader needs.
pub struct SampleFirmware {
    pub bin_header: Vec<u8>,
    pub global_params: Vec<u8>,
    pub hw_vectors: Vec<u8>,
    pub user_config: Vec<u8>,
    pub images: Vec<Vec<u8>>,
}

impl Default for SampleFirmware {
    fn default() -> Self {
        let text = pattern(300, 1);
        let data = pattern(40, 2);
        Self {
            bin_header: pattern(40, 3),
            global_params: pattern(100, 4),
            hw_vectors: pattern(64, 5),
            user_config: pattern(32, 6),
            images: vec![cpu_image(
                CPU_ID_CP,
                &[("text", CP_ENTRY, &text[..]), ("data", CP_ENTRY + 0x1000, &data[..])],
            )],
        }
    }
}

impl SampleFirmware {
    pub fn ebl(&self) -> Vec<u8> {
        let descriptor = |magic, target_addr| FlashSectionDescriptor {
            magic,
            offset: 0,
            target_addr,
        };
        ebl_bytes(
            CP_TARGET,
            &[
                descriptor(MAGIC_BIN_FILE_HEADER, BIN_HEADER_TARGET),
                descriptor(MAGIC_GLOBAL_PARAMS, GLOBAL_PARAMS_TARGET),
                descriptor(MAGIC_HW_VECTORS, HW_VECTORS_TARGET),
                descriptor(MAGIC_USER_CONFIG, USER_CONFIG_TARGET),
            ],
        )
    }

    pub fn build(&self) -> Vec<u8> {
        let mut builder = ContainerBuilder::new();
        builder.section(SectionKind::Ebl, &self.ebl());
        builder.section(SectionKind::BinFileHeader, &self.bin_header);
        builder.section(SectionKind::CpuImages, &self.images.concat());
        builder.section(SectionKind::GlobalParams, &self.global_params);
        builder.section(SectionKind::HwVectors, &self.hw_vectors);
        builder.section(SectionKind::UserConfig, &self.user_config);
        builder.build()
    }
}
