//! Multi-core CPU image loading.
//!
//! The CPU-images section is a concatenation of images, each laid out as
//! `CpuImageHeader | ImageSectionHeader * section_count | section data`.
//! `total_size` covers all three parts, so the next image starts at
//! `image_start + total_size`.

use tracing::{debug, info, instrument};

use super::remap::{CpuId, remap};
use crate::config::ConfigError;
use crate::container::Section;
use crate::error::LoadError;
use crate::events::{LoadEvent, LoadObserver};
use crate::protocol::{CpuImageHeader, ImageSectionHeader};
use crate::reader::Reader;
use crate::transfer::{ChunkedTransfer, ImageDataWrite};
use crate::transport::PlcTransport;

/// One CPU image as found in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuImage {
    /// Container offset of the image header.
    pub offset: u64,
    pub header: CpuImageHeader,
    pub sections: Vec<ImageSectionHeader>,
}

impl CpuImage {
    /// Read and bounds-check the image at `offset`. `limit` is the end of
    /// the enclosing CPU-images section.
    pub fn read<R: Reader + ?Sized>(
        reader: &mut R,
        offset: u64,
        limit: u64,
    ) -> Result<Self, LoadError> {
        let malformed = |reason: String| LoadError::MalformedImage { offset, reason };

        if offset + CpuImageHeader::SIZE as u64 > limit {
            return Err(malformed("header runs past the CPU images section".into()));
        }
        let header = CpuImageHeader::from_bytes(&reader.read_at(offset, CpuImageHeader::SIZE)?)?;

        if header.section_count == 0 {
            return Err(malformed("image has no sections".into()));
        }
        let table_len =
            CpuImageHeader::SIZE as u64 + header.section_count as u64 * ImageSectionHeader::SIZE as u64;
        let total = header.total_size as u64;
        if total < table_len {
            return Err(malformed(format!(
                "total size {} smaller than its {} section headers",
                total, header.section_count
            )));
        }
        if offset + total > limit {
            return Err(malformed(format!(
                "total size {} runs past the CPU images section",
                total
            )));
        }

        let raw = reader.read_at(
            offset + CpuImageHeader::SIZE as u64,
            (table_len as usize) - CpuImageHeader::SIZE,
        )?;
        let sections = raw
            .chunks_exact(ImageSectionHeader::SIZE)
            .map(ImageSectionHeader::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;

        for section in &sections {
            let start = section.offset as u64;
            if start < table_len || start + section.size as u64 > total {
                return Err(malformed(format!(
                    "section '{}' ({} bytes at +0x{:X}) outside the image",
                    section.name(),
                    section.size,
                    section.offset
                )));
            }
        }

        Ok(Self {
            offset,
            header,
            sections,
        })
    }

    /// Container offset just past this image.
    pub fn end(&self) -> u64 {
        self.offset + self.header.total_size as u64
    }

    pub fn cpu(&self) -> Result<CpuId, LoadError> {
        CpuId::try_from(self.header.cpu_id)
    }

    /// First section address, where the core starts executing.
    pub fn entry(&self) -> u32 {
        self.sections.first().map(|s| s.address).unwrap_or(0)
    }

    /// Rewrite section addresses into the core's device window.
    pub fn remap(&mut self) -> Result<CpuId, LoadError> {
        let cpu = self.cpu()?;
        if cpu != CpuId::Cp {
            for section in &mut self.sections {
                section.address = remap(cpu, section.address);
            }
        }
        Ok(cpu)
    }
}

/// Read every image header in the CPU-images section without loading.
pub fn read_images<R: Reader + ?Sized>(
    reader: &mut R,
    section: &Section,
) -> Result<Vec<CpuImage>, LoadError> {
    let mut images = Vec::new();
    let mut offset = section.offset;
    while offset < section.end() {
        let image = CpuImage::read(reader, offset, section.end())?;
        offset = image.end();
        images.push(image);
    }
    Ok(images)
}

/// Outcome of loading one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub cpu: CpuId,
    pub entry: u32,
    pub end: u64,
}

/// Streams CPU images to the device in packets.
#[derive(Debug, Clone, Copy)]
pub struct CpuImageLoader {
    packets: ChunkedTransfer,
}

impl CpuImageLoader {
    /// `packet_size` must be a non-zero multiple of 4.
    pub fn new(packet_size: usize) -> Result<Self, ConfigError> {
        let packets = ChunkedTransfer::new(packet_size)
            .map_err(|_| ConfigError::BadPacketSize(packet_size))?;
        Ok(Self { packets })
    }

    /// Load all images in file order. Returns the control processor entry
    /// address, which is started only after every other section is in place.
    #[instrument(level = "info", skip_all, fields(size = section.size))]
    pub fn load_all<R, T, O>(
        &self,
        reader: &mut R,
        section: &Section,
        transport: &T,
        observer: &O,
    ) -> Result<u32, LoadError>
    where
        R: Reader + ?Sized,
        T: PlcTransport + ?Sized,
        O: LoadObserver + ?Sized,
    {
        let mut cp_entry = None;
        let mut offset = section.offset;

        while offset < section.end() {
            let loaded = self.load_image(reader, offset, section.end(), transport, observer)?;
            if loaded.cpu == CpuId::Cp {
                cp_entry = Some(loaded.entry);
            }
            offset = loaded.end;
        }

        cp_entry.ok_or(LoadError::MissingControlImage)
    }

    /// Load the image at `offset`: announce, stream, verify, then start it
    /// (auxiliary cores) or stage it (control processor).
    pub fn load_image<R, T, O>(
        &self,
        reader: &mut R,
        offset: u64,
        limit: u64,
        transport: &T,
        observer: &O,
    ) -> Result<LoadedImage, LoadError>
    where
        R: Reader + ?Sized,
        T: PlcTransport + ?Sized,
        O: LoadObserver + ?Sized,
    {
        let mut image = CpuImage::read(reader, offset, limit)?;
        let cpu = image.remap()?;
        debug!(
            cpu = %cpu,
            version = image.header.version,
            sections = image.sections.len(),
            "CPU image header"
        );

        transport.set_image_header(&image)?;

        let mut writer = ImageDataWrite::new(transport);
        for section in &image.sections {
            self.packets.transfer(
                reader,
                &mut writer,
                image.offset + section.offset as u64,
                section.size,
                section.address,
                0,
            )?;
        }

        let actual = writer.checksum();
        if actual != image.header.checksum {
            return Err(LoadError::ChecksumMismatch {
                target: format!("{} image at 0x{:X}", cpu, image.offset),
                expected: image.header.checksum,
                actual,
            });
        }

        let entry = image.entry();
        if cpu == CpuId::Cp {
            transport.init_copy()?;
        } else {
            transport.execute(entry, cpu)?;
        }
        info!(cpu = %cpu, entry = %format!("0x{:08X}", entry), "CPU image loaded");
        observer.on_event(&LoadEvent::ImageLoaded {
            cpu,
            entry,
            sections: image.sections.len(),
        });

        Ok(LoadedImage {
            cpu,
            entry,
            end: image.end(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ByteSum;
    use crate::container::SectionKind;
    use crate::device::{DeviceSession, MacAddr};
    use crate::events::NullObserver;
    use crate::protocol::constants::*;
    use crate::test_support::cpu_image;
    use crate::transport::{Fault, MockTransport, Op, OpKind};

    fn images_section(data: &[u8]) -> Section {
        Section {
            kind: SectionKind::CpuImages,
            offset: 0,
            size: data.len() as u32,
            checksum: 0,
        }
    }

    fn connected() -> MockTransport {
        let mock = MockTransport::default();
        mock.connect(&DeviceSession::new(MacAddr::ZERO, MacAddr::BROADCAST))
            .unwrap();
        mock.clear_ops();
        mock
    }

    #[test]
    fn test_read_image() {
        let code = vec![0xAB; 40];
        let data_seg = vec![0x01; 12];
        let mut bytes = cpu_image(
            CPU_ID_CMU,
            &[
                ("text", COMPILED_ICCM_BASE, &code[..]),
                ("data", COMPILED_DCCM_BASE, &data_seg[..]),
            ],
        );
        let limit = bytes.len() as u64;

        let image = CpuImage::read(&mut bytes, 0, limit).unwrap();
        assert_eq!(image.header.cpu_id, CPU_ID_CMU);
        assert_eq!(image.sections.len(), 2);
        assert_eq!(image.sections[0].name(), "text");
        assert_eq!(image.end(), limit);
        assert_eq!(image.header.checksum, ByteSum::of(&[code, data_seg].concat()));
    }

    #[test]
    fn test_loader_rejects_bad_packet_size() {
        assert_eq!(
            CpuImageLoader::new(0).unwrap_err(),
            ConfigError::BadPacketSize(0)
        );
        assert_eq!(
            CpuImageLoader::new(30).unwrap_err(),
            ConfigError::BadPacketSize(30)
        );
    }

    #[test]
    fn test_read_rejects_bad_bounds() {
        let mut bytes = cpu_image(CPU_ID_CP, &[("text", 0x1000, &[1; 8][..])]);
        let len = bytes.len() as u64;

        // Image longer than the section it sits in.
        let err = CpuImage::read(&mut bytes, 0, len - 1).unwrap_err();
        assert!(matches!(err, LoadError::MalformedImage { offset: 0, .. }));

        // Section data pointing past total_size.
        let mut bad = bytes.clone();
        bad[20 + 24..20 + 28].copy_from_slice(&64u32.to_le_bytes());
        let err = CpuImage::read(&mut bad, 0, len).unwrap_err();
        assert!(matches!(err, LoadError::MalformedImage { .. }));

        // No sections at all.
        let mut empty = bytes.clone();
        empty[8..12].copy_from_slice(&0u32.to_le_bytes());
        let err = CpuImage::read(&mut empty, 0, len).unwrap_err();
        assert!(matches!(err, LoadError::MalformedImage { .. }));
    }

    #[test]
    fn test_remap_only_aux_cores() {
        let mut cp = cpu_image(CPU_ID_CP, &[("text", COMPILED_ICCM_BASE, &[0; 4][..])]);
        let len = cp.len() as u64;
        let mut image = CpuImage::read(&mut cp, 0, len).unwrap();
        assert_eq!(image.remap().unwrap(), CpuId::Cp);
        assert_eq!(image.entry(), COMPILED_ICCM_BASE);

        let mut seg = cpu_image(CPU_ID_SEG, &[("text", COMPILED_ICCM_BASE, &[0; 4][..])]);
        let mut image = CpuImage::read(&mut seg, 0, len).unwrap();
        image.remap().unwrap();
        assert_eq!(image.entry(), remap(CpuId::Seg, COMPILED_ICCM_BASE));
        assert_ne!(image.entry(), COMPILED_ICCM_BASE);

        let mut bad = cpu_image(7, &[("text", 0, &[0; 4][..])]);
        let mut image = CpuImage::read(&mut bad, 0, len).unwrap();
        assert!(matches!(image.remap(), Err(LoadError::BadCpuId(7))));
    }

    #[test]
    fn test_single_cp_image_op_order() {
        let code: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        let mut bytes = cpu_image(CPU_ID_CP, &[("text", 0x4000_0000, &code[..])]);
        let section = images_section(&bytes);
        let mock = connected();

        let entry = CpuImageLoader::new(256).unwrap()
            .load_all(&mut bytes, &section, &mock, &NullObserver)
            .unwrap();
        assert_eq!(entry, 0x4000_0000);

        assert_eq!(
            mock.ops(),
            vec![
                Op::SetImageHeader {
                    cpu_id: CPU_ID_CP,
                    section_count: 1
                },
                Op::SetImageData {
                    address: 0x4000_0000,
                    data: code[..256].to_vec()
                },
                Op::SetImageData {
                    address: 0x4000_0100,
                    data: code[256..512].to_vec()
                },
                Op::SetImageData {
                    address: 0x4000_0200,
                    data: code[512..].to_vec()
                },
                Op::InitCopy,
            ]
        );
    }

    #[test]
    fn test_aux_core_executes_remapped_entry() {
        let cmu = cpu_image(CPU_ID_CMU, &[("text", COMPILED_ICCM_BASE + 0x20, &[9; 16][..])]);
        let cp = cpu_image(CPU_ID_CP, &[("text", 0x4000_0000, &[7; 16][..])]);
        let mut bytes = [cmu, cp].concat();
        let section = images_section(&bytes);
        let mock = connected();

        let entry = CpuImageLoader::new(256).unwrap()
            .load_all(&mut bytes, &section, &mock, &NullObserver)
            .unwrap();
        assert_eq!(entry, 0x4000_0000);

        let cmu_entry = remap(CpuId::Cmu, COMPILED_ICCM_BASE + 0x20);
        let ops = mock.ops();
        assert!(ops.contains(&Op::SetImageData {
            address: cmu_entry,
            data: vec![9; 16]
        }));
        assert!(ops.contains(&Op::Execute {
            address: cmu_entry,
            cpu: CpuId::Cmu
        }));
        assert_eq!(mock.count(OpKind::Execute), 1);
        assert_eq!(ops.last(), Some(&Op::InitCopy));
    }

    #[test]
    fn test_missing_cp_image() {
        let mut bytes = cpu_image(CPU_ID_LCU, &[("text", 0x10, &[1; 4][..])]);
        let section = images_section(&bytes);
        let mock = connected();

        let err = CpuImageLoader::new(256).unwrap()
            .load_all(&mut bytes, &section, &mock, &NullObserver)
            .unwrap_err();
        assert!(matches!(err, LoadError::MissingControlImage));
    }

    #[test]
    fn test_checksum_mismatch_stops_before_start() {
        let mut bytes = cpu_image(CPU_ID_PCU, &[("text", 0x10, &[1; 32][..])]);
        bytes[16..20].copy_from_slice(&0x1234u32.to_le_bytes());
        let section = images_section(&bytes);
        let mock = connected();

        let err = CpuImageLoader::new(256).unwrap()
            .load_all(&mut bytes, &section, &mock, &NullObserver)
            .unwrap_err();
        assert!(matches!(err, LoadError::ChecksumMismatch { expected: 0x1234, .. }));
        assert_eq!(mock.count(OpKind::Execute), 0);
    }

    #[test]
    fn test_bad_cpu_id_sends_nothing() {
        let mut bytes = cpu_image(11, &[("text", 0x10, &[1; 4][..])]);
        let section = images_section(&bytes);
        let mock = connected();

        let err = CpuImageLoader::new(256).unwrap()
            .load_all(&mut bytes, &section, &mock, &NullObserver)
            .unwrap_err();
        assert!(matches!(err, LoadError::BadCpuId(11)));
        assert!(mock.ops().is_empty());
    }

    #[test]
    fn test_data_failure_propagates() {
        let mut bytes = cpu_image(CPU_ID_CP, &[("text", 0x10, &[1; 1024][..])]);
        let section = images_section(&bytes);
        let mock = connected();
        mock.fail_after(OpKind::SetImageData, 2, Fault::Timeout);

        let err = CpuImageLoader::new(256).unwrap()
            .load_all(&mut bytes, &section, &mock, &NullObserver)
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(mock.count(OpKind::SetImageData), 3);
        assert_eq!(mock.count(OpKind::InitCopy), 0);
    }
}
