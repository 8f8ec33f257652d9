//! Offline firmware container inspection.
//!
//! Runs the same parsing and verification as a load, without a device, and
//! collects the results into a report.

use crate::boot_header::{Destination, EblBlock, read_ebl};
use crate::checksum::{ByteSum, WordSum};
use crate::container::{Section, SectionKind, parse_container};
use crate::error::LoadError;
use crate::loader::is_lzoz_compressed;
use crate::payload::{CpuId, CpuImage, read_images, remap};
use crate::reader::Reader;

/// Validation check result
#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

impl ValidationCheck {
    fn new(name: impl Into<String>, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageSectionSummary {
    pub name: String,
    /// Address as compiled.
    pub address: u32,
    /// Address on the device after remapping.
    pub device_address: Option<u32>,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub offset: u64,
    pub cpu_id: u32,
    pub cpu: Option<CpuId>,
    pub version: u32,
    pub total_size: u32,
    pub expected_checksum: u32,
    pub actual_checksum: u32,
    pub sections: Vec<ImageSectionSummary>,
}

impl ImageSummary {
    pub fn checksum_ok(&self) -> bool {
        self.expected_checksum == self.actual_checksum
    }
}

/// Complete container analysis result
#[derive(Debug, Clone)]
pub struct FirmwareAnalysis {
    pub size: u64,
    pub sections: Vec<Section>,
    /// Decoded EBL, when its checksum and layout are valid.
    pub ebl: Option<EblBlock>,
    pub images: Vec<ImageSummary>,
    pub hw_vectors_compressed: bool,
    pub validations: Vec<ValidationCheck>,
}

impl FirmwareAnalysis {
    /// Analyze a firmware container. Only an unreadable section table is
    /// fatal; every other problem is reported as a failed check.
    pub fn analyze<R: Reader + ?Sized>(reader: &mut R) -> Result<Self, LoadError> {
        let size = reader.size()?;
        let table = parse_container(reader)?;
        let mut validations = Vec::new();

        let ebl = match read_ebl(reader, table.get(SectionKind::Ebl)) {
            Ok(ebl) => {
                validations.push(ValidationCheck::new("EBL", true, "checksum and layout valid"));
                Some(ebl)
            }
            Err(e) => {
                validations.push(ValidationCheck::new("EBL", false, e.to_string()));
                None
            }
        };

        let hw = table.get(SectionKind::HwVectors);
        let hw_vectors_compressed = is_lzoz_compressed(reader, hw)?;

        for kind in [SectionKind::BinFileHeader, SectionKind::GlobalParams] {
            validations.push(check_word_sum(reader, table.get(kind))?);
        }
        if !hw_vectors_compressed {
            validations.push(check_word_sum(reader, hw)?);
        }

        let mut images = Vec::new();
        match read_images(reader, table.get(SectionKind::CpuImages)) {
            Ok(found) => {
                for image in &found {
                    images.push(summarize(reader, image)?);
                }
                validations.push(ValidationCheck::new(
                    "CPU Images",
                    true,
                    format!("{} image(s)", found.len()),
                ));
            }
            Err(e) => validations.push(ValidationCheck::new("CPU Images", false, e.to_string())),
        }
        for image in &images {
            let cpu = image
                .cpu
                .map(|c| c.to_string())
                .unwrap_or_else(|| format!("cpu {}", image.cpu_id));
            validations.push(ValidationCheck::new(
                format!("{} Image", cpu),
                image.cpu.is_some() && image.checksum_ok(),
                if image.cpu.is_none() {
                    "unknown core".to_string()
                } else {
                    format!(
                        "byte-sum expected 0x{:08X}, got 0x{:08X}",
                        image.expected_checksum, image.actual_checksum
                    )
                },
            ));
        }

        let has_cp = images.iter().any(|i| i.cpu == Some(CpuId::Cp));
        validations.push(ValidationCheck::new(
            "Control Processor",
            has_cp,
            if has_cp { "CP image present" } else { "no CP image" },
        ));

        if let Some(ebl) = &ebl {
            let missing: Vec<String> = Destination::ALL
                .iter()
                .filter(|d| ebl.targets.get(**d).is_none())
                .map(|d| d.to_string())
                .collect();
            validations.push(ValidationCheck::new(
                "Target Addresses",
                missing.is_empty(),
                if missing.is_empty() {
                    "all destinations defined".to_string()
                } else {
                    format!("missing: {}", missing.join(", "))
                },
            ));
        }

        Ok(Self {
            size,
            sections: table.iter().copied().collect(),
            ebl,
            images,
            hw_vectors_compressed,
            validations,
        })
    }

    pub fn all_passed(&self) -> bool {
        self.validations.iter().all(|v| v.passed)
    }

    /// Format as text report
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        out.push_str("Firmware Container Analysis\n");
        out.push_str(&format!("{}\n", "=".repeat(50)));
        out.push_str(&format!(
            "File size: {} bytes ({:.2} KB)\n",
            self.size,
            self.size as f64 / 1024.0
        ));

        out.push_str("\nSections:\n");
        for s in &self.sections {
            out.push_str(&format!(
                "  {:<16} offset 0x{:06X}  size {:>8}  checksum 0x{:08X}\n",
                s.kind.to_string(),
                s.offset,
                s.size,
                s.checksum
            ));
        }

        if let Some(ebl) = &self.ebl {
            out.push_str("\nTarget addresses:\n");
            for dest in Destination::ALL {
                match ebl.targets.get(dest) {
                    Some(addr) => {
                        out.push_str(&format!("  {:<16} 0x{:08X}\n", dest.to_string(), addr))
                    }
                    None => out.push_str(&format!("  {:<16} -\n", dest.to_string())),
                }
            }
        }

        out.push_str(&format!(
            "\nHW vectors: {}\n",
            if self.hw_vectors_compressed {
                "LZOZ compressed"
            } else {
                "raw"
            }
        ));

        if !self.images.is_empty() {
            out.push_str("\nCPU images:\n");
            for image in &self.images {
                let cpu = image
                    .cpu
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| format!("?{}", image.cpu_id));
                out.push_str(&format!(
                    "  {} @ 0x{:X}: version 0x{:08X}, {} bytes, byte-sum {}\n",
                    cpu,
                    image.offset,
                    image.version,
                    image.total_size,
                    if image.checksum_ok() { "ok" } else { "BAD" }
                ));
                for s in &image.sections {
                    let device = match s.device_address {
                        Some(addr) if addr != s.address => format!(" -> 0x{:08X}", addr),
                        _ => String::new(),
                    };
                    out.push_str(&format!(
                        "    {:<16} 0x{:08X}{}  {} bytes\n",
                        s.name, s.address, device, s.size
                    ));
                }
            }
        }

        out.push_str("\nValidation:\n");
        for v in &self.validations {
            let icon = if v.passed { "✅" } else { "❌" };
            out.push_str(&format!("  {} {}: {}\n", icon, v.name, v.message));
        }

        out
    }
}

fn check_word_sum<R: Reader + ?Sized>(
    reader: &mut R,
    section: &Section,
) -> Result<ValidationCheck, LoadError> {
    let name = section.kind.to_string();
    if section.checksum == 0 {
        return Ok(ValidationCheck::new(name, true, "no checksum"));
    }
    let actual = WordSum::of(&reader.read_at(section.offset, section.size as usize)?);
    Ok(ValidationCheck::new(
        name,
        actual == section.checksum,
        format!(
            "word-sum expected 0x{:08X}, got 0x{:08X}",
            section.checksum, actual
        ),
    ))
}

fn summarize<R: Reader + ?Sized>(reader: &mut R, image: &CpuImage) -> Result<ImageSummary, LoadError> {
    let cpu = image.cpu().ok();
    let mut sum = ByteSum::new();
    let mut sections = Vec::with_capacity(image.sections.len());

    for s in &image.sections {
        let data = reader.read_at(image.offset + s.offset as u64, s.size as usize)?;
        sum = sum.update(&data);
        sections.push(ImageSectionSummary {
            name: s.name(),
            address: s.address,
            device_address: cpu.map(|c| remap(c, s.address)),
            size: s.size,
        });
    }

    Ok(ImageSummary {
        offset: image.offset,
        cpu_id: image.header.cpu_id,
        cpu,
        version: image.header.version,
        total_size: image.header.total_size,
        expected_checksum: image.header.checksum,
        actual_checksum: sum.finalize(),
        sections,
    })
}
