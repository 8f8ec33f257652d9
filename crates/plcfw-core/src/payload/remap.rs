//! Core identifiers and DMI address translation.
//!
//! Auxiliary cores are linked against a common ICCM/DCCM view. On the device
//! each core's closely coupled memories sit in their own window, so section
//! addresses inside the compiled ranges are shifted before loading.

use std::fmt;

use crate::error::LoadError;
use crate::protocol::constants::*;

/// Processor cores of the modem SoC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuId {
    /// Control processor, runs the main firmware.
    Cp,
    Cmu,
    Seg,
    Lcu,
    Pcu,
}

impl CpuId {
    pub fn raw(&self) -> u32 {
        match self {
            CpuId::Cp => CPU_ID_CP,
            CpuId::Cmu => CPU_ID_CMU,
            CpuId::Seg => CPU_ID_SEG,
            CpuId::Lcu => CPU_ID_LCU,
            CpuId::Pcu => CPU_ID_PCU,
        }
    }

    /// DMI window of an auxiliary core; `None` for the control processor.
    pub fn window(&self) -> Option<&'static CoreWindow> {
        let index = self.raw().checked_sub(CPU_ID_CMU)? as usize;
        CORE_WINDOWS.get(index)
    }
}

impl TryFrom<u32> for CpuId {
    type Error = LoadError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            CPU_ID_CP => Ok(CpuId::Cp),
            CPU_ID_CMU => Ok(CpuId::Cmu),
            CPU_ID_SEG => Ok(CpuId::Seg),
            CPU_ID_LCU => Ok(CpuId::Lcu),
            CPU_ID_PCU => Ok(CpuId::Pcu),
            other => Err(LoadError::BadCpuId(other)),
        }
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuId::Cp => write!(f, "CP"),
            CpuId::Cmu => write!(f, "CMU"),
            CpuId::Seg => write!(f, "SEG"),
            CpuId::Lcu => write!(f, "LCU"),
            CpuId::Pcu => write!(f, "PCU"),
        }
    }
}

/// Device placement of one core's ICCM and DCCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreWindow {
    pub iccm_base: u32,
    pub iccm_size: u32,
    pub dccm_base: u32,
    pub dccm_size: u32,
}

/// Device windows of the auxiliary cores, indexed by `cpu_id - CPU_ID_CMU`.
const CORE_WINDOWS: [CoreWindow; 4] = [
    // CMU
    CoreWindow {
        iccm_base: 0x0400_0000,
        iccm_size: 0x0001_0000,
        dccm_base: 0x0410_0000,
        dccm_size: 0x0000_8000,
    },
    // SEG
    CoreWindow {
        iccm_base: 0x0500_0000,
        iccm_size: 0x0001_0000,
        dccm_base: 0x0510_0000,
        dccm_size: 0x0000_8000,
    },
    // LCU
    CoreWindow {
        iccm_base: 0x0600_0000,
        iccm_size: 0x0000_8000,
        dccm_base: 0x0610_0000,
        dccm_size: 0x0000_4000,
    },
    // PCU
    CoreWindow {
        iccm_base: 0x0700_0000,
        iccm_size: 0x0000_8000,
        dccm_base: 0x0710_0000,
        dccm_size: 0x0000_4000,
    },
];

impl CoreWindow {
    /// Translate a compiled address. The upper bound of each range is
    /// inclusive; addresses outside both ranges pass through.
    pub fn translate(&self, address: u32) -> u32 {
        if let Some(delta) = offset_in(address, COMPILED_ICCM_BASE, self.iccm_size) {
            return self.iccm_base.wrapping_add(delta);
        }
        if let Some(delta) = offset_in(address, COMPILED_DCCM_BASE, self.dccm_size) {
            return self.dccm_base.wrapping_add(delta);
        }
        address
    }
}

fn offset_in(address: u32, base: u32, size: u32) -> Option<u32> {
    let delta = address.checked_sub(base)?;
    (delta <= size).then_some(delta)
}

/// Device address for `address` as seen by `cpu`. CP addresses never move.
pub fn remap(cpu: CpuId, address: u32) -> u32 {
    match cpu.window() {
        Some(window) => window.translate(address),
        None => address,
    }
}

/// [`remap`] for a raw core id from an image header.
pub fn remap_address(cpu_id: u32, address: u32) -> Result<u32, LoadError> {
    Ok(remap(CpuId::try_from(cpu_id)?, address))
}
