//! Event system for UI decoupling.
//!
//! Front ends subscribe to load progress through [`LoadObserver`] without
//! depending on the engine internals.

use std::fmt;

use crate::container::SectionKind;
use crate::device::MacAddr;
use crate::payload::CpuId;

/// Phases of a firmware load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Broadcast session, waiting for the device in bootcode.
    Discovery,
    /// Reading the firmware container.
    Parsing,
    /// Addressed session, writing the firmware.
    Transfer,
    /// Broadcast session, waiting for the firmware to answer.
    Readiness,
    Complete,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPhase::Discovery => write!(f, "Discovery"),
            LoadPhase::Parsing => write!(f, "Parsing"),
            LoadPhase::Transfer => write!(f, "Transfer"),
            LoadPhase::Readiness => write!(f, "Readiness"),
            LoadPhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Events emitted during a load.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    PhaseChanged { from: LoadPhase, to: LoadPhase },
    /// Device answered on broadcast in bootcode.
    DeviceDiscovered { mac: MacAddr },
    /// EBL block written.
    BootHeaderWritten { size: u32 },
    /// A firmware section finished transferring.
    SectionTransferred {
        kind: SectionKind,
        address: u32,
        size: u32,
    },
    /// HW vectors were staged and unpacked on the device.
    HwVectorsDecompressed { source: u32, destination: u32 },
    /// A CPU image finished loading.
    ImageLoaded {
        cpu: CpuId,
        entry: u32,
        sections: usize,
    },
    /// Overall progress in bytes of container payload.
    Progress { current: u64, total: u64 },
    /// One readiness query is about to be sent.
    PollAttempt { attempt: u32, max: u32 },
    Complete,
}

/// Observer trait for receiving load events.
pub trait LoadObserver: Send + Sync {
    fn on_event(&self, event: &LoadEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl LoadObserver for NullObserver {
    fn on_event(&self, _event: &LoadEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl LoadObserver for TracingObserver {
    fn on_event(&self, event: &LoadEvent) {
        match event {
            LoadEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            LoadEvent::DeviceDiscovered { mac } => {
                tracing::info!(mac = %mac, "Device discovered");
            }
            LoadEvent::BootHeaderWritten { size } => {
                tracing::info!(size, "Boot header written");
            }
            LoadEvent::SectionTransferred {
                kind,
                address,
                size,
            } => {
                tracing::info!(
                    section = %kind,
                    address = %format!("0x{:08X}", address),
                    size,
                    "Section transferred"
                );
            }
            LoadEvent::HwVectorsDecompressed {
                source,
                destination,
            } => {
                tracing::info!(
                    source = %format!("0x{:08X}", source),
                    destination = %format!("0x{:08X}", destination),
                    "HW vectors decompressed"
                );
            }
            LoadEvent::ImageLoaded {
                cpu,
                entry,
                sections,
            } => {
                tracing::info!(
                    cpu = %cpu,
                    entry = %format!("0x{:08X}", entry),
                    sections,
                    "CPU image loaded"
                );
            }
            LoadEvent::Progress { current, total } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(progress = %format!("{}%", pct), "Progress");
            }
            LoadEvent::PollAttempt { attempt, max } => {
                tracing::trace!(attempt, max, "Polling device");
            }
            LoadEvent::Complete => {
                tracing::info!("Firmware load complete");
            }
        }
    }
}
