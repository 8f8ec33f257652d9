//! Firmware load orchestration.
//!
//! Sequence of one load attempt:
//!
//! 1. discovery on broadcast (device must be in bootcode)
//! 2. container parse
//! 3. addressed session: EBL, CPU images, bin file header, global params,
//!    HW vectors, user config, then start the control processor
//! 4. readiness polling on broadcast
//!
//! The first failure ends the attempt. Retrying is up to the caller.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::boot_header::{Destination, TargetAddressTable, load_ebl};
use crate::config::LoaderConfig;
use crate::container::{Section, SectionKind, SectionTable, parse_container};
use crate::device::{self, MacAddr};
use crate::error::LoadError;
use crate::events::{LoadEvent, LoadObserver, LoadPhase, TracingObserver};
use crate::payload::{CpuId, CpuImageLoader};
use crate::protocol::constants::LZOZ_SIGNATURE;
use crate::reader::Reader;
use crate::transfer::{ChunkedTransfer, MemoryWrite};
use crate::transport::PlcTransport;

/// Whether the HW-vector section carries an LZOZ-compressed payload.
pub fn is_lzoz_compressed<R: Reader + ?Sized>(
    reader: &mut R,
    section: &Section,
) -> Result<bool, LoadError> {
    if (section.size as usize) < LZOZ_SIGNATURE.len() {
        return Ok(false);
    }
    let head = reader.read_at(section.offset, LZOZ_SIGNATURE.len())?;
    Ok(head == LZOZ_SIGNATURE)
}

/// Drives a device from bootcode to running firmware.
pub struct FirmwareLoader<T: PlcTransport, O: LoadObserver = TracingObserver> {
    transport: T,
    config: LoaderConfig,
    observer: Arc<O>,
}

impl<T: PlcTransport> FirmwareLoader<T, TracingObserver> {
    /// Create a loader with the default tracing observer.
    pub fn new(transport: T, config: LoaderConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: PlcTransport, O: LoadObserver> FirmwareLoader<T, O> {
    /// Create a loader with a custom observer.
    pub fn with_observer(transport: T, config: LoaderConfig, observer: Arc<O>) -> Self {
        Self {
            transport,
            config,
            observer,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn phase(&self, from: LoadPhase, to: LoadPhase) {
        self.observer.on_event(&LoadEvent::PhaseChanged { from, to });
    }

    /// Run one complete load attempt.
    #[instrument(skip(self, firmware, user_config), fields(adapter = %adapter_mac))]
    pub fn load_firmware<F, U>(
        &self,
        adapter_mac: MacAddr,
        firmware: &mut F,
        user_config: &mut U,
        rmii_mode: bool,
    ) -> Result<(), LoadError>
    where
        F: Reader + ?Sized,
        U: Reader + ?Sized,
    {
        self.config.validate()?;
        let observer = &*self.observer;

        self.phase(LoadPhase::Discovery, LoadPhase::Discovery);
        let device_mac =
            device::discover(&self.transport, &self.config, observer, adapter_mac, rmii_mode)?;

        self.phase(LoadPhase::Discovery, LoadPhase::Parsing);
        let table = parse_container(firmware)?;

        self.phase(LoadPhase::Parsing, LoadPhase::Transfer);
        let link = device::open_addressed(&self.transport, &self.config, adapter_mac, device_mac)?;
        self.transfer_all(&*link, firmware, user_config, &table)?;
        link.close()?;

        self.phase(LoadPhase::Transfer, LoadPhase::Readiness);
        device::await_firmware(&self.transport, &self.config, observer, adapter_mac)?;

        self.phase(LoadPhase::Readiness, LoadPhase::Complete);
        info!(device = %device_mac, "Firmware is up");
        observer.on_event(&LoadEvent::Complete);
        Ok(())
    }

    /// Everything that happens inside the addressed session.
    fn transfer_all<L, F, U>(
        &self,
        link: &L,
        firmware: &mut F,
        user_config: &mut U,
        table: &SectionTable,
    ) -> Result<(), LoadError>
    where
        L: PlcTransport + ?Sized,
        F: Reader + ?Sized,
        U: Reader + ?Sized,
    {
        let mut progress = Progress::new(table, self.config.user_config_size);

        let ebl = table.get(SectionKind::Ebl);
        let targets = load_ebl(firmware, ebl, link, self.config.write_timeout())?;
        self.observer
            .on_event(&LoadEvent::BootHeaderWritten { size: ebl.size });
        progress.advance(&*self.observer, ebl.size);

        let images = table.get(SectionKind::CpuImages);
        let cp_entry = CpuImageLoader::new(self.config.image_packet_size)?.load_all(
            firmware,
            images,
            link,
            &*self.observer,
        )?;
        progress.advance(&*self.observer, images.size);

        for (kind, dest) in [
            (SectionKind::BinFileHeader, Destination::BinFileHeader),
            (SectionKind::GlobalParams, Destination::GlobalParams),
        ] {
            let section = table.get(kind);
            let address = targets.require(dest)?;
            self.write_range(link, firmware, section, address, section.checksum)?;
            progress.advance(&*self.observer, section.size);
        }

        let hw_vectors = table.get(SectionKind::HwVectors);
        self.load_hw_vectors(link, firmware, hw_vectors, &targets)?;
        progress.advance(&*self.observer, hw_vectors.size);

        self.load_user_config(link, user_config, &targets)?;
        progress.advance(&*self.observer, self.config.user_config_size);

        link.execute(cp_entry, CpuId::Cp)?;
        info!(entry = %format!("0x{:08X}", cp_entry), "Control processor started");
        Ok(())
    }

    /// HW vectors go straight to their target, unless LZOZ-compressed: then
    /// they are staged at the user-config target and unpacked on the device.
    fn load_hw_vectors<L, F>(
        &self,
        link: &L,
        firmware: &mut F,
        section: &Section,
        targets: &TargetAddressTable,
    ) -> Result<(), LoadError>
    where
        L: PlcTransport + ?Sized,
        F: Reader + ?Sized,
    {
        let destination = targets.require(Destination::HwVectors)?;

        if !is_lzoz_compressed(firmware, section)? {
            return self.write_range(link, firmware, section, destination, section.checksum);
        }

        let staging = targets.require(Destination::UserConfig)?;
        info!(
            staging = %format!("0x{:08X}", staging),
            "HW vectors are LZOZ compressed"
        );
        self.write_range(link, firmware, section, staging, 0)?;
        link.decompress(staging, destination)?;
        self.observer.on_event(&LoadEvent::HwVectorsDecompressed {
            source: staging,
            destination,
        });
        Ok(())
    }

    fn load_user_config<L, U>(
        &self,
        link: &L,
        user_config: &mut U,
        targets: &TargetAddressTable,
    ) -> Result<(), LoadError>
    where
        L: PlcTransport + ?Sized,
        U: Reader + ?Sized,
    {
        let address = targets.require(Destination::UserConfig)?;
        let size = self.config.user_config_size;
        ChunkedTransfer::new(self.config.chunk_size)?.transfer(
            user_config,
            &mut MemoryWrite::new(link, self.config.write_timeout()),
            0,
            size,
            address,
            0,
        )?;
        self.observer.on_event(&LoadEvent::SectionTransferred {
            kind: SectionKind::UserConfig,
            address,
            size,
        });
        Ok(())
    }

    fn write_range<L, F>(
        &self,
        link: &L,
        firmware: &mut F,
        section: &Section,
        address: u32,
        checksum: u32,
    ) -> Result<(), LoadError>
    where
        L: PlcTransport + ?Sized,
        F: Reader + ?Sized,
    {
        ChunkedTransfer::new(self.config.chunk_size)?.transfer(
            firmware,
            &mut MemoryWrite::new(link, self.config.write_timeout()),
            section.offset,
            section.size,
            address,
            checksum,
        )?;
        self.observer.on_event(&LoadEvent::SectionTransferred {
            kind: section.kind,
            address,
            size: section.size,
        });
        Ok(())
    }
}

struct Progress {
    current: u64,
    total: u64,
}

impl Progress {
    fn new(table: &SectionTable, user_config_size: u32) -> Self {
        let sections: u64 = table
            .iter()
            .filter(|s| s.kind != SectionKind::UserConfig)
            .map(|s| s.size as u64)
            .sum();
        Self {
            current: 0,
            total: sections + user_config_size as u64,
        }
    }

    fn advance<O: LoadObserver + ?Sized>(&mut self, observer: &O, bytes: u32) {
        self.current += bytes as u64;
        observer.on_event(&LoadEvent::Progress {
            current: self.current,
            total: self.total,
        });
    }
}

/// Load with the default [`LoaderConfig`].
pub fn load_firmware<T, F, U>(
    transport: &T,
    adapter_mac: MacAddr,
    firmware: &mut F,
    user_config: &mut U,
    rmii_mode: bool,
) -> Result<(), LoadError>
where
    T: PlcTransport + ?Sized,
    F: Reader + ?Sized,
    U: Reader + ?Sized,
{
    FirmwareLoader::new(transport, LoaderConfig::default()).load_firmware(
        adapter_mac,
        firmware,
        user_config,
        rmii_mode,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::NullObserver;
    use crate::events::recording::RecordingObserver;
    use crate::protocol::constants::*;
    use crate::test_support::*;
    use crate::transport::{DeviceState, Fault, MockTransport, Op, OpKind};

    const ADAPTER: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x42]);

    fn test_config() -> LoaderConfig {
        LoaderConfig {
            poll_interval_ms: 0,
            user_config_size: 256,
            ..Default::default()
        }
    }

    fn loader(mock: &MockTransport) -> FirmwareLoader<&MockTransport, NullObserver> {
        FirmwareLoader::with_observer(mock, test_config(), Arc::new(NullObserver))
    }

    fn user_config() -> Vec<u8> {
        (0..256u32).map(|i| (i ^ 0x5A) as u8).collect()
    }

    fn writes_to(ops: &[Op], address: u32) -> Vec<Vec<u8>> {
        ops.iter()
            .filter_map(|op| match op {
                Op::WriteMemory { address: a, data } if *a == address => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_full_load_op_sequence() {
        let sample = SampleFirmware::default();
        let mut fw = sample.build();
        let mut uc = user_config();
        let mock = MockTransport::default();

        loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap();

        let ops = mock.ops();
        let kinds: Vec<OpKind> = ops.iter().map(Op::kind).collect();
        use OpKind::*;
        assert_eq!(
            kinds,
            vec![
                // discovery
                Connect, Query, Disconnect,
                // addressed
                Connect, WriteMemory, SetImageHeader, SetImageData, SetImageData, SetImageData,
                InitCopy, WriteMemory, WriteMemory, WriteMemory, WriteMemory, Execute, Disconnect,
                // readiness
                Connect, Query, Disconnect,
            ]
        );

        assert_eq!(ops[0], Op::Connect { peer: MacAddr::BROADCAST });
        assert_eq!(ops[3], Op::Connect { peer: mock.mac() });
        assert_eq!(ops[16], Op::Connect { peer: MacAddr::BROADCAST });
        assert_eq!(
            ops[4],
            Op::WriteMemory {
                address: EBL_LOAD_ADDRESS,
                data: sample.ebl()
            }
        );
        assert_eq!(
            ops[14],
            Op::Execute {
                address: CP_ENTRY,
                cpu: CpuId::Cp
            }
        );

        assert_eq!(writes_to(&ops, BIN_HEADER_TARGET), vec![sample.bin_header.clone()]);
        assert_eq!(writes_to(&ops, GLOBAL_PARAMS_TARGET), vec![sample.global_params.clone()]);
        assert_eq!(writes_to(&ops, HW_VECTORS_TARGET), vec![sample.hw_vectors.clone()]);
        assert_eq!(writes_to(&ops, USER_CONFIG_TARGET), vec![uc]);
        assert!(!mock.is_connected());
    }

    #[test]
    fn test_single_cp_image_ordering() {
        let code = [0x5Au8; 16];
        let sample = SampleFirmware {
            images: vec![cpu_image(CPU_ID_CP, &[("text", 0x1000, &code[..])])],
            ..Default::default()
        };
        let mut fw = sample.build();
        let mut uc = user_config();
        let mock = MockTransport::default();

        loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap();

        let ops = mock.ops();
        let image_ops: Vec<&Op> = ops
            .iter()
            .filter(|op| {
                matches!(
                    op.kind(),
                    OpKind::SetImageHeader | OpKind::SetImageData | OpKind::InitCopy | OpKind::Execute
                )
            })
            .collect();
        assert_eq!(
            image_ops,
            vec![
                &Op::SetImageHeader {
                    cpu_id: CPU_ID_CP,
                    section_count: 1
                },
                &Op::SetImageData {
                    address: 0x1000,
                    data: code.to_vec()
                },
                &Op::InitCopy,
                &Op::Execute {
                    address: 0x1000,
                    cpu: CpuId::Cp
                },
            ]
        );

        // The CP is started last thing in the addressed session.
        let execute = ops.iter().position(|op| op.kind() == OpKind::Execute).unwrap();
        assert_eq!(ops[execute + 1], Op::Disconnect);
    }

    #[test]
    fn test_lzoz_hw_vectors_staged_and_decompressed() {
        let sample = SampleFirmware {
            hw_vectors: [LZOZ_SIGNATURE.to_vec(), vec![0xEE; 57]].concat(),
            ..Default::default()
        };
        let mut fw = sample.build();
        let mut uc = user_config();
        let mock = MockTransport::default();

        loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap();

        let ops = mock.ops();
        assert!(writes_to(&ops, HW_VECTORS_TARGET).is_empty());
        assert_eq!(
            writes_to(&ops, USER_CONFIG_TARGET),
            vec![sample.hw_vectors.clone(), uc]
        );

        let decompress = ops
            .iter()
            .position(|op| {
                *op == Op::Decompress {
                    source: USER_CONFIG_TARGET,
                    destination: HW_VECTORS_TARGET,
                }
            })
            .unwrap();
        let user_config_write = ops
            .iter()
            .rposition(|op| matches!(op, Op::WriteMemory { address, .. } if *address == USER_CONFIG_TARGET))
            .unwrap();
        assert!(decompress < user_config_write);
    }

    #[test]
    fn test_short_hw_vectors_never_compressed() {
        let sample = SampleFirmware {
            hw_vectors: b"LZOZ1".to_vec(),
            ..Default::default()
        };
        let mut fw = sample.build();
        let mut uc = user_config();
        let mock = MockTransport::default();

        loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap();
        assert_eq!(mock.count(OpKind::Decompress), 0);
        assert_eq!(writes_to(&mock.ops(), HW_VECTORS_TARGET), vec![b"LZOZ1".to_vec()]);
    }

    #[test]
    fn test_rmii_write_precedes_query() {
        let mut fw = SampleFirmware::default().build();
        let mut uc = user_config();
        let mock = MockTransport::default();

        loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, true)
            .unwrap();
        assert_eq!(
            mock.ops()[1],
            Op::WriteMemory {
                address: RMII_TIMING_REGISTER,
                data: vec![0; 4]
            }
        );
        assert_eq!(mock.ops()[2], Op::Query);
    }

    #[test]
    fn test_readiness_exhaustion() {
        let mut fw = SampleFirmware::default().build();
        let mut uc = user_config();
        let mock = MockTransport::default();
        mock.queue_query(Ok(DeviceState::Bootcode));
        mock.set_responsive(false);

        let err = loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportTimeout);
        assert_eq!(mock.count(OpKind::Query), 1 + 100);
        assert_eq!(mock.count(OpKind::Execute), 1);
        assert!(!mock.is_connected());
    }

    #[test]
    fn test_image_failure_closes_session() {
        let mut fw = SampleFirmware::default().build();
        let mut uc = user_config();
        let mock = MockTransport::default();
        mock.fail_after(OpKind::SetImageData, 1, Fault::Rejected("nak".into()));

        let err = loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!mock.is_connected());
        assert_eq!(mock.count(OpKind::Disconnect), 2);
        assert_eq!(mock.count(OpKind::Execute), 0);
        assert_eq!(mock.ops().last(), Some(&Op::Disconnect));
    }

    #[test]
    fn test_not_in_bootcode() {
        let mut fw = SampleFirmware::default().build();
        let mut uc = user_config();
        let mock = MockTransport::default();
        mock.set_device_state(DeviceState::Other(7));

        let err = loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceStateMismatch);
        assert_eq!(mock.count(OpKind::Connect), 1);
        assert!(!mock.is_connected());
    }

    #[test]
    fn test_bad_container_never_opens_addressed_session() {
        let mut fw = SampleFirmware::default().build();
        fw[0..4].copy_from_slice(&0x77u32.to_le_bytes());
        let mut uc = user_config();
        let mock = MockTransport::default();

        let err = loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedSection { id: 0x77, offset: 0 }));
        assert_eq!(mock.count(OpKind::Connect), 1);
    }

    #[test]
    fn test_corrupt_ebl_writes_nothing() {
        let mut fw = SampleFirmware::default().build();
        // First EBL payload byte sits right after its section header.
        fw[SECTION_HEADER_LEN] ^= 0xFF;
        let mut uc = user_config();
        let mock = MockTransport::default();

        let err = loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert_eq!(mock.count(OpKind::WriteMemory), 0);
        assert!(!mock.is_connected());
    }

    #[test]
    fn test_short_user_config() {
        let mut fw = SampleFirmware::default().build();
        let mut uc = vec![0u8; 100];
        let mock = MockTransport::default();

        let err = loader(&mock)
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(mock.count(OpKind::Execute), 0);
        assert!(!mock.is_connected());
    }

    #[test]
    fn test_invalid_config_touches_nothing() {
        let mut fw = SampleFirmware::default().build();
        let mut uc = user_config();
        let mock = MockTransport::default();
        let config = LoaderConfig {
            chunk_size: 10,
            ..test_config()
        };

        let err = FirmwareLoader::with_observer(&mock, config, Arc::new(NullObserver))
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
        assert!(mock.ops().is_empty());
    }

    #[test]
    fn test_events() {
        let mut fw = SampleFirmware::default().build();
        let mut uc = user_config();
        let mock = MockTransport::default();
        let observer = Arc::new(RecordingObserver::default());

        FirmwareLoader::with_observer(&mock, test_config(), observer.clone())
            .load_firmware(ADAPTER, &mut fw, &mut uc, false)
            .unwrap();

        let events = observer.events();
        let phases: Vec<LoadPhase> = events
            .iter()
            .filter_map(|e| match e {
                LoadEvent::PhaseChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                LoadPhase::Discovery,
                LoadPhase::Parsing,
                LoadPhase::Transfer,
                LoadPhase::Readiness,
                LoadPhase::Complete,
            ]
        );

        let last_progress = events
            .iter()
            .rev()
            .find_map(|e| match e {
                LoadEvent::Progress { current, total } => Some((*current, *total)),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_progress.0, last_progress.1);
        assert!(matches!(events.last(), Some(LoadEvent::Complete)));
    }

    #[test]
    fn test_free_function_default_config() {
        let mut fw = SampleFirmware::default().build();
        let mut uc = vec![0x11u8; DEFAULT_USER_CONFIG_SIZE as usize];
        let mock = MockTransport::default();

        load_firmware(&mock, ADAPTER, &mut fw, &mut uc, false).unwrap();
        // EBL, three sections, then 4096 bytes of user config in 1024-byte chunks.
        assert_eq!(writes_to(&mock.ops(), USER_CONFIG_TARGET).len(), 1);
        assert_eq!(mock.count(OpKind::WriteMemory), 1 + 3 + 4);
    }
}
