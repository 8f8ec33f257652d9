//! Simulated bootcode device for tests and dry runs.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::traits::{DeviceInfo, DeviceState, PlcTransport, TransportError};
use crate::device::{DeviceSession, MacAddr};
use crate::payload::{CpuId, CpuImage};

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Connect { peer: MacAddr },
    Disconnect,
    Query,
    WriteMemory { address: u32, data: Vec<u8> },
    SetImageHeader { cpu_id: u32, section_count: usize },
    SetImageData { address: u32, data: Vec<u8> },
    Execute { address: u32, cpu: CpuId },
    InitCopy,
    Decompress { source: u32, destination: u32 },
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Connect { .. } => OpKind::Connect,
            Op::Disconnect => OpKind::Disconnect,
            Op::Query => OpKind::Query,
            Op::WriteMemory { .. } => OpKind::WriteMemory,
            Op::SetImageHeader { .. } => OpKind::SetImageHeader,
            Op::SetImageData { .. } => OpKind::SetImageData,
            Op::Execute { .. } => OpKind::Execute,
            Op::InitCopy => OpKind::InitCopy,
            Op::Decompress { .. } => OpKind::Decompress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Connect,
    Disconnect,
    Query,
    WriteMemory,
    SetImageHeader,
    SetImageData,
    Execute,
    InitCopy,
    Decompress,
}

/// Scripted failure returned by the mock.
#[derive(Debug, Clone)]
pub enum Fault {
    Timeout,
    Rejected(String),
}

impl Fault {
    fn into_error(self, timeout: Duration) -> TransportError {
        match self {
            Fault::Timeout => TransportError::timeout(timeout),
            Fault::Rejected(msg) => TransportError::Rejected(msg),
        }
    }
}

#[derive(Debug)]
struct PendingFault {
    kind: OpKind,
    skip: usize,
    fault: Fault,
}

#[derive(Debug)]
struct MockState {
    log: Vec<Op>,
    session: Option<MacAddr>,
    device_state: DeviceState,
    responsive: bool,
    query_queue: VecDeque<Result<DeviceState, Fault>>,
    faults: Vec<PendingFault>,
}

/// In-memory device that records every call.
///
/// Queries answer `Bootcode` until the control processor is executed and
/// `FirmwareRunning` afterwards, unless responses were queued.
#[derive(Debug)]
pub struct MockTransport {
    mac: MacAddr,
    state: Mutex<MockState>,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

impl MockTransport {
    pub fn new(mac: MacAddr) -> Self {
        Self {
            mac,
            state: Mutex::new(MockState {
                log: Vec::new(),
                session: None,
                device_state: DeviceState::Bootcode,
                responsive: true,
                query_queue: VecDeque::new(),
                faults: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// MAC address the simulated device reports.
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// Queue a query answer, consumed before the simulated state is used.
    pub fn queue_query(&self, response: Result<DeviceState, Fault>) {
        self.lock().query_queue.push_back(response);
    }

    /// When unresponsive, queries with an empty queue time out.
    pub fn set_responsive(&self, responsive: bool) {
        self.lock().responsive = responsive;
    }

    pub fn set_device_state(&self, state: DeviceState) {
        self.lock().device_state = state;
    }

    /// Let `skip` calls of `kind` succeed, then fail the next one with `fault`.
    pub fn fail_after(&self, kind: OpKind, skip: usize, fault: Fault) {
        self.lock().faults.push(PendingFault { kind, skip, fault });
    }

    /// Get all recorded calls.
    pub fn ops(&self) -> Vec<Op> {
        self.lock().log.clone()
    }

    /// Number of recorded calls of `kind`.
    pub fn count(&self, kind: OpKind) -> usize {
        self.lock().log.iter().filter(|op| op.kind() == kind).count()
    }

    /// Whether a session is currently open.
    pub fn is_connected(&self) -> bool {
        self.lock().session.is_some()
    }

    pub fn clear_ops(&self) {
        self.lock().log.clear();
    }

    fn record(&self, op: Op, timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.lock();
        let kind = op.kind();
        state.log.push(op);

        if !matches!(kind, OpKind::Connect) && state.session.is_none() {
            return Err(TransportError::NotConnected);
        }

        if let Some(idx) = state.faults.iter().position(|f| f.kind == kind) {
            if state.faults[idx].skip == 0 {
                let pending = state.faults.remove(idx);
                return Err(pending.fault.into_error(timeout));
            }
            state.faults[idx].skip -= 1;
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(MacAddr::new([0x00, 0x13, 0xD7, 0x00, 0x00, 0x01]))
    }
}

impl PlcTransport for MockTransport {
    fn connect(&self, session: &DeviceSession) -> Result<(), TransportError> {
        self.record(
            Op::Connect {
                peer: session.peer_mac,
            },
            DEFAULT_TIMEOUT,
        )?;
        let mut state = self.lock();
        if state.session.is_some() {
            return Err(TransportError::Rejected("session already open".into()));
        }
        state.session = Some(session.peer_mac);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let res = self.record(Op::Disconnect, DEFAULT_TIMEOUT);
        // The link is gone whether or not the device confirmed it.
        self.lock().session = None;
        res
    }

    fn query_device(&self, timeout: Duration) -> Result<DeviceInfo, TransportError> {
        self.record(Op::Query, timeout)?;
        let mut state = self.lock();
        let device_state = match state.query_queue.pop_front() {
            Some(Ok(device_state)) => device_state,
            Some(Err(fault)) => return Err(fault.into_error(timeout)),
            None if !state.responsive => return Err(TransportError::timeout(timeout)),
            None => state.device_state,
        };
        Ok(DeviceInfo {
            state: device_state,
            mac: self.mac,
        })
    }

    fn write_memory(
        &self,
        address: u32,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.record(
            Op::WriteMemory {
                address,
                data: data.to_vec(),
            },
            timeout,
        )
    }

    fn set_image_header(&self, image: &CpuImage) -> Result<(), TransportError> {
        self.record(
            Op::SetImageHeader {
                cpu_id: image.header.cpu_id,
                section_count: image.sections.len(),
            },
            DEFAULT_TIMEOUT,
        )
    }

    fn set_image_data(&self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        self.record(
            Op::SetImageData {
                address,
                data: data.to_vec(),
            },
            DEFAULT_TIMEOUT,
        )
    }

    fn execute(&self, address: u32, cpu: CpuId) -> Result<(), TransportError> {
        self.record(Op::Execute { address, cpu }, DEFAULT_TIMEOUT)?;
        if cpu == CpuId::Cp {
            self.lock().device_state = DeviceState::FirmwareRunning;
        }
        Ok(())
    }

    fn init_copy(&self) -> Result<(), TransportError> {
        self.record(Op::InitCopy, DEFAULT_TIMEOUT)
    }

    fn decompress(&self, source: u32, destination: u32) -> Result<(), TransportError> {
        self.record(
            Op::Decompress {
                source,
                destination,
            },
            DEFAULT_TIMEOUT,
        )
    }
}
