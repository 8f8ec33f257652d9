//! Device sessions and the three connection phases of a load.
//!
//! - Phase A (discovery): broadcast session, optional RMII fix-up, the device
//!   must be sitting in bootcode.
//! - Phase B (addressed): unicast session to the MAC learned in phase A;
//!   everything is transferred here.
//! - Phase C (readiness): broadcast session again, polling until the new
//!   firmware answers.
//!
//! A session is always closed before the next one is opened. [`SessionGuard`]
//! closes it on drop so early returns never leave one behind.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::thread;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::events::{LoadEvent, LoadObserver};
use crate::protocol::constants::{PLC_ETHER_TYPE, RMII_TIMING_REGISTER, SESSION_ID};
use crate::transport::{DeviceState, PlcTransport, TransportError};

/// 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid MAC address: {0}")]
pub struct MacParseError(String);

impl FromStr for MacAddr {
    type Err = MacParseError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(MacParseError(s.to_string()));
        }
        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(MacParseError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

/// Addressing of one bootcode session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSession {
    pub local_mac: MacAddr,
    pub peer_mac: MacAddr,
    pub ether_type: u16,
    pub session_id: u16,
}

impl DeviceSession {
    pub fn new(local_mac: MacAddr, peer_mac: MacAddr) -> Self {
        Self {
            local_mac,
            peer_mac,
            ether_type: PLC_ETHER_TYPE,
            session_id: SESSION_ID,
        }
    }

    pub fn broadcast(local_mac: MacAddr) -> Self {
        Self::new(local_mac, MacAddr::BROADCAST)
    }

    pub fn with_ether_type(mut self, ether_type: u16) -> Self {
        self.ether_type = ether_type;
        self
    }
}

/// Open session that disconnects when dropped.
pub struct SessionGuard<'a, T: PlcTransport + ?Sized> {
    transport: &'a T,
    session: DeviceSession,
    open: bool,
}

impl<'a, T: PlcTransport + ?Sized> SessionGuard<'a, T> {
    pub fn open(transport: &'a T, session: DeviceSession) -> Result<Self, LoadError> {
        transport.connect(&session)?;
        debug!(peer = %session.peer_mac, "Session opened");
        Ok(Self {
            transport,
            session,
            open: true,
        })
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Disconnect now and report the outcome.
    pub fn close(mut self) -> Result<(), LoadError> {
        self.open = false;
        self.transport.disconnect()?;
        debug!(peer = %self.session.peer_mac, "Session closed");
        Ok(())
    }
}

impl<T: PlcTransport + ?Sized> Deref for SessionGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.transport
    }
}

impl<T: PlcTransport + ?Sized> Drop for SessionGuard<'_, T> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.transport.disconnect() {
                warn!(peer = %self.session.peer_mac, error = %e, "Disconnect failed");
            }
        }
    }
}

fn expect_state(expected: DeviceState, actual: DeviceState) -> Result<(), LoadError> {
    if expected != actual {
        return Err(LoadError::DeviceStateMismatch { expected, actual });
    }
    Ok(())
}

fn session(config: &LoaderConfig, local_mac: MacAddr, peer_mac: MacAddr) -> DeviceSession {
    DeviceSession::new(local_mac, peer_mac).with_ether_type(config.ether_type)
}

/// Phase A: find the device on broadcast and learn its MAC.
#[instrument(level = "info", skip(transport, config, observer), fields(local = %local_mac))]
pub fn discover<T, O>(
    transport: &T,
    config: &LoaderConfig,
    observer: &O,
    local_mac: MacAddr,
    rmii_mode: bool,
) -> Result<MacAddr, LoadError>
where
    T: PlcTransport + ?Sized,
    O: LoadObserver + ?Sized,
{
    let link = SessionGuard::open(transport, session(config, local_mac, MacAddr::BROADCAST))?;

    if rmii_mode {
        clear_rmii_timing(&*link, config)?;
    }

    let info = link.query_device(config.query_timeout())?;
    expect_state(DeviceState::Bootcode, info.state)?;
    link.close()?;

    info!(device = %info.mac, "Device found in bootcode");
    observer.on_event(&LoadEvent::DeviceDiscovered { mac: info.mac });
    Ok(info.mac)
}

/// Zero the Ethernet timing register, retrying while the write times out.
pub fn clear_rmii_timing<T: PlcTransport + ?Sized>(
    transport: &T,
    config: &LoaderConfig,
) -> Result<(), LoadError> {
    let mut retry = 0;
    loop {
        match transport.write_memory(
            RMII_TIMING_REGISTER,
            &0u32.to_le_bytes(),
            config.write_timeout(),
        ) {
            Ok(()) => {
                debug!(retry, "RMII timing register cleared");
                return Ok(());
            }
            Err(TransportError::Timeout { .. }) if retry < config.rmii_write_retries => {
                retry += 1;
                warn!(retry, "RMII timing write timed out, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Phase B: unicast session to the discovered device.
pub fn open_addressed<'a, T: PlcTransport + ?Sized>(
    transport: &'a T,
    config: &LoaderConfig,
    local_mac: MacAddr,
    device_mac: MacAddr,
) -> Result<SessionGuard<'a, T>, LoadError> {
    info!(device = %device_mac, "Opening addressed session");
    SessionGuard::open(transport, session(config, local_mac, device_mac))
}

/// Phase C: poll on broadcast until the firmware reports in.
#[instrument(level = "info", skip(transport, config, observer), fields(local = %local_mac))]
pub fn await_firmware<T, O>(
    transport: &T,
    config: &LoaderConfig,
    observer: &O,
    local_mac: MacAddr,
) -> Result<(), LoadError>
where
    T: PlcTransport + ?Sized,
    O: LoadObserver + ?Sized,
{
    let link = SessionGuard::open(transport, session(config, local_mac, MacAddr::BROADCAST))?;
    poll_until_running(&*link, config, observer)?;
    link.close()
}

/// Query up to `poll_attempts` times, tolerating timeouts.
///
/// The first real answer decides: it must be `FirmwareRunning`.
pub fn poll_until_running<T, O>(
    transport: &T,
    config: &LoaderConfig,
    observer: &O,
) -> Result<(), LoadError>
where
    T: PlcTransport + ?Sized,
    O: LoadObserver + ?Sized,
{
    let timeout = config.query_timeout();
    for attempt in 1..=config.poll_attempts {
        observer.on_event(&LoadEvent::PollAttempt {
            attempt,
            max: config.poll_attempts,
        });
        match transport.query_device(timeout) {
            Ok(info) => {
                expect_state(DeviceState::FirmwareRunning, info.state)?;
                info!(attempt, device = %info.mac, "Firmware is running");
                return Ok(());
            }
            Err(TransportError::Timeout { .. }) => {
                debug!(attempt, "No answer yet");
                if attempt < config.poll_attempts {
                    thread::sleep(config.poll_interval());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    warn!(attempts = config.poll_attempts, "Device never reported running firmware");
    Err(TransportError::timeout(timeout).into())
}
