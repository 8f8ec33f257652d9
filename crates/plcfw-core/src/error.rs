//! Load engine errors.

use std::fmt;
use thiserror::Error;

use crate::boot_header::Destination;
use crate::config::ConfigError;
use crate::container::SectionKind;
use crate::protocol::HeaderError;
use crate::transport::{DeviceState, TransportError};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Short read at offset 0x{offset:X}: requested {requested} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        requested: usize,
        actual: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    #[error("Unsupported section id 0x{id:08X} at offset 0x{offset:X}")]
    UnsupportedSection { id: u32, offset: u64 },

    #[error("Section {0} not found")]
    MissingSection(SectionKind),

    #[error("Section {0} appears more than once")]
    DuplicateSection(SectionKind),

    #[error("Unsupported flash section magic 0x{0:08X}")]
    UnsupportedMagic(u32),

    #[error("Checksum mismatch in {target}: expected 0x{expected:08X}, got 0x{actual:08X}")]
    ChecksumMismatch {
        target: String,
        expected: u32,
        actual: u32,
    },

    #[error("Transport: {0}")]
    Transport(#[from] TransportError),

    #[error("Device state mismatch: expected {expected}, device reports {actual}")]
    DeviceStateMismatch {
        expected: DeviceState,
        actual: DeviceState,
    },

    #[error("Bad CPU id {0}")]
    BadCpuId(u32),

    #[error("Malformed CPU image at offset 0x{offset:X}: {reason}")]
    MalformedImage { offset: u64, reason: String },

    #[error("Boot header defines no target address for {0}")]
    MissingTarget(Destination),

    #[error("Container holds no control processor image")]
    MissingControlImage,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Coarse classification of a [`LoadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    UnsupportedSection,
    ChecksumMismatch,
    TransportTimeout,
    Transport,
    DeviceStateMismatch,
    BadCpuId,
    Malformed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Io => write!(f, "IoError"),
            ErrorKind::UnsupportedSection => write!(f, "UnsupportedSection"),
            ErrorKind::ChecksumMismatch => write!(f, "ChecksumMismatch"),
            ErrorKind::TransportTimeout => write!(f, "TransportTimeout"),
            ErrorKind::Transport => write!(f, "TransportError"),
            ErrorKind::DeviceStateMismatch => write!(f, "DeviceStateMismatch"),
            ErrorKind::BadCpuId => write!(f, "BadCpuId"),
            ErrorKind::Malformed => write!(f, "Malformed"),
        }
    }
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::ShortRead { .. } | LoadError::Io(_) | LoadError::Header(_) => ErrorKind::Io,
            LoadError::UnsupportedSection { .. }
            | LoadError::MissingSection(_)
            | LoadError::DuplicateSection(_)
            | LoadError::UnsupportedMagic(_) => ErrorKind::UnsupportedSection,
            LoadError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            LoadError::Transport(TransportError::Timeout { .. }) => ErrorKind::TransportTimeout,
            LoadError::Transport(_) => ErrorKind::Transport,
            LoadError::DeviceStateMismatch { .. } => ErrorKind::DeviceStateMismatch,
            LoadError::BadCpuId(_) => ErrorKind::BadCpuId,
            LoadError::MalformedImage { .. }
            | LoadError::MissingTarget(_)
            | LoadError::MissingControlImage
            | LoadError::Config(_) => ErrorKind::Malformed,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::TransportTimeout
    }
}
