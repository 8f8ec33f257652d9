//! Chunked copy of a byte range from a [`Reader`] into device memory.

use std::time::Duration;

use tracing::{debug, trace};

use crate::checksum::{ByteSum, WordSum};
use crate::config::ConfigError;
use crate::error::LoadError;
use crate::reader::Reader;
use crate::transport::{PlcTransport, TransportError};

/// Sink for one chunk of device memory.
pub trait MemoryWriter {
    fn write_chunk(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError>;
}

/// Writes chunks with `write_memory`.
pub struct MemoryWrite<'a, T: ?Sized> {
    transport: &'a T,
    timeout: Duration,
}

impl<'a, T: PlcTransport + ?Sized> MemoryWrite<'a, T> {
    pub fn new(transport: &'a T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }
}

impl<T: PlcTransport + ?Sized> MemoryWriter for MemoryWrite<'_, T> {
    fn write_chunk(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        self.transport.write_memory(address, data, self.timeout)
    }
}

/// Writes CPU image packets with `set_image_data`, keeping a byte-sum of
/// everything that went out.
pub struct ImageDataWrite<'a, T: ?Sized> {
    transport: &'a T,
    sum: ByteSum,
}

impl<'a, T: PlcTransport + ?Sized> ImageDataWrite<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            sum: ByteSum::new(),
        }
    }

    /// Byte-sum of all data written so far.
    pub fn checksum(&self) -> u32 {
        self.sum.finalize()
    }
}

impl<T: PlcTransport + ?Sized> MemoryWriter for ImageDataWrite<'_, T> {
    fn write_chunk(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        self.transport.set_image_data(address, data)?;
        self.sum = self.sum.update(data);
        Ok(())
    }
}

/// Reliable range copy in chunks of at most `chunk_size` bytes.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedTransfer {
    chunk_size: usize,
}

impl ChunkedTransfer {
    /// `chunk_size` must be a non-zero multiple of 4.
    pub fn new(chunk_size: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 || chunk_size % 4 != 0 {
            return Err(ConfigError::BadChunkSize(chunk_size));
        }
        Ok(Self { chunk_size })
    }

    /// Copy `length` bytes at `source_offset` to `device_address`.
    ///
    /// A non-zero `expected_checksum` is compared against the word-sum of
    /// the copied range once the last chunk is out. The first failing chunk
    /// aborts the whole range.
    pub fn transfer<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        source_offset: u64,
        length: u32,
        device_address: u32,
        expected_checksum: u32,
    ) -> Result<(), LoadError>
    where
        R: Reader + ?Sized,
        W: MemoryWriter + ?Sized,
    {
        let verify = expected_checksum != 0;
        let mut sum = WordSum::new();
        let mut offset = source_offset;
        let mut address = device_address;
        let mut remaining = length as usize;

        while remaining > 0 {
            let len = remaining.min(self.chunk_size);
            let chunk = reader.read_at(offset, len)?;
            writer.write_chunk(address, &chunk)?;
            if verify {
                sum = sum.update(&chunk);
            }
            trace!(
                address = %format!("0x{:08X}", address),
                len,
                "Chunk written"
            );

            offset += len as u64;
            address = address.wrapping_add(len as u32);
            remaining -= len;
        }

        if verify {
            let actual = sum.finalize();
            if actual != expected_checksum {
                return Err(LoadError::ChecksumMismatch {
                    target: format!("range at 0x{:X} -> 0x{:08X}", source_offset, device_address),
                    expected: expected_checksum,
                    actual,
                });
            }
        }

        debug!(
            source = %format!("0x{:X}", source_offset),
            address = %format!("0x{:08X}", device_address),
            length,
            "Range transferred"
        );
        Ok(())
    }
}
