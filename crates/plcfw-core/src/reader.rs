//! Random-access byte sources.
//!
//! The firmware container and the user configuration are both consumed
//! through [`Reader`], which hands out exactly the requested range or fails.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::LoadError;

/// Offset-addressed byte source.
pub trait Reader {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Fails with [`LoadError::ShortRead`] if fewer bytes are available.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, LoadError>;

    /// Total size of the source in bytes.
    fn size(&mut self) -> Result<u64, LoadError>;
}

fn read_slice(data: &[u8], offset: u64, len: usize) -> Result<Vec<u8>, LoadError> {
    let available = (data.len() as u64).saturating_sub(offset) as usize;
    if available < len {
        return Err(LoadError::ShortRead {
            offset,
            requested: len,
            actual: available,
        });
    }
    let start = offset as usize;
    Ok(data[start..start + len].to_vec())
}

impl Reader for &[u8] {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, LoadError> {
        read_slice(self, offset, len)
    }

    fn size(&mut self) -> Result<u64, LoadError> {
        Ok(self.len() as u64)
    }
}

impl Reader for Vec<u8> {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, LoadError> {
        read_slice(self, offset, len)
    }

    fn size(&mut self) -> Result<u64, LoadError> {
        Ok(self.len() as u64)
    }
}

impl<R: Reader + ?Sized> Reader for &mut R {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, LoadError> {
        (**self).read_at(offset, len)
    }

    fn size(&mut self) -> Result<u64, LoadError> {
        (**self).size()
    }
}

/// [`Reader`] over any seekable stream, typically a `std::fs::File`.
#[derive(Debug)]
pub struct IoReader<R> {
    inner: R,
}

impl<R: Read + Seek> IoReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl IoReader<std::fs::File> {
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(std::fs::File::open(path)?))
    }
}

impl<R: Read + Seek> Reader for IoReader<R> {
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, LoadError> {
        self.inner.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(len);
        let actual = (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if actual < len {
            return Err(LoadError::ShortRead {
                offset,
                requested: len,
                actual,
            });
        }
        Ok(buf)
    }

    fn size(&mut self) -> Result<u64, LoadError> {
        Ok(self.inner.seek(SeekFrom::End(0))?)
    }
}
