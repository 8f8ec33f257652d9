//! Two's-complement checksums used by the firmware container.
//!
//! Both accumulators are plain values: feed them with [`WordSum::update`] /
//! [`ByteSum::update`] as many times as needed, then call `finalize` once.
//! Splitting the input at arbitrary boundaries does not change the result.

/// Sum of little-endian 32-bit words plus the byte count, negated.
///
/// A trailing partial word is zero padded. Bytes that do not yet complete
/// a word are held back until the next update or until `finalize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordSum {
    sum: u32,
    count: u32,
    pending: [u8; 4],
    pending_len: usize,
}

impl WordSum {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn update(mut self, bytes: &[u8]) -> Self {
        self.count = self.count.wrapping_add(bytes.len() as u32);

        let mut rest = bytes;
        if self.pending_len > 0 {
            let take = (4 - self.pending_len).min(rest.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&rest[..take]);
            self.pending_len += take;
            rest = &rest[take..];
            if self.pending_len < 4 {
                return self;
            }
            self.sum = self.sum.wrapping_add(u32::from_le_bytes(self.pending));
            self.pending_len = 0;
        }

        let mut words = rest.chunks_exact(4);
        for word in &mut words {
            self.sum = self
                .sum
                .wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
        }

        let tail = words.remainder();
        self.pending[..tail.len()].copy_from_slice(tail);
        self.pending_len = tail.len();
        self
    }

    pub fn finalize(self) -> u32 {
        let mut sum = self.sum;
        if self.pending_len > 0 {
            let mut last = [0u8; 4];
            last[..self.pending_len].copy_from_slice(&self.pending[..self.pending_len]);
            sum = sum.wrapping_add(u32::from_le_bytes(last));
        }
        sum.wrapping_add(self.count).wrapping_neg()
    }

    /// Single-shot checksum of `bytes`.
    pub fn of(bytes: &[u8]) -> u32 {
        Self::new().update(bytes).finalize()
    }
}

/// Sum of individual bytes, negated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteSum {
    sum: u32,
}

impl ByteSum {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn update(mut self, bytes: &[u8]) -> Self {
        self.sum = bytes
            .iter()
            .fold(self.sum, |acc, &b| acc.wrapping_add(b as u32));
        self
    }

    pub fn finalize(self) -> u32 {
        self.sum.wrapping_neg()
    }

    /// Single-shot checksum of `bytes`.
    pub fn of(bytes: &[u8]) -> u32 {
        Self::new().update(bytes).finalize()
    }
}
