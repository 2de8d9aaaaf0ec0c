//! Record header of the mapped append log.
//!
//! ```text
//! offset  size  field
//! 0       8     data_offset (u64 LE), always offset of header + 32
//! 8       8     length      (u64 LE)
//! 16      8     hash.left   (u64 LE)
//! 24      8     hash.right  (u64 LE)
//! 32      len   blob bytes, then zero padding to an 8-byte boundary
//! ```

use cas_types::Hash;

/// Encoded size of a [`RecordHeader`].
pub const HEADER_SIZE: u64 = 32;

/// Records start on multiples of this.
pub const RECORD_ALIGN: u64 = 8;

/// Round `n` up to the next record boundary.
pub fn align_up(n: u64) -> u64 {
    n.div_ceil(RECORD_ALIGN) * RECORD_ALIGN
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub data_offset: u64,
    pub length: u64,
    pub hash: Hash,
}

impl RecordHeader {
    /// Header for a record starting at `offset`.
    pub fn at(offset: u64, length: u64, hash: Hash) -> Self {
        Self {
            data_offset: offset + HEADER_SIZE,
            length,
            hash,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut out = [0u8; HEADER_SIZE as usize];
        out[0..8].copy_from_slice(&self.data_offset.to_le_bytes());
        out[8..16].copy_from_slice(&self.length.to_le_bytes());
        out[16..24].copy_from_slice(&self.hash.left().to_le_bytes());
        out[24..32].copy_from_slice(&self.hash.right().to_le_bytes());
        out
    }

    /// Read the header stored at `offset` of `region`, if it is valid.
    ///
    /// A header is valid when it points right past itself and its data fits
    /// the region. Zeroed memory is never valid.
    pub fn read(region: &[u8], offset: u64) -> Option<Self> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(HEADER_SIZE as usize)?;
        let bytes = region.get(start..end)?;

        let word = |i: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            u64::from_le_bytes(w)
        };
        let header = Self {
            data_offset: word(0),
            length: word(1),
            hash: Hash::new(word(2), word(3)),
        };

        let data_end = header.data_offset.checked_add(header.length)?;
        (header.data_offset == offset + HEADER_SIZE && data_end <= region.len() as u64)
            .then_some(header)
    }

    /// Offset of the header itself.
    pub fn offset(&self) -> u64 {
        self.data_offset - HEADER_SIZE
    }

    /// One past the last data byte. Unaligned.
    pub fn data_end(&self) -> u64 {
        self.data_offset + self.length
    }

    /// Where the next record goes.
    pub fn next_offset(&self) -> u64 {
        align_up(self.data_end())
    }
}
