use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{TypeError, TypeResult};

/// Content-addressed identifier for a stored blob.
///
/// A `Hash` is the 128-bit MD5 digest of a blob's exact byte content, held as
/// two 64-bit words. Printing `left` then `right` as 16 uppercase hex digits
/// each yields the canonical 32-character text form, and the byte form is the
/// same 16 bytes in big-endian order. The derived ordering compares `left`
/// first, then `right`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash {
    left: u64,
    right: u64,
}

impl Hash {
    /// Size of a hash, in bytes.
    pub const SIZE: usize = 16;

    /// Length of the canonical hex form, in characters.
    pub const HEX_LEN: usize = 32;

    /// Hash of the empty blob.
    pub const EMPTY: Self = Self::new(0xD41D_8CD9_8F00_B204, 0xE980_0998_ECF8_427E);

    pub const fn new(left: u64, right: u64) -> Self {
        Self { left, right }
    }

    /// Compute the hash of a complete in-memory blob.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// The first 64 bits.
    pub fn left(&self) -> u64 {
        self.left
    }

    /// The last 64 bits.
    pub fn right(&self) -> u64 {
        self.right
    }

    /// Build from exactly 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> TypeResult<Self> {
        let array: [u8; 16] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self::from_array(array))
    }

    pub fn from_array(bytes: [u8; 16]) -> Self {
        let mut left = [0u8; 8];
        let mut right = [0u8; 8];
        left.copy_from_slice(&bytes[..8]);
        right.copy_from_slice(&bytes[8..]);
        Self {
            left: u64::from_be_bytes(left),
            right: u64::from_be_bytes(right),
        }
    }

    /// The 16-byte form. Inverse of [`Hash::from_bytes`].
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.left.to_be_bytes());
        out[8..].copy_from_slice(&self.right.to_be_bytes());
        out
    }

    /// Parse the 32-character hex form. Accepts any case.
    pub fn parse(s: &str) -> TypeResult<Self> {
        if s.len() != Self::HEX_LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::HEX_LEN,
                actual: s.len(),
            });
        }
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Like [`Hash::parse`], discarding the reason for failure.
    pub fn try_parse(s: &str) -> Option<Self> {
        Self::parse(s).ok()
    }

    /// Uppercase 32-character hex representation.
    pub fn to_hex(&self) -> String {
        format!("{:016X}{:016X}", self.left, self.right)
    }

    /// Case-insensitive prefix test against the hex form.
    pub fn starts_with(&self, prefix: &str) -> bool {
        prefix.len() <= Self::HEX_LEN
            && self.to_hex()[..prefix.len()].eq_ignore_ascii_case(prefix)
    }

    /// Base64 of the 16 raw bytes, as used by `Content-MD5` headers.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({:016X})", self.left)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}{:016X}", self.left, self.right)
    }
}

impl FromStr for Hash {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<[u8; 16]> for Hash {
    fn from(bytes: [u8; 16]) -> Self {
        Self::from_array(bytes)
    }
}

impl From<Hash> for [u8; 16] {
    fn from(hash: Hash) -> Self {
        hash.to_bytes()
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental MD5 context producing a [`Hash`].
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Md5,
    len: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next bytes of the blob.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.len += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(self) -> Hash {
        let digest = self.inner.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest);
        Hash::from_array(bytes)
    }
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHasher").field("len", &self.len).finish()
    }
}
