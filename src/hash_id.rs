use crate::error::BlobError;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

pub const HASH_LEN: usize = 20;

/// Full SHA-1 digest of a blob's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; HASH_LEN]);

impl ContentHash {
    pub fn of(content: &[u8]) -> Self {
        let digest = Sha1::digest(content);
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest);
        ContentHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn hash_id(&self) -> HashId {
        HashId::from_hash(self)
    }

    /// Case-insensitive match of a hex prefix against the full digest.
    pub fn starts_with_hex(&self, prefix: &str) -> bool {
        let full = hex::encode(self.0);
        prefix.len() <= full.len() && full[..prefix.len()].eq_ignore_ascii_case(prefix)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self)
    }
}

/// Compact fingerprint of a blob: the first 8 bytes of its SHA-1 digest read
/// little-endian, with the sign bit cleared.
///
/// Two different contents may share a `HashId`. Whether that is detected
/// depends on the store's [`LookupMode`](crate::config::LookupMode).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashId(u64);

impl HashId {
    const MASK: u64 = 0x7FFF_FFFF_FFFF_FFFF;

    pub fn from_content(content: &[u8]) -> Self {
        Self::from_hash(&ContentHash::of(content))
    }

    pub fn from_hash(hash: &ContentHash) -> Self {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.0[..8]);
        HashId(u64::from_le_bytes(prefix) & Self::MASK)
    }

    /// Wraps a raw value, clearing the sign bit so it stays in the id space.
    pub fn from_u64(raw: u64) -> Self {
        HashId(raw & Self::MASK)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for HashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashId({:016x})", self.0)
    }
}

impl FromStr for HashId {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BlobError::InvalidHashId(s.to_string()));
        }
        let raw = u64::from_str_radix(s, 16).map_err(|_| BlobError::InvalidHashId(s.to_string()))?;
        if raw > Self::MASK {
            return Err(BlobError::InvalidHashId(s.to_string()));
        }
        Ok(HashId(raw))
    }
}
