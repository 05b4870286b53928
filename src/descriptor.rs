use crate::hash_id::{ContentHash, HashId, HASH_LEN};

/// Size of the length prefix in front of every log record.
pub const LENGTH_PREFIX: u64 = 4;

/// Size of one index record: offset (8) + length (4) + hash (20).
pub const RECORD_SIZE: usize = 32;

/// Location and identity of one blob inside a blob log.
///
/// Record layout in the index file:
/// - offset: 8 bytes (u64, position of the log record's length prefix)
/// - length: 4 bytes (u32, content length)
/// - hash: 20 bytes (SHA-1 of the content)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub offset: u64,
    pub length: u32,
    pub hash: ContentHash,
}

impl BlobDescriptor {
    pub fn new(offset: u64, length: u32, hash: ContentHash) -> Self {
        Self {
            offset,
            length,
            hash,
        }
    }

    /// Position of the first content byte.
    pub fn content_offset(&self) -> u64 {
        self.offset + LENGTH_PREFIX
    }

    /// Position where the next record begins.
    pub fn tail(&self) -> u64 {
        self.offset + self.length as u64 + LENGTH_PREFIX
    }

    pub fn hash_id(&self) -> HashId {
        self.hash.hash_id()
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.length.to_le_bytes());
        buf[12..32].copy_from_slice(self.hash.as_bytes());
        buf
    }

    pub fn decode(record: &[u8; RECORD_SIZE]) -> Self {
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&record[0..8]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&record[8..12]);
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(&record[12..32]);

        Self {
            offset: u64::from_le_bytes(offset),
            length: u32::from_le_bytes(length),
            hash: ContentHash(hash),
        }
    }
}
