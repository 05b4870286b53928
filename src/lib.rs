//! Content-addressed blob storage.
//!
//! A store is a pair of files: an append-only log of length-prefixed blobs
//! and an index of fixed-size records mapping each blob's SHA-1 to its
//! position in the log. The index is derived data. Every access checks it
//! against the log and catches up, or rebuilds it, when the two disagree.

pub mod benchmark;
pub mod config;
pub mod data_gen;
pub mod descriptor;
pub mod error;
pub mod hash_id;
pub mod index;
pub mod log;
pub mod store;

pub use config::{LookupMode, StoreConfig};
pub use descriptor::BlobDescriptor;
pub use error::{BlobError, Result};
pub use hash_id::{ContentHash, HashId};
pub use index::{BlobIndex, ReconcileOutcome};
pub use log::BlobLog;
pub use store::{BlobStore, ContentStore, MemoryBlobStore, StoreStats, VerifyReport};
