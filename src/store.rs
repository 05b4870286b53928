use crate::config::{LookupMode, StoreConfig};
use crate::descriptor::BlobDescriptor;
use crate::error::{BlobError, Result};
use crate::hash_id::{ContentHash, HashId};
use crate::index::{BlobIndex, ReconcileOutcome};
use crate::log::BlobLog;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

pub const LOG_EXTENSION: &str = "blobs";
pub const INDEX_EXTENSION: &str = "blobs-index";

/// Content-addressed storage as seen by callers such as an icon cache.
pub trait ContentStore {
    /// Store `content` and return its id. Storing the same bytes twice is a
    /// no-op that returns the same id.
    fn put(&mut self, content: &[u8]) -> Result<HashId>;

    /// Fetch the bytes stored under `id`, or `None` if there are none.
    fn get(&mut self, id: HashId) -> Result<Option<Vec<u8>>>;

    fn contains(&mut self, id: HashId) -> Result<bool>;

    /// Drop every blob in the store.
    fn delete_store(&mut self) -> Result<()>;

    /// Get the name of this store kind for display purposes.
    fn backend_name() -> &'static str
    where
        Self: Sized;
}

/// Size summary of one store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub name: String,
    pub blobs: usize,
    pub distinct_ids: usize,
    pub content_bytes: u64,
    pub log_bytes: u64,
    pub index_bytes: u64,
}

/// Outcome of re-hashing every indexed blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    /// Ids whose stored bytes no longer hash to their descriptor
    pub mismatched: Vec<HashId>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty()
    }
}

/// A named blob log plus its index.
///
/// Files are created on the first `put` and no handles are kept open
/// between calls; every access re-validates the index against the log.
pub struct BlobStore {
    name: String,
    config: StoreConfig,
    log: BlobLog,
    index: BlobIndex,
}

impl BlobStore {
    /// Open the store `name` under `config.root`. Creates no files.
    pub fn open(config: &StoreConfig, name: &str) -> Result<Self> {
        validate_name(name)?;
        let log_path = config.root.join(format!("{name}.{LOG_EXTENSION}"));
        let index_path = config.root.join(format!("{name}.{INDEX_EXTENSION}"));

        Ok(Self {
            name: name.to_string(),
            config: config.clone(),
            log: BlobLog::new(log_path, config.sync_writes),
            index: BlobIndex::new(index_path, config.lookup, config.sync_writes),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn index_path(&self) -> &Path {
        self.index.path()
    }

    pub fn reconcile(&mut self) -> Result<ReconcileOutcome> {
        self.index.reconcile(&self.log)
    }

    /// Number of indexed records, duplicates included.
    pub fn len(&mut self) -> Result<usize> {
        self.reconcile()?;
        Ok(self.index.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every distinct id, in the order it was first stored.
    pub fn ids(&mut self) -> Result<Vec<HashId>> {
        self.reconcile()?;
        let mut seen = std::collections::HashSet::new();
        Ok(self
            .index
            .descriptors()
            .iter()
            .map(BlobDescriptor::hash_id)
            .filter(|id| seen.insert(*id))
            .collect())
    }

    /// Descriptors in log order.
    pub fn descriptors(&mut self) -> Result<Vec<BlobDescriptor>> {
        self.reconcile()?;
        Ok(self.index.descriptors().to_vec())
    }

    /// Find the blob whose full hash starts with `prefix` (hex).
    pub fn resolve_prefix(&mut self, prefix: &str) -> Result<Option<BlobDescriptor>> {
        self.reconcile()?;
        self.index.find_by_prefix(prefix)
    }

    /// Read the bytes a descriptor points at. Strict stores always confirm
    /// the full hash; fingerprint stores only with `verify_reads`.
    pub fn read(&self, descriptor: &BlobDescriptor) -> Result<Vec<u8>> {
        let content = self.log.read(descriptor)?;
        let confirm = self.config.verify_reads || self.config.lookup == LookupMode::Strict;
        if confirm && ContentHash::of(&content) != descriptor.hash {
            return Err(BlobError::corrupt_log(
                self.log.path(),
                format!("record at {} does not match its hash", descriptor.offset),
            ));
        }
        Ok(content)
    }

    /// Look up `id`, reconciling first when it is unknown, when its record
    /// no longer fits in the log, or when the index file was replaced.
    fn locate(&mut self, id: HashId) -> Result<Option<BlobDescriptor>> {
        if let Some(desc) = self.index.find(id)? {
            if desc.tail() <= self.log.len()? && self.index.is_current()? {
                return Ok(Some(desc));
            }
        }
        self.reconcile()?;
        self.index.find(id)
    }

    pub fn stats(&mut self) -> Result<StoreStats> {
        self.reconcile()?;
        let descriptors = self.index.descriptors();
        let index_bytes = match std::fs::metadata(self.index.path()) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        Ok(StoreStats {
            name: self.name.clone(),
            blobs: descriptors.len(),
            distinct_ids: descriptors
                .iter()
                .map(BlobDescriptor::hash_id)
                .collect::<std::collections::HashSet<_>>()
                .len(),
            content_bytes: descriptors.iter().map(|d| d.length as u64).sum(),
            log_bytes: self.log.len()?,
            index_bytes,
        })
    }

    /// Re-read and re-hash every indexed blob.
    pub fn verify(&mut self) -> Result<VerifyReport> {
        self.reconcile()?;
        let mut report = VerifyReport::default();
        for desc in self.index.descriptors() {
            let content = self.log.read(desc)?;
            report.checked += 1;
            if ContentHash::of(&content) != desc.hash {
                report.mismatched.push(desc.hash_id());
            }
        }
        if !report.is_clean() {
            warn!(store = %self.name, mismatched = report.mismatched.len(), "blob verification failed");
        }
        Ok(report)
    }

    /// Throw the index away and rebuild it from the log.
    pub fn rebuild_index(&mut self) -> Result<ReconcileOutcome> {
        self.index.reset()?;
        Ok(match self.reconcile()? {
            ReconcileOutcome::Initialized {
                caught_up, scanned, ..
            } => ReconcileOutcome::Initialized {
                caught_up,
                scanned,
                rebuilt: true,
            },
            ReconcileOutcome::NotInitialized => ReconcileOutcome::NotInitialized,
        })
    }

    /// Second phase of a put: record the appended blob in the index, or
    /// take the append back if that fails.
    fn commit(&mut self, descriptor: BlobDescriptor) -> Result<()> {
        if let Err(e) = self.index.append_record(descriptor) {
            if let Err(cleanup) = self.log.cancel_last_append(&descriptor) {
                warn!(
                    store = %self.name,
                    offset = descriptor.offset,
                    error = %cleanup,
                    "could not cancel orphaned append"
                );
            }
            return Err(e);
        }
        Ok(())
    }
}

impl ContentStore for BlobStore {
    fn put(&mut self, content: &[u8]) -> Result<HashId> {
        let hash = ContentHash::of(content);
        let id = hash.hash_id();

        if let ReconcileOutcome::NotInitialized = self.reconcile()? {
            info!(store = %self.name, path = %self.log.path().display(), "creating blob store");
            self.log.open_append()?;
            self.reconcile()?;
        }

        match self.config.lookup {
            LookupMode::Strict => {
                if self.index.find_by_hash(&hash).is_some() {
                    return Ok(id);
                }
                if self.index.contains_id(id) {
                    let mut candidates: Vec<ContentHash> =
                        self.index.candidates(id).iter().map(|d| d.hash).collect();
                    candidates.push(hash);
                    return Err(BlobError::AmbiguousHash { id, candidates });
                }
            }
            LookupMode::Fingerprint => {
                if self.index.contains_id(id) {
                    return Ok(id);
                }
            }
        }

        let descriptor = self.log.append(content)?;
        self.commit(descriptor)?;
        debug!(store = %self.name, id = %id, bytes = content.len(), "stored blob");
        Ok(id)
    }

    fn get(&mut self, id: HashId) -> Result<Option<Vec<u8>>> {
        match self.locate(id)? {
            Some(desc) => Ok(Some(self.read(&desc)?)),
            None => Ok(None),
        }
    }

    fn contains(&mut self, id: HashId) -> Result<bool> {
        self.reconcile()?;
        Ok(self.index.find(id)?.is_some())
    }

    fn delete_store(&mut self) -> Result<()> {
        if self.log.delete()? {
            info!(store = %self.name, "deleted blob store");
        }
        self.reconcile()?;
        Ok(())
    }

    fn backend_name() -> &'static str {
        "Blob log + index"
    }
}

/// Store names become file names, so they must stay inside the root.
fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.chars().any(|c| c == '/' || c == '\\' || c == '\0');
    if bad {
        return Err(BlobError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// In-memory [`ContentStore`] with the same dedup and collision rules as
/// [`BlobStore`].
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    mode: LookupMode,
    blobs: HashMap<HashId, Vec<(ContentHash, Vec<u8>)>>,
}

impl MemoryBlobStore {
    pub fn new(mode: LookupMode) -> Self {
        Self {
            mode,
            blobs: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl ContentStore for MemoryBlobStore {
    fn put(&mut self, content: &[u8]) -> Result<HashId> {
        let hash = ContentHash::of(content);
        let id = hash.hash_id();
        let entries = self.blobs.entry(id).or_default();

        if entries.iter().any(|(h, _)| *h == hash) {
            return Ok(id);
        }
        if !entries.is_empty() {
            match self.mode {
                LookupMode::Fingerprint => return Ok(id),
                LookupMode::Strict => {
                    let mut candidates: Vec<ContentHash> = entries.iter().map(|(h, _)| *h).collect();
                    candidates.push(hash);
                    return Err(BlobError::AmbiguousHash { id, candidates });
                }
            }
        }
        entries.push((hash, content.to_vec()));
        Ok(id)
    }

    fn get(&mut self, id: HashId) -> Result<Option<Vec<u8>>> {
        match self.blobs.get(&id).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([(_, content), ..]) => Ok(Some(content.clone())),
        }
    }

    fn contains(&mut self, id: HashId) -> Result<bool> {
        Ok(self.blobs.get(&id).is_some_and(|entries| !entries.is_empty()))
    }

    fn delete_store(&mut self) -> Result<()> {
        self.blobs.clear();
        Ok(())
    }

    fn backend_name() -> &'static str {
        "In-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RECORD_SIZE;
    use crate::index::{INDEX_HEADER_SIZE, INDEX_MAGIC};
    use crate::log::LOG_HEADER_SIZE;
    use proptest::collection::vec as prop_vec;
    use proptest::prelude::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn open(dir: &TempDir, name: &str) -> BlobStore {
        BlobStore::open(&StoreConfig::with_root(dir.path()), name).unwrap()
    }

    fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    #[test]
    fn test_icon_scenario() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, "icons");

        let png_a: Vec<u8> = (1..=16).collect();
        let png_b: Vec<u8> = (100..=131).collect();

        let id1 = store.put(&png_a).unwrap();
        let id2 = store.put(&png_a).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(file_len(store.log_path()), 8 + 4 + 16);

        let id3 = store.put(&png_b).unwrap();
        assert_ne!(id3, id1);
        assert_eq!(store.get(id1).unwrap(), Some(png_a));
        assert_eq!(store.get(id3).unwrap(), Some(png_b));
    }

    #[test]
    fn test_open_is_lazy() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, "lazy");
        assert!(!store.log_path().exists());
        assert!(!store.index_path().exists());

        assert_eq!(store.get(HashId::from_content(b"nothing")).unwrap(), None);
        assert!(!store.contains(HashId::from_content(b"nothing")).unwrap());
        assert!(!store.log_path().exists());
    }

    #[test]
    fn test_invalid_names() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::with_root(dir.path());
        for name in ["", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(
                BlobStore::open(&config, name),
                Err(BlobError::InvalidName(_))
            ));
        }
        assert!(BlobStore::open(&config, "list-7.icons").is_ok());
    }

    #[test]
    fn test_reopen_reads_back() {
        let dir = TempDir::new().unwrap();
        let blobs: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; i as usize * 3]).collect();

        let ids: Vec<HashId> = {
            let mut store = open(&dir, "icons");
            blobs.iter().map(|b| store.put(b).unwrap()).collect()
        };

        let mut store = open(&dir, "icons");
        for (id, blob) in ids.iter().zip(&blobs) {
            assert_eq!(store.get(*id).unwrap().as_ref(), Some(blob));
        }
        assert_eq!(store.len().unwrap(), 20);
    }

    #[test]
    fn test_two_accessors_interleave() {
        let dir = TempDir::new().unwrap();
        let mut first = open(&dir, "shared");
        let mut second = open(&dir, "shared");

        let a = first.put(b"from first").unwrap();
        let b = second.put(b"from second").unwrap();
        assert_eq!(second.put(b"from first").unwrap(), a);

        assert_eq!(first.get(b).unwrap(), Some(b"from second".to_vec()));
        assert_eq!(first.len().unwrap(), 2);
        assert_eq!(second.len().unwrap(), 2);
    }

    #[test]
    fn test_reader_sees_delete_and_refill() {
        let dir = TempDir::new().unwrap();
        let mut reader = open(&dir, "shared");
        let mut writer = open(&dir, "shared");

        let old = reader.put(&[1u8; 16]).unwrap();
        assert_eq!(reader.get(old).unwrap(), Some(vec![1u8; 16]));

        // Same length, same offset, different bytes.
        writer.delete_store().unwrap();
        let new = writer.put(&[2u8; 16]).unwrap();
        assert_eq!(file_len(writer.log_path()), 8 + 4 + 16);

        assert_eq!(reader.get(old).unwrap(), None);
        assert!(reader.contains(new).unwrap());
        assert_eq!(reader.get(new).unwrap(), Some(vec![2u8; 16]));
        assert_eq!(reader.len().unwrap(), 1);
    }

    #[test]
    fn test_reader_sees_rebuild_by_other_accessor() {
        let dir = TempDir::new().unwrap();
        let mut reader = open(&dir, "shared");
        let mut other = open(&dir, "shared");

        let a = reader.put(b"first").unwrap();
        let b = reader.put(b"second").unwrap();
        other.rebuild_index().unwrap();

        assert_eq!(reader.get(a).unwrap(), Some(b"first".to_vec()));
        assert_eq!(reader.get(b).unwrap(), Some(b"second".to_vec()));
        let c = other.put(b"third").unwrap();
        assert_eq!(reader.get(c).unwrap(), Some(b"third".to_vec()));
    }

    #[test]
    fn test_corrupt_length_mid_log_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, "icons");
        let ids: Vec<HashId> = (0..5u8)
            .map(|i| store.put(&[i; 10]).unwrap())
            .collect();
        let descriptors = store.descriptors().unwrap();
        let log_len = file_len(store.log_path());
        assert_eq!(log_len, 78);

        let mut bytes = std::fs::read(store.log_path()).unwrap();
        let at = descriptors[1].offset as usize;
        bytes[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(store.log_path(), &bytes).unwrap();
        std::fs::remove_file(store.index_path()).unwrap();

        let mut fresh = open(&dir, "icons");
        assert!(matches!(
            fresh.get(ids[4]),
            Err(BlobError::CorruptLog { .. })
        ));
        assert!(matches!(
            fresh.contains(ids[0]),
            Err(BlobError::CorruptLog { .. })
        ));
        assert_eq!(file_len(fresh.log_path()), log_len);

        // The handle that indexed everything earlier hits the same error once
        // it notices the index file is gone.
        assert!(matches!(
            store.get(ids[1]),
            Err(BlobError::CorruptLog { .. })
        ));
        assert_eq!(file_len(store.log_path()), log_len);
    }

    #[test]
    fn test_desync_self_heal() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, "icons");
        let ids: Vec<HashId> = (0..5u8)
            .map(|i| store.put(&[i; 10]).unwrap())
            .collect();
        let descriptors = store.descriptors().unwrap();

        // Cut into the middle of the fourth record.
        let file = OpenOptions::new().write(true).open(store.log_path()).unwrap();
        file.set_len(descriptors[3].offset + 6).unwrap();

        assert_eq!(store.get(ids[4]).unwrap(), None);
        assert_eq!(store.get(ids[3]).unwrap(), None);
        assert_eq!(store.get(ids[0]).unwrap(), Some(vec![0u8; 10]));
        assert_eq!(store.descriptors().unwrap(), descriptors[..3].to_vec());
        assert_eq!(
            file_len(store.index_path()),
            INDEX_HEADER_SIZE + 3 * RECORD_SIZE as u64
        );

        // The lost blob can be stored again.
        let again = store.put(&[4u8; 10]).unwrap();
        assert_eq!(again, ids[4]);
        assert_eq!(store.get(again).unwrap(), Some(vec![4u8; 10]));
    }

    #[test]
    fn test_desync_on_known_key_reconciles() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, "icons");
        let kept = store.put(b"kept").unwrap();
        let lost = store.put(b"lost").unwrap();
        let first = store.descriptors().unwrap()[0];

        let file = OpenOptions::new().write(true).open(store.log_path()).unwrap();
        file.set_len(first.tail()).unwrap();

        // `lost` is still in memory, but its record is gone.
        assert_eq!(store.get(lost).unwrap(), None);
        assert!(store.contains(kept).unwrap());
    }

    #[test]
    fn test_rebuild_equivalence() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open(&dir, "icons");
            for i in 0..10u8 {
                store.put(&vec![i; 1 + i as usize]).unwrap();
            }
            store.put(&[3u8; 4]).unwrap();
        }

        let index_path = open(&dir, "icons").index_path().to_path_buf();
        let incremental = std::fs::read(&index_path).unwrap();
        std::fs::remove_file(&index_path).unwrap();

        let mut store = open(&dir, "icons");
        let outcome = store.reconcile().unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Initialized {
                caught_up: 0,
                scanned: 10,
                rebuilt: false
            }
        );
        assert_eq!(std::fs::read(&index_path).unwrap(), incremental);

        assert_eq!(
            store.rebuild_index().unwrap(),
            ReconcileOutcome::Initialized {
                caught_up: 0,
                scanned: 10,
                rebuilt: true
            }
        );
        assert_eq!(std::fs::read(&index_path).unwrap(), incremental);
    }

    #[test]
    fn test_delete_store() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, "icons");
        let id = store.put(b"icon").unwrap();

        store.delete_store().unwrap();
        assert!(!store.log_path().exists());
        assert!(!store.index_path().exists());
        assert_eq!(store.get(id).unwrap(), None);
        assert!(store.is_empty().unwrap());

        // Usable again afterwards.
        assert_eq!(store.put(b"icon").unwrap(), id);
        assert_eq!(store.get(id).unwrap(), Some(b"icon".to_vec()));
    }

    #[test]
    fn test_failed_index_append_cancels_log_append() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, "icons");
        store.put(b"first").unwrap();
        let log_len = file_len(store.log_path());

        let descriptor = store.log.append(b"second").unwrap();
        // Make the index file disagree with memory so the append is refused.
        let file = OpenOptions::new().write(true).open(store.index_path()).unwrap();
        file.set_len(INDEX_HEADER_SIZE).unwrap();

        assert!(matches!(
            store.commit(descriptor),
            Err(BlobError::IndexCorrupt { .. })
        ));
        assert_eq!(file_len(store.log_path()), log_len);
    }

    #[test]
    fn test_strict_put_rejects_collision() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, "icons");
        store.put(b"resident").unwrap();
        let resident = store.descriptors().unwrap()[0];

        // Rewrite the index so the resident record claims a hash that shares
        // the newcomer's fingerprint but not its full digest.
        let newcomer = ContentHash::of(b"newcomer");
        let mut forged = newcomer.0;
        forged[19] ^= 0x01;
        let record = BlobDescriptor::new(resident.offset, resident.length, ContentHash(forged));
        let mut bytes = INDEX_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&record.encode());
        std::fs::write(store.index_path(), bytes).unwrap();

        let log_len = file_len(store.log_path());
        let mut fresh = open(&dir, "icons");
        match fresh.put(b"newcomer") {
            Err(BlobError::AmbiguousHash { id, candidates }) => {
                assert_eq!(id, newcomer.hash_id());
                assert_eq!(candidates, vec![ContentHash(forged), newcomer]);
            }
            unexpected => panic!("expected AmbiguousHash, got {:?}", unexpected),
        }
        assert_eq!(file_len(fresh.log_path()), log_len);
        // The forged record does not hash to what it claims.
        assert!(matches!(
            fresh.get(newcomer.hash_id()),
            Err(BlobError::CorruptLog { .. })
        ));

        // The fingerprint-only variant treats it as already stored.
        let config = StoreConfig {
            lookup: LookupMode::Fingerprint,
            ..StoreConfig::with_root(dir.path())
        };
        let mut loose = BlobStore::open(&config, "icons").unwrap();
        assert_eq!(loose.put(b"newcomer").unwrap(), newcomer.hash_id());
        assert_eq!(file_len(loose.log_path()), log_len);
    }

    #[test]
    fn test_verify_and_verify_reads() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            lookup: LookupMode::Fingerprint,
            verify_reads: true,
            ..StoreConfig::with_root(dir.path())
        };
        let mut store = BlobStore::open(&config, "icons").unwrap();
        let id = store.put(b"pristine").unwrap();
        assert!(store.verify().unwrap().is_clean());

        // Flip a content byte in place; lengths still line up.
        let mut bytes = std::fs::read(store.log_path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(store.log_path(), bytes).unwrap();

        let report = store.verify().unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.mismatched, vec![id]);
        assert!(matches!(
            store.get(id),
            Err(BlobError::CorruptLog { .. })
        ));

        // Strict stores confirm the hash without being asked.
        let mut strict = open(&dir, "icons");
        assert!(matches!(
            strict.get(id),
            Err(BlobError::CorruptLog { .. })
        ));
    }

    #[test]
    fn test_stats_and_prefix() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, "icons");
        assert_eq!(store.stats().unwrap().blobs, 0);

        store.put(b"abc").unwrap();
        store.put(b"abcd").unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.name, "icons");
        assert_eq!(stats.blobs, 2);
        assert_eq!(stats.distinct_ids, 2);
        assert_eq!(stats.content_bytes, 7);
        assert_eq!(stats.log_bytes, LOG_HEADER_SIZE + 4 + 3 + 4 + 4);
        assert_eq!(stats.index_bytes, INDEX_HEADER_SIZE + 2 * RECORD_SIZE as u64);

        let found = store.resolve_prefix("a9993e").unwrap().unwrap();
        assert_eq!(store.read(&found).unwrap(), b"abc");
        assert_eq!(store.ids().unwrap().len(), 2);
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryBlobStore::new(LookupMode::Strict);
        let id = store.put(b"icon").unwrap();
        assert_eq!(store.put(b"icon").unwrap(), id);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(id).unwrap(), Some(b"icon".to_vec()));
        assert!(store.contains(id).unwrap());

        store.delete_store().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get(id).unwrap(), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_put_is_idempotent(content in prop_vec(any::<u8>(), 0..512)) {
            let dir = TempDir::new().unwrap();
            let mut store = open(&dir, "prop");

            let first = store.put(&content).unwrap();
            let len = file_len(store.log_path());
            let second = store.put(&content).unwrap();

            prop_assert_eq!(first, second);
            prop_assert_eq!(file_len(store.log_path()), len);
            prop_assert_eq!(store.get(first).unwrap(), Some(content));
        }

        #[test]
        fn prop_reopen_returns_same_bytes(blobs in prop_vec(prop_vec(any::<u8>(), 0..256), 1..30)) {
            let dir = TempDir::new().unwrap();
            let ids: Vec<HashId> = {
                let mut store = open(&dir, "prop");
                blobs.iter().map(|b| store.put(b).unwrap()).collect()
            };

            let mut reopened = open(&dir, "prop");
            for (id, blob) in ids.iter().zip(&blobs) {
                prop_assert_eq!(reopened.get(*id).unwrap(), Some(blob.clone()));
            }
        }

        #[test]
        fn prop_truncation_keeps_whole_records(
            blobs in prop_vec(prop_vec(any::<u8>(), 1..64), 1..20),
            cut in any::<prop::sample::Index>(),
        ) {
            let dir = TempDir::new().unwrap();
            let mut store = open(&dir, "prop");
            for blob in &blobs {
                store.put(blob).unwrap();
            }
            let before = store.descriptors().unwrap();
            let log_len = file_len(store.log_path());
            let new_len = LOG_HEADER_SIZE + cut.index((log_len - LOG_HEADER_SIZE) as usize) as u64;

            let file = OpenOptions::new().write(true).open(store.log_path()).unwrap();
            file.set_len(new_len).unwrap();

            let after = store.descriptors().unwrap();
            let survivors: Vec<BlobDescriptor> =
                before.into_iter().filter(|d| d.tail() <= new_len).collect();
            prop_assert_eq!(&after, &survivors);
            for desc in &after {
                prop_assert!(store.read(desc).is_ok());
            }
        }
    }
}
