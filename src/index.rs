use crate::config::LookupMode;
use crate::descriptor::{BlobDescriptor, LENGTH_PREFIX, RECORD_SIZE};
use crate::error::{BlobError, Result};
use crate::hash_id::{ContentHash, HashId};
use crate::log::{BlobLog, HeaderState, LOG_HEADER_SIZE};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// "BLOBINDX" read as a little-endian u64.
pub const INDEX_MAGIC: u64 = 0x5844_4E49_424F_4C42;
pub const INDEX_HEADER_SIZE: u64 = 8;

/// File layout:
/// - magic: 8 bytes (u64)
/// - one 32-byte [`BlobDescriptor`] record per log record, in log order

/// Result of bringing an index in line with its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The log does not exist yet; the index was cleared.
    NotInitialized,
    Initialized {
        /// Records read from the index file that another accessor wrote
        caught_up: usize,
        /// Records discovered by scanning the log
        scanned: usize,
        /// Whether the index was discarded and rebuilt from scratch
        rebuilt: bool,
    },
}

/// Hash to location map for one blob log, mirrored in an index file.
#[derive(Debug)]
pub struct BlobIndex {
    path: PathBuf,
    mode: LookupMode,
    sync_writes: bool,
    /// Descriptors in log order, exactly as they appear in the index file.
    records: Vec<BlobDescriptor>,
    /// Positions into `records`, oldest first.
    by_id: HashMap<HashId, Vec<usize>>,
}

impl BlobIndex {
    pub fn new(path: impl Into<PathBuf>, mode: LookupMode, sync_writes: bool) -> Self {
        Self {
            path: path.into(),
            mode,
            sync_writes,
            records: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every known descriptor, in log order.
    pub fn descriptors(&self) -> &[BlobDescriptor] {
        &self.records
    }

    /// Log offset where the next record is expected.
    pub fn tail(&self) -> u64 {
        self.records
            .last()
            .map(BlobDescriptor::tail)
            .unwrap_or(LOG_HEADER_SIZE)
    }

    fn expected_file_len(&self) -> u64 {
        INDEX_HEADER_SIZE + (self.records.len() * RECORD_SIZE) as u64
    }

    fn insert(&mut self, descriptor: BlobDescriptor) {
        let position = self.records.len();
        self.records.push(descriptor);
        self.by_id
            .entry(descriptor.hash_id())
            .or_default()
            .push(position);
    }

    fn clear(&mut self) {
        self.records.clear();
        self.by_id.clear();
    }

    /// Distinct contents stored under `id`, oldest first.
    pub(crate) fn candidates(&self, id: HashId) -> Vec<&BlobDescriptor> {
        let mut seen: Vec<&BlobDescriptor> = Vec::new();
        if let Some(positions) = self.by_id.get(&id) {
            for &pos in positions {
                let desc = &self.records[pos];
                if !seen.iter().any(|s| s.hash == desc.hash) {
                    seen.push(desc);
                }
            }
        }
        seen
    }

    pub fn contains_id(&self, id: HashId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Look up a blob by its fingerprint.
    ///
    /// In strict mode an id shared by two different contents is an
    /// `AmbiguousHash` error; in fingerprint mode the oldest blob wins.
    pub fn find(&self, id: HashId) -> Result<Option<BlobDescriptor>> {
        let candidates = self.candidates(id);
        match (self.mode, candidates.as_slice()) {
            (_, []) => Ok(None),
            (LookupMode::Fingerprint, [first, ..]) | (LookupMode::Strict, [first]) => {
                Ok(Some(**first))
            }
            (LookupMode::Strict, many) => Err(BlobError::AmbiguousHash {
                id,
                candidates: many.iter().map(|d| d.hash).collect(),
            }),
        }
    }

    /// Look up a blob by its full content hash.
    pub fn find_by_hash(&self, hash: &ContentHash) -> Option<BlobDescriptor> {
        self.by_id.get(&hash.hash_id()).and_then(|positions| {
            positions
                .iter()
                .map(|&pos| self.records[pos])
                .find(|desc| desc.hash == *hash)
        })
    }

    /// Resolve a hex prefix of the full content hash.
    ///
    /// Linear in the number of records. Fails with `AmbiguousHash` when the
    /// prefix matches more than one distinct content.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Option<BlobDescriptor>> {
        if prefix.is_empty()
            || prefix.len() > 2 * crate::hash_id::HASH_LEN
            || !prefix.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(BlobError::InvalidHashId(prefix.to_string()));
        }

        let mut matches: Vec<&BlobDescriptor> = Vec::new();
        for desc in &self.records {
            if desc.hash.starts_with_hex(prefix) && !matches.iter().any(|m| m.hash == desc.hash) {
                matches.push(desc);
            }
        }

        match matches.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(**only)),
            [first, ..] => Err(BlobError::AmbiguousHash {
                id: first.hash_id(),
                candidates: matches.iter().map(|d| d.hash).collect(),
            }),
        }
    }

    /// Bring the index up to date with `log`.
    ///
    /// 1. No log: drop the index file and in-memory state.
    /// 2. Absorb records another accessor appended to the index file.
    /// 3. An index file shorter than what is held in memory is fatal.
    /// 4. If the last known record ends past the end of the log, or the file
    ///    no longer holds that record, discard everything and rebuild from
    ///    the log header.
    /// 5. Scan the log from the tail and index every new record.
    pub fn reconcile(&mut self, log: &BlobLog) -> Result<ReconcileOutcome> {
        match log.header_state()? {
            HeaderState::Missing | HeaderState::Empty => {
                self.reset()?;
                return Ok(ReconcileOutcome::NotInitialized);
            }
            HeaderState::BadSignature => {
                return Err(BlobError::corrupt_log(log.path(), "bad signature"));
            }
            HeaderState::Valid => {}
        }

        let mut rebuilt = false;
        let mut file = self.open_file(&mut rebuilt)?;

        let disk_len = file.metadata()?.len();
        let expected = self.expected_file_len();
        if disk_len < expected {
            return Err(BlobError::index_corrupt(
                &self.path,
                format!(
                    "file holds {} bytes but {} records are already indexed",
                    disk_len,
                    self.records.len()
                ),
            ));
        }

        // Another accessor may have deleted and refilled the store.
        let replaced = !self.last_record_matches(&mut file)?;
        let (caught_up, contiguous) = if !replaced && disk_len > expected {
            self.catch_up(&mut file, disk_len)?
        } else {
            (0, true)
        };

        let log_len = log.len()?;
        let tail = self.tail();
        let log_shrank = tail > log_len;
        if replaced || !contiguous || log_shrank {
            warn!(
                index = %self.path.display(),
                tail,
                log_len,
                records = self.records.len(),
                replaced,
                "blob index out of sync with its log, rebuilding"
            );
            self.clear();
            file.set_len(INDEX_HEADER_SIZE)?;
            rebuilt = true;
        }

        let scanned = self.scan_log(&mut file, log, log_shrank)?;

        if rebuilt {
            info!(index = %self.path.display(), records = self.records.len(), "rebuilt blob index");
        } else if caught_up > 0 || scanned > 0 {
            debug!(
                index = %self.path.display(),
                caught_up,
                scanned,
                "blob index caught up"
            );
        }

        Ok(ReconcileOutcome::Initialized {
            caught_up,
            scanned,
            rebuilt,
        })
    }

    /// Open the index file, creating it or wiping it when its signature is
    /// missing. Derived data, so a bad signature only costs a rebuild.
    fn open_file(&mut self, rebuilt: &mut bool) -> Result<File> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let len = file.metadata()?.len();
        let valid = if len >= INDEX_HEADER_SIZE {
            let mut magic = [0u8; 8];
            file.read_exact(&mut magic)?;
            u64::from_le_bytes(magic) == INDEX_MAGIC
        } else {
            false
        };

        if !valid {
            if len > 0 {
                warn!(index = %self.path.display(), "blob index has a bad signature, rebuilding");
                *rebuilt = true;
            } else if !self.records.is_empty() {
                info!(index = %self.path.display(), "blob index file disappeared, rebuilding");
                *rebuilt = true;
            }
            self.clear();
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&INDEX_MAGIC.to_le_bytes())?;
            if self.sync_writes {
                file.sync_data()?;
            }
        }

        Ok(file)
    }

    /// Whether the file still holds the last in-memory record at its
    /// position. The file must be at least as long as memory expects.
    fn last_record_matches(&self, file: &mut File) -> Result<bool> {
        let Some(last) = self.records.last() else {
            return Ok(true);
        };
        file.seek(SeekFrom::Start(self.expected_file_len() - RECORD_SIZE as u64))?;
        let mut record = [0u8; RECORD_SIZE];
        file.read_exact(&mut record)?;
        Ok(BlobDescriptor::decode(&record) == *last)
    }

    /// Cheap check that the index file still agrees with memory, without
    /// touching the log. A `false` means the next lookup must reconcile.
    pub fn is_current(&self) -> Result<bool> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(self.records.is_empty()),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() < self.expected_file_len() {
            return Ok(false);
        }
        self.last_record_matches(&mut file)
    }

    /// Read records past what is held in memory. Returns how many were
    /// absorbed and whether they continue the log without gaps.
    fn catch_up(&mut self, file: &mut File, disk_len: u64) -> Result<(usize, bool)> {
        let start = self.expected_file_len();
        let extra = disk_len - start;
        let whole = extra / RECORD_SIZE as u64;

        if extra % RECORD_SIZE as u64 != 0 {
            let keep = start + whole * RECORD_SIZE as u64;
            warn!(
                index = %self.path.display(),
                partial_bytes = extra - whole * RECORD_SIZE as u64,
                "dropping partial trailing index record"
            );
            file.set_len(keep)?;
        }

        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(&mut *file);
        let mut absorbed = 0;
        for _ in 0..whole {
            let mut record = [0u8; RECORD_SIZE];
            reader.read_exact(&mut record)?;
            let desc = BlobDescriptor::decode(&record);
            if desc.offset != self.tail() {
                return Ok((absorbed, false));
            }
            self.insert(desc);
            absorbed += 1;
        }
        Ok((absorbed, true))
    }

    /// Index every log record past the current tail.
    ///
    /// A record that runs past end of file is an interrupted append, and is
    /// cut from the log, when it starts at the indexed tail, when not even its
    /// length prefix fits, or when the log was found shorter than the index.
    /// Anywhere else it is corruption: nothing is indexed and the log is left
    /// alone.
    fn scan_log(&mut self, file: &mut File, log: &BlobLog, log_shrank: bool) -> Result<usize> {
        let start = self.tail();
        let mut scanner = log.scan_from(start)?;
        let found: Vec<BlobDescriptor> = scanner.by_ref().map(|(desc, _)| desc).collect();
        let torn = scanner.torn_at();
        drop(scanner);

        if let Some(torn) = torn {
            let log_len = log.len()?;
            let interrupted = log_shrank || torn == start || log_len - torn < LENGTH_PREFIX;
            if !interrupted {
                return Err(BlobError::corrupt_log(
                    log.path(),
                    format!(
                        "record at {} declares more bytes than the log holds ({} bytes)",
                        torn, log_len
                    ),
                ));
            }
        }

        if !found.is_empty() {
            file.seek(SeekFrom::Start(self.expected_file_len()))?;
            let mut writer = BufWriter::new(&mut *file);
            for desc in &found {
                writer.write_all(&desc.encode())?;
            }
            writer.flush()?;
            drop(writer);
            if self.sync_writes {
                file.sync_data()?;
            }
            for desc in &found {
                self.insert(*desc);
            }
        }

        if let Some(torn) = torn {
            warn!(
                log = %log.path().display(),
                offset = torn,
                "truncating torn record at end of blob log"
            );
            log.truncate(torn)?;
        }

        Ok(found.len())
    }

    /// Persist one freshly appended descriptor.
    ///
    /// Must follow a `reconcile` and the matching `BlobLog::append`. On
    /// failure the file is cut back and memory is left untouched.
    pub fn append_record(&mut self, descriptor: BlobDescriptor) -> Result<()> {
        let expected = self.expected_file_len();
        if descriptor.offset != self.tail() {
            return Err(BlobError::index_corrupt(
                &self.path,
                format!(
                    "record at {} does not continue the indexed tail {}",
                    descriptor.offset,
                    self.tail()
                ),
            ));
        }

        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        let len = file.metadata()?.len();
        if len != expected {
            return Err(BlobError::index_corrupt(
                &self.path,
                format!("file holds {} bytes, expected {}", len, expected),
            ));
        }

        let written = (|| -> io::Result<()> {
            file.seek(SeekFrom::Start(expected))?;
            file.write_all(&descriptor.encode())?;
            if self.sync_writes {
                file.sync_data()?;
            }
            Ok(())
        })();

        if let Err(e) = written {
            if let Err(cleanup) = file.set_len(expected) {
                warn!(index = %self.path.display(), error = %cleanup, "failed to truncate partial index record");
            }
            return Err(e.into());
        }

        self.insert(descriptor);
        Ok(())
    }

    /// Forget everything and delete the index file. The next reconcile
    /// rebuilds from the log.
    pub fn reset(&mut self) -> Result<()> {
        self.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
