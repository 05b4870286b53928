use crate::descriptor::{BlobDescriptor, LENGTH_PREFIX};
use crate::error::{BlobError, Result};
use crate::hash_id::ContentHash;
use memmap2::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// "BLOBSTOR" read as a little-endian u64.
pub const LOG_MAGIC: u64 = 0x524F_5453_424F_4C42;
pub const LOG_HEADER_SIZE: u64 = 8;

/// File layout:
/// - magic: 8 bytes (u64)
/// - records, repeated until end of file:
///   - length: 4 bytes (u32)
///   - content: `length` bytes
///
/// The log stores no per-record hash; hashes are recomputed while scanning.

/// What the first 8 bytes of a log file say about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    Missing,
    /// The file exists but has no bytes, e.g. a crash right after creation.
    Empty,
    Valid,
    BadSignature,
}

/// Append-only storage of raw blob bytes, addressed by absolute file offset.
///
/// Holds no open handle between calls.
#[derive(Debug, Clone)]
pub struct BlobLog {
    path: PathBuf,
    sync_writes: bool,
}

impl BlobLog {
    pub fn new(path: impl Into<PathBuf>, sync_writes: bool) -> Self {
        Self {
            path: path.into(),
            sync_writes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Current file length, 0 when the file does not exist.
    pub fn len(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? <= LOG_HEADER_SIZE)
    }

    pub fn header_state(&self) -> Result<HeaderState> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HeaderState::Missing),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(HeaderState::Empty);
        }
        if len < LOG_HEADER_SIZE {
            return Ok(HeaderState::BadSignature);
        }
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if u64::from_le_bytes(magic) == LOG_MAGIC {
            Ok(HeaderState::Valid)
        } else {
            Ok(HeaderState::BadSignature)
        }
    }

    /// Open the log for writing, creating it and writing the signature if it
    /// is new, and position the handle at end of file.
    pub fn open_append(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            file.write_all(&LOG_MAGIC.to_le_bytes())?;
            if self.sync_writes {
                file.sync_data()?;
            }
        } else {
            let mut magic = [0u8; 8];
            if len < LOG_HEADER_SIZE {
                return Err(BlobError::corrupt_log(&self.path, "file shorter than header"));
            }
            file.read_exact(&mut magic)?;
            if u64::from_le_bytes(magic) != LOG_MAGIC {
                return Err(BlobError::corrupt_log(&self.path, "bad signature"));
            }
        }

        file.seek(SeekFrom::End(0))?;
        Ok(file)
    }

    /// Append one record and describe where it landed.
    ///
    /// A failed write is truncated back to the record start before the error
    /// is returned.
    pub fn append(&self, content: &[u8]) -> Result<BlobDescriptor> {
        let length = u32::try_from(content.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("blob of {} bytes exceeds the record size limit", content.len()),
            )
        })?;
        let hash = ContentHash::of(content);

        let mut file = self.open_append()?;
        let offset = file.stream_position()?;

        let written = (|| -> io::Result<()> {
            let mut writer = BufWriter::new(&mut file);
            writer.write_all(&length.to_le_bytes())?;
            writer.write_all(content)?;
            writer.flush()?;
            drop(writer);
            if self.sync_writes {
                file.sync_data()?;
            }
            Ok(())
        })();

        if let Err(e) = written {
            if let Err(cleanup) = file.set_len(offset) {
                warn!(log = %self.path.display(), offset, error = %cleanup, "failed to truncate partial append");
            }
            return Err(e.into());
        }

        Ok(BlobDescriptor::new(offset, length, hash))
    }

    /// Read the content a descriptor points at.
    pub fn read(&self, descriptor: &BlobDescriptor) -> Result<Vec<u8>> {
        if descriptor.offset < LOG_HEADER_SIZE {
            return Err(BlobError::corrupt_log(
                &self.path,
                format!("record offset {} lies inside the header", descriptor.offset),
            ));
        }

        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if descriptor.tail() > len {
            return Err(BlobError::corrupt_log(
                &self.path,
                format!(
                    "record at {} declares {} bytes but the log ends at {}",
                    descriptor.offset, descriptor.length, len
                ),
            ));
        }

        file.seek(SeekFrom::Start(descriptor.offset))?;
        let mut prefix = [0u8; 4];
        file.read_exact(&mut prefix)?;
        let stored = u32::from_le_bytes(prefix);
        if stored != descriptor.length {
            return Err(BlobError::corrupt_log(
                &self.path,
                format!(
                    "record at {} has length {} but its descriptor says {}",
                    descriptor.offset, stored, descriptor.length
                ),
            ));
        }

        let mut content = vec![0u8; descriptor.length as usize];
        file.read_exact(&mut content)?;
        Ok(content)
    }

    /// Undo the append that produced `descriptor`.
    ///
    /// Only valid while `descriptor` is still the last record in the log.
    pub fn cancel_last_append(&self, descriptor: &BlobDescriptor) -> Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        let len = file.metadata()?.len();
        if len != descriptor.tail() || descriptor.offset < LOG_HEADER_SIZE {
            return Err(BlobError::corrupt_log(
                &self.path,
                format!(
                    "cannot cancel record at {}: log length {} is not its tail {}",
                    descriptor.offset,
                    len,
                    descriptor.tail()
                ),
            ));
        }
        file.set_len(descriptor.offset)?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Cut the log back to `len` bytes. Used to drop a torn trailing record.
    pub(crate) fn truncate(&self, len: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len.max(LOG_HEADER_SIZE))?;
        if self.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Iterate every complete record starting at `offset`, which must be a
    /// record boundary.
    pub fn scan_from(&self, offset: u64) -> Result<LogScanner> {
        if offset < LOG_HEADER_SIZE {
            return Err(BlobError::corrupt_log(
                &self.path,
                format!("scan offset {} lies inside the header", offset),
            ));
        }
        match self.header_state()? {
            HeaderState::Valid => {}
            HeaderState::Missing | HeaderState::Empty => {
                return Ok(LogScanner::empty(offset));
            }
            HeaderState::BadSignature => {
                return Err(BlobError::corrupt_log(&self.path, "bad signature"));
            }
        }

        let file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if offset >= len {
            return Ok(LogScanner::empty(offset));
        }

        // Callers hold the only accessor to this store, so the mapping is not
        // resized underneath us.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(LogScanner {
            mmap: Some(mmap),
            position: offset,
            torn_at: None,
        })
    }

    pub fn delete(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Sequential reader over log records, hashing each blob as it goes.
///
/// Stops at end of file, or at a trailing record whose length prefix or
/// content runs past the end of the file (see [`LogScanner::torn_at`]).
pub struct LogScanner {
    mmap: Option<Mmap>,
    position: u64,
    torn_at: Option<u64>,
}

impl LogScanner {
    fn empty(position: u64) -> Self {
        Self {
            mmap: None,
            position,
            torn_at: None,
        }
    }

    /// Offset just past the last complete record yielded so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Start of an incomplete trailing record, if the scan hit one.
    pub fn torn_at(&self) -> Option<u64> {
        self.torn_at
    }
}

impl Iterator for LogScanner {
    type Item = (BlobDescriptor, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let data = &self.mmap.as_ref()?[..];
        let start = self.position as usize;
        if start >= data.len() || self.torn_at.is_some() {
            return None;
        }

        let content_start = start + LENGTH_PREFIX as usize;
        if content_start > data.len() {
            self.torn_at = Some(self.position);
            return None;
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&data[start..content_start]);
        let length = u32::from_le_bytes(prefix);

        let end = content_start + length as usize;
        if end > data.len() {
            self.torn_at = Some(self.position);
            return None;
        }

        let content = data[content_start..end].to_vec();
        let descriptor = BlobDescriptor::new(self.position, length, ContentHash::of(&content));
        self.position = descriptor.tail();
        Some((descriptor, content))
    }
}
