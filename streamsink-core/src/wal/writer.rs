// wal/writer.rs
// Append-only log file manager

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

use super::entry::WALEntry;
use super::reader::WALEntryIterator;

/// Append-only log file manager
///
/// Handles appending records and repairing the file tail after a crash.
pub struct WriteAheadLog {
    file: File,
    path: PathBuf,
    len: u64,
}

impl WriteAheadLog {
    /// Open or create a log file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let len = file.metadata()?.len();

        Ok(WriteAheadLog { file, path, len })
    }

    /// Get the path to this log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a record; returns the offset it was written at
    ///
    /// Nothing is written when the record is over the size limit.
    pub fn append(&mut self, entry: &WALEntry) -> Result<u64> {
        WALEntry::ensure_within_limit(entry.data.len())?;
        self.write_at_end(&entry.serialize())
    }

    /// Append several records with a single write call
    pub fn append_batch(&mut self, entries: &[WALEntry]) -> Result<u64> {
        for entry in entries {
            WALEntry::ensure_within_limit(entry.data.len())?;
        }
        let mut buf = Vec::with_capacity(entries.iter().map(WALEntry::encoded_len).sum());
        for entry in entries {
            buf.extend_from_slice(&entry.serialize());
        }
        self.write_at_end(&buf)
    }

    /// A failed write is cut back off so no torn record is left mid-log
    fn write_at_end(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        if let Err(err) = self.file.write_all(bytes) {
            if let Err(cut) = self.truncate(offset) {
                warn!(path = %self.path.display(), offset, error = %cut, "rollback of failed append failed");
            }
            return Err(err.into());
        }
        self.len = offset + bytes.len() as u64;
        Ok(offset)
    }

    /// Flush log to disk (fsync)
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Streaming iterator over a fresh read handle of this file
    pub fn entries(&self) -> Result<WALEntryIterator<BufReader<File>>> {
        let file = File::open(&self.path)?;
        WALEntryIterator::new(BufReader::new(file))
    }

    /// Cut the file back to `len` bytes (drops a torn tail)
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::Start(len))?;
        self.file.sync_all()?; // Ensure truncation is persisted to disk
        self.len = len;
        Ok(())
    }
}
