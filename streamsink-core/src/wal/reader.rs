// wal/reader.rs
// Streaming log reader with iterator pattern

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::error::{Result, SinkError};

use super::entry::{parse_header, WALEntry, WAL_CHECKSUM_SIZE, WAL_HEADER_SIZE};

/// Streaming iterator for reading log records
///
/// Reads one record at a time from the underlying reader.
/// Memory usage: O(single record) instead of O(entire log)
///
/// A record cut short by end-of-file (a write torn by a crash) ends the
/// iteration without an error; `valid_len` then reports where the last
/// complete record ended. A complete record with a bad checksum or type is
/// reported as `WalCorruption`.
pub struct WALEntryIterator<R: Read + Seek> {
    reader: R,
    position: u64,
    eof_reached: bool,
}

impl<R: Read + Seek> WALEntryIterator<R> {
    /// Create a new streaming log iterator
    pub fn new(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader,
            position: 0,
            eof_reached: false,
        })
    }

    /// Byte length of the log prefix made of complete, verified records
    pub fn valid_len(&self) -> u64 {
        self.position
    }

    /// Fill `buf` completely; `Ok(false)` on end-of-file
    fn read_full(&mut self, buf: &mut [u8]) -> Result<bool> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(SinkError::Io(e)),
        }
    }

    /// Read the next record from the log
    fn read_next(&mut self) -> Result<Option<WALEntry>> {
        let mut header = [0u8; WAL_HEADER_SIZE];
        if !self.read_full(&mut header)? {
            return Ok(None);
        }
        let parsed = parse_header(&header)?;

        let mut data = vec![0u8; parsed.data_len];
        if !self.read_full(&mut data)? {
            return Ok(None);
        }

        let mut checksum_bytes = [0u8; WAL_CHECKSUM_SIZE];
        if !self.read_full(&mut checksum_bytes)? {
            return Ok(None);
        }

        let entry = WALEntry {
            transaction_id: parsed.transaction_id,
            entry_type: parsed.entry_type,
            data,
            checksum: u32::from_le_bytes(checksum_bytes),
        };

        if !entry.verify() {
            return Err(SinkError::WalCorruption);
        }

        self.position += entry.encoded_len() as u64;
        Ok(Some(entry))
    }
}

impl<R: Read + Seek> Iterator for WALEntryIterator<R> {
    type Item = Result<WALEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.eof_reached {
            return None;
        }

        match self.read_next() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.eof_reached = true;
                None
            }
            Err(e) => {
                self.eof_reached = true;
                Some(Err(e))
            }
        }
    }
}
