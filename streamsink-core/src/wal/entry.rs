// wal/entry.rs
// Log record types and serialization

use crate::error::{Result, SinkError};
use crate::store::TxnId;

/// Record type in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WALEntryType {
    /// Transaction begin marker (payload: transaction header)
    Begin = 0x01,
    /// Event record; nil transaction id means a direct write
    Event = 0x02,
    /// Transaction commit marker
    Commit = 0x03,
    /// Transaction abort marker
    Abort = 0x04,
}

impl WALEntryType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(WALEntryType::Begin),
            0x02 => Ok(WALEntryType::Event),
            0x03 => Ok(WALEntryType::Commit),
            0x04 => Ok(WALEntryType::Abort),
            _ => Err(SinkError::WalCorruption),
        }
    }
}

/// A single record in the log
///
/// Binary format:
/// - transaction_id: 16 bytes (UUID)
/// - entry_type: 1 byte
/// - data_len: 4 bytes (u32 LE)
/// - data: variable (bincode payload)
/// - checksum: 4 bytes (CRC32)
#[derive(Debug, Clone)]
pub struct WALEntry {
    pub transaction_id: TxnId,
    pub entry_type: WALEntryType,
    pub data: Vec<u8>,
    pub checksum: u32,
}

/// Header size: 16 (tx_id) + 1 (type) + 4 (len) = 21 bytes
pub const WAL_HEADER_SIZE: usize = 21;

/// Trailing checksum size
pub const WAL_CHECKSUM_SIZE: usize = 4;

/// Maximum record payload size: 64MB (security limit)
pub const MAX_WAL_ENTRY_SIZE: usize = 64 * 1024 * 1024;

impl WALEntry {
    /// Create a new record with computed checksum
    pub fn new(transaction_id: TxnId, entry_type: WALEntryType, data: Vec<u8>) -> Self {
        let mut entry = WALEntry {
            transaction_id,
            entry_type,
            data,
            checksum: 0,
        };
        entry.checksum = entry.compute_checksum();
        entry
    }

    /// Reject a payload the reader would refuse to load back
    pub fn ensure_within_limit(data_len: usize) -> Result<()> {
        if data_len > MAX_WAL_ENTRY_SIZE {
            return Err(SinkError::WriteRejected(format!(
                "record payload of {} bytes exceeds the {} byte limit",
                data_len, MAX_WAL_ENTRY_SIZE
            )));
        }
        Ok(())
    }

    /// Total encoded size of this record
    pub fn encoded_len(&self) -> usize {
        WAL_HEADER_SIZE + self.data.len() + WAL_CHECKSUM_SIZE
    }

    /// Serialize record to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        buf.extend_from_slice(self.transaction_id.as_bytes());
        buf.push(self.entry_type as u8);
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&self.checksum.to_le_bytes());

        buf
    }

    /// Deserialize record from bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < WAL_HEADER_SIZE + WAL_CHECKSUM_SIZE {
            return Err(SinkError::WalCorruption);
        }

        let header = parse_header(&data[..WAL_HEADER_SIZE])?;
        let body_end = WAL_HEADER_SIZE + header.data_len;
        if data.len() < body_end + WAL_CHECKSUM_SIZE {
            return Err(SinkError::WalCorruption);
        }

        let mut checksum_bytes = [0u8; WAL_CHECKSUM_SIZE];
        checksum_bytes.copy_from_slice(&data[body_end..body_end + WAL_CHECKSUM_SIZE]);

        let entry = WALEntry {
            transaction_id: header.transaction_id,
            entry_type: header.entry_type,
            data: data[WAL_HEADER_SIZE..body_end].to_vec(),
            checksum: u32::from_le_bytes(checksum_bytes),
        };

        if !entry.verify() {
            return Err(SinkError::WalCorruption);
        }

        Ok(entry)
    }

    /// Compute CRC32 checksum
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();

        hasher.update(self.transaction_id.as_bytes());
        hasher.update(&[self.entry_type as u8]);
        hasher.update(&(self.data.len() as u32).to_le_bytes());
        hasher.update(&self.data);

        hasher.finalize()
    }

    /// Verify record checksum
    pub fn verify(&self) -> bool {
        self.compute_checksum() == self.checksum
    }
}

pub(crate) struct RecordHeader {
    pub transaction_id: TxnId,
    pub entry_type: WALEntryType,
    pub data_len: usize,
}

/// Decode a fixed-size record header
pub(crate) fn parse_header(header: &[u8]) -> Result<RecordHeader> {
    if header.len() < WAL_HEADER_SIZE {
        return Err(SinkError::WalCorruption);
    }

    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&header[0..16]);
    let entry_type = WALEntryType::from_u8(header[16])?;

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&header[17..21]);
    let data_len = u32::from_le_bytes(len_bytes) as usize;

    // SECURITY: Prevent OOM from a malformed log with huge data_len
    if data_len > MAX_WAL_ENTRY_SIZE {
        return Err(SinkError::WalCorruption);
    }

    Ok(RecordHeader {
        transaction_id: TxnId::from_bytes(id_bytes),
        entry_type,
        data_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wal_entry_type_conversion() {
        assert_eq!(WALEntryType::from_u8(0x01).unwrap(), WALEntryType::Begin);
        assert_eq!(WALEntryType::from_u8(0x02).unwrap(), WALEntryType::Event);
        assert_eq!(WALEntryType::from_u8(0x03).unwrap(), WALEntryType::Commit);
        assert_eq!(WALEntryType::from_u8(0x04).unwrap(), WALEntryType::Abort);
        assert!(WALEntryType::from_u8(0x05).is_err());
        assert!(WALEntryType::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_wal_entry_serialize_deserialize() {
        let id = TxnId::new();
        let entry = WALEntry::new(id, WALEntryType::Event, b"test data".to_vec());

        let serialized = entry.serialize();
        assert_eq!(serialized.len(), entry.encoded_len());

        let deserialized = WALEntry::deserialize(&serialized).unwrap();
        assert_eq!(deserialized.transaction_id, id);
        assert_eq!(deserialized.entry_type, WALEntryType::Event);
        assert_eq!(deserialized.data, b"test data");
        assert_eq!(deserialized.checksum, entry.checksum);
    }

    #[test]
    fn test_wal_entry_checksum_validation() {
        let entry = WALEntry::new(TxnId::new(), WALEntryType::Begin, vec![]);
        let mut serialized = entry.serialize();

        // Corrupt checksum
        let len = serialized.len();
        serialized[len - 1] ^= 0xFF;

        assert!(matches!(
            WALEntry::deserialize(&serialized),
            Err(SinkError::WalCorruption)
        ));
    }

    #[test]
    fn test_wal_entry_rejects_huge_length() {
        let mut bytes = vec![0u8; WAL_HEADER_SIZE + WAL_CHECKSUM_SIZE];
        bytes[16] = WALEntryType::Event as u8;
        bytes[17..21].copy_from_slice(&u32::MAX.to_le_bytes());

        assert!(matches!(
            WALEntry::deserialize(&bytes),
            Err(SinkError::WalCorruption)
        ));
    }

    #[test]
    fn test_wal_entry_size_limit() {
        assert!(WALEntry::ensure_within_limit(MAX_WAL_ENTRY_SIZE).is_ok());
        assert!(matches!(
            WALEntry::ensure_within_limit(MAX_WAL_ENTRY_SIZE + 1),
            Err(SinkError::WriteRejected(_))
        ));
    }

    #[test]
    fn test_wal_entry_verify() {
        let entry = WALEntry::new(TxnId::nil(), WALEntryType::Commit, b"commit".to_vec());
        assert!(entry.verify());
    }
}
