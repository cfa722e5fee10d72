#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Write;
use streamsink_core::store::LogStore;
use streamsink_core::wal::{WALEntry, WriteAheadLog, WAL_HEADER_SIZE};
use streamsink_core::StreamId;
use tempfile::TempDir;

// Fuzz target: event log parsing with arbitrary bytes
// Goal: find panics when loading corrupted/malformed logs

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let temp_dir = TempDir::new().unwrap();
    let stream = StreamId::new("fuzz", "events");
    let store = LogStore::open(temp_dir.path()).unwrap();
    let log_path = store.log_path(&stream);
    std::fs::create_dir_all(log_path.parent().unwrap()).unwrap();

    {
        let mut file = std::fs::File::create(&log_path).unwrap();
        file.write_all(data).unwrap();
        file.sync_all().unwrap();
    }

    // Loading and replaying should NEVER panic
    let _ = store.read_committed(&stream);

    if let Ok(wal) = WriteAheadLog::open(&log_path) {
        if let Ok(entries) = wal.entries() {
            for entry in entries {
                if entry.is_err() {
                    break;
                }
            }
        }
    }

    let _ = WALEntry::deserialize(data);
    if data.len() > WAL_HEADER_SIZE {
        let _ = WALEntry::deserialize(&data[WAL_HEADER_SIZE..]);
    }
});
