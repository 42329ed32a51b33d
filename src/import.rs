//! `ImportManager`: the write facade over a [crate::db::Database] (spec
//! §4.5). Single-writer discipline is grounded on `wral::Wal`'s
//! single-writer model and `robt::build::Builder`'s "accumulate, then
//! commit" shape: every public method takes the same internal mutex before
//! touching the stores, so concurrent callers serialize cleanly even though
//! the underlying stores only guarantee atomicity per call.

use std::{
    fs::{File, OpenOptions},
    path::Path,
    sync::{Arc, Mutex},
};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{db::Database, err_at, hashcodec::Tuple, stores::InsertOutcome, Error, Result};

/// Running change counters, per spec §4.5 and the additional duplicate
/// counter supplemented from `original_source` (§10.1).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Counters {
    pub hashes_inserted: u64,
    pub hashes_not_inserted_duplicate_element: u64,
    pub hashes_not_inserted_exceeds_max: u64,
    pub hashes_not_inserted_invalid_byte_alignment: u64,
    pub source_names_inserted: u64,
    pub source_names_already_present: u64,
}

pub struct ImportManager {
    db: Arc<Database>,
    counters: Mutex<Counters>,
    _lock: File,
}

impl ImportManager {
    /// Acquires the directory's exclusive write lock (spec §3, "Ownership":
    /// "An import manager holds an exclusive write lock on the directory;
    /// at most one per database"). Fails if another `ImportManager` already
    /// holds it, in this process or another.
    pub fn new(db: Arc<Database>) -> Result<ImportManager> {
        let lock_path = Path::new(db.dir()).join("import.lock");
        let lock_file = err_at!(
            IOError,
            OpenOptions::new().create(true).write(true).open(&lock_path)
        )?;
        err_at!(IOError, lock_file.try_lock_exclusive())?;
        db.log_event("import_opened", serde_json::json!({}))?;
        Ok(ImportManager { db, counters: Mutex::new(Counters::default()), _lock: lock_file })
    }

    /// Append one progress event to the database's `timestamp.json`.
    pub fn log_event(&self, event: &str, detail: Value) -> Result<()> {
        self.db.log_event(event, detail)
    }

    pub fn counters(&self) -> Counters {
        self.counters.lock().unwrap().clone()
    }

    /// Intern `file_binary_hash` and idempotently add `(repo, filename)` as
    /// one of its names. Returns the source_id.
    pub fn insert_source_name(
        &self,
        file_binary_hash: &[u8],
        repository_name: &str,
        filename: &str,
    ) -> Result<u64> {
        let mut counters = self.counters.lock().unwrap();
        let source_id = self.db.source_store.intern(file_binary_hash)?;
        let newly_added = self
            .db
            .source_name_store
            .insert_name(source_id, repository_name, filename)?;
        if newly_added {
            counters.source_names_inserted += 1;
        } else {
            counters.source_names_already_present += 1;
        }
        Ok(source_id)
    }

    /// Upsert per-source aggregate metadata. Conflicting non-empty values
    /// are a fatal `InvariantViolation` (propagated from [SourceStore]).
    pub fn insert_source_data(
        &self,
        file_binary_hash: &[u8],
        filesize: u64,
        file_type: &str,
        zero_count: u64,
        nonprobative_count: u64,
    ) -> Result<u64> {
        let _counters = self.counters.lock().unwrap();
        self.db
            .source_store
            .upsert_metadata(file_binary_hash, filesize, file_type, zero_count, nonprobative_count)
    }

    /// Append `(source_id, file_offset, entropy, label)` to the record for
    /// `hash`. `file_offset` must be a multiple of `sector_size` or the
    /// insert is rejected.
    pub fn insert_hash(
        &self,
        hash: &[u8],
        file_binary_hash: &[u8],
        file_offset: u64,
        entropy: u32,
        label: &[u8],
    ) -> Result<InsertOutcome> {
        let mut counters = self.counters.lock().unwrap();

        let sector_size = self.db.settings().sector_size as u64;
        if file_offset % sector_size != 0 {
            counters.hashes_not_inserted_invalid_byte_alignment += 1;
            return Ok(InsertOutcome::InvalidAlignment);
        }

        let source_id = self.db.source_store.intern(file_binary_hash)?;
        let tuple = Tuple { source_id, offset: file_offset, entropy, label: label.to_vec() };
        let outcome = self.db.hash_store.insert_tuple(hash, tuple)?;

        match outcome {
            InsertOutcome::Inserted => counters.hashes_inserted += 1,
            InsertOutcome::DuplicateElement => counters.hashes_not_inserted_duplicate_element += 1,
            InsertOutcome::ExceedsMax => counters.hashes_not_inserted_exceeds_max += 1,
            InsertOutcome::InvalidAlignment => unreachable!("checked above"),
        }
        Ok(outcome)
    }

    /// Parse and apply one JSON record (source or block-hash, per spec §6).
    /// Returns `Some(message)` describing a per-line parse failure rather
    /// than propagating it, matching the "format errors are recovered
    /// locally and counted" policy of spec §7.
    pub fn insert_json(&self, line: &str) -> Option<String> {
        match self.apply_json(line) {
            Ok(()) => None,
            Err(err) => Some(err.to_string()),
        }
    }

    fn apply_json(&self, line: &str) -> Result<()> {
        let value: Value = err_at!(FormatError, serde_json::from_str(line))?;

        if value.get("block_hash").is_some() {
            self.apply_hash_json(&value)
        } else if value.get("file_hash").is_some() {
            self.apply_source_json(&value)
        } else {
            err_at!(FormatError, msg: "JSON line has neither block_hash nor file_hash")
        }
    }

    fn apply_hash_json(&self, value: &Value) -> Result<()> {
        let block_hash = decode_hex_field(value, "block_hash")?;
        let entropy = value
            .get("entropy")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let label = value
            .get("block_label")
            .and_then(Value::as_str)
            .unwrap_or("")
            .as_bytes()
            .to_vec();

        let pairs = err_at!(
            FormatError,
            value
                .get("source_offset_pairs")
                .and_then(Value::as_array)
                .ok_or("missing source_offset_pairs")
        )?;

        if pairs.len() % 2 != 0 {
            return err_at!(FormatError, msg: "source_offset_pairs has odd length");
        }

        for chunk in pairs.chunks(2) {
            let file_hash_hex = err_at!(
                FormatError,
                chunk[0].as_str().ok_or("source_offset_pairs[i] not a string")
            )?;
            let file_hash = err_at!(FormatError, hex::decode(file_hash_hex))?;
            let offset = err_at!(
                FormatError,
                chunk[1].as_u64().ok_or("source_offset_pairs[i+1] not an integer")
            )?;
            self.insert_hash(&block_hash, &file_hash, offset, entropy, &label)?;
        }
        Ok(())
    }

    fn apply_source_json(&self, value: &Value) -> Result<()> {
        let file_hash = decode_hex_field(value, "file_hash")?;
        let filesize = value.get("filesize").and_then(Value::as_u64).unwrap_or(0);
        let file_type = value
            .get("file_type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let zero_count = value.get("zero_count").and_then(Value::as_u64).unwrap_or(0);
        let nonprobative_count = value
            .get("nonprobative_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        self.insert_source_data(&file_hash, filesize, &file_type, zero_count, nonprobative_count)?;

        if let Some(names) = value.get("names").and_then(Value::as_array) {
            for name in names {
                let repo = name.get("repository_name").and_then(Value::as_str).unwrap_or("");
                let filename = name.get("filename").and_then(Value::as_str).unwrap_or("");
                self.insert_source_name(&file_hash, repo, filename)?;
            }
        }
        Ok(())
    }

    /// Parse one NIST-style tab-delimited line: `<file_hex>\t<block_hex>\t<sector_index>`,
    /// `sector_index >= 1`. Offset is `(sector_index - 1) * sector_size`.
    /// Grounded on `original_source/src_libhashdb/hasher/tab_hashdigest_reader.hpp`
    /// (spec §10.3).
    pub fn insert_tab_line(&self, line: &str) -> Option<String> {
        match self.apply_tab_line(line) {
            Ok(()) => None,
            Err(err) => Some(err.to_string()),
        }
    }

    fn apply_tab_line(&self, line: &str) -> Result<()> {
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() != 3 {
            return err_at!(FormatError, msg: "expected 3 tab-separated fields, got {}", fields.len());
        }
        let file_hash = err_at!(FormatError, hex::decode(fields[0]))?;
        let block_hash = err_at!(FormatError, hex::decode(fields[1]))?;
        let sector_index: u64 = err_at!(FormatError, fields[2].parse())?;
        if sector_index < 1 {
            return err_at!(FormatError, msg: "sector_index must be >= 1, got {}", sector_index);
        }

        let sector_size = self.db.settings().sector_size as u64;
        let offset = (sector_index - 1) * sector_size;
        self.insert_hash(&block_hash, &file_hash, offset, 0, &[])?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()
    }
}

fn decode_hex_field(value: &Value, field: &str) -> Result<Vec<u8>> {
    let hex_str = err_at!(
        FormatError,
        value.get(field).and_then(Value::as_str).ok_or("missing field")
    )?;
    err_at!(FormatError, hex::decode(hex_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn manager() -> ImportManager {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        std::mem::forget(tmp);
        let db = Database::create(dir.as_os_str(), Settings::new()).unwrap();
        ImportManager::new(Arc::new(db)).unwrap()
    }

    #[test]
    fn second_import_manager_over_same_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let db = Arc::new(Database::create(dir.as_os_str(), Settings::new()).unwrap());
        let _first = ImportManager::new(db.clone()).unwrap();
        assert!(ImportManager::new(db).is_err());
    }

    #[test]
    fn insert_hash_rejects_misaligned_offset() {
        let mgr = manager();
        let outcome = mgr
            .insert_hash(&[1u8; 16], b"file-a", 511, 0, &[])
            .unwrap();
        assert_eq!(outcome, InsertOutcome::InvalidAlignment);
        assert_eq!(mgr.counters().hashes_not_inserted_invalid_byte_alignment, 1);
    }

    #[test]
    fn insert_hash_counts_success() {
        let mgr = manager();
        let outcome = mgr.insert_hash(&[1u8; 16], b"file-a", 512, 10, b"R").unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(mgr.counters().hashes_inserted, 1);
    }

    #[test]
    fn insert_json_applies_block_hash_record() {
        let mgr = manager();
        let line = serde_json::json!({
            "block_hash": hex::encode([2u8; 16]),
            "entropy": 5,
            "block_label": "R",
            "source_offset_pairs": [hex::encode(b"file-a"), 0],
        })
        .to_string();

        assert_eq!(mgr.insert_json(&line), None);
        assert_eq!(mgr.counters().hashes_inserted, 1);
    }

    #[test]
    fn insert_json_applies_source_record_with_names() {
        let mgr = manager();
        let line = serde_json::json!({
            "file_hash": hex::encode(b"file-a"),
            "filesize": 2048,
            "file_type": "raw",
            "zero_count": 0,
            "nonprobative_count": 0,
            "names": [{"repository_name": "repo", "filename": "a.bin"}],
        })
        .to_string();

        assert_eq!(mgr.insert_json(&line), None);
        assert_eq!(mgr.counters().source_names_inserted, 1);
    }

    #[test]
    fn insert_json_reports_malformed_line() {
        let mgr = manager();
        assert!(mgr.insert_json("not json").is_some());
    }

    #[test]
    fn insert_tab_line_computes_offset_from_sector_index() {
        let mgr = manager();
        let line = format!("{}\t{}\t2", hex::encode(b"file-a"), hex::encode([3u8; 16]));
        assert_eq!(mgr.insert_tab_line(&line), None);
        assert_eq!(mgr.counters().hashes_inserted, 1);
    }

    #[test]
    fn insert_tab_line_rejects_zero_sector_index() {
        let mgr = manager();
        let line = format!("{}\t{}\t0", hex::encode(b"file-a"), hex::encode([3u8; 16]));
        assert!(mgr.insert_tab_line(&line).is_some());
    }
}
