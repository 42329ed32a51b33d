//! `Database`: owns a database directory's settings and its three stores
//! (HashStore, SourceStore, SourceNameStore), and mediates `create`/`open`.
//!
//! Grounded on the top-level `Rdms` type (`src/rdms.rs`): a thin composing
//! wrapper that owns the underlying storage components and hands out
//! read/write facades ([crate::scan::ScanManager],
//! [crate::import::ImportManager]) rather than exposing the stores directly.

use std::{
    ffi,
    fs::OpenOptions,
    io::Write,
    sync::Mutex,
};

use log::info;
use serde_json::json;

use crate::{
    err_at,
    settings::{self, Settings},
    stores::{HashStore, SourceNameStore, SourceStore},
    Error, Result,
};

/// A forensic block-hash database directory. The directory exclusively owns
/// all stores and the Bloom file (spec §3, "Ownership").
pub struct Database {
    dir: ffi::OsString,
    pub(crate) settings: settings::Record,
    pub(crate) hash_store: HashStore,
    pub(crate) source_store: SourceStore,
    pub(crate) source_name_store: SourceNameStore,
    timestamp_log: Mutex<()>,
}

impl Database {
    /// Create a brand-new, empty database directory. Fails if `dir` already
    /// contains a `settings.json`.
    pub fn create(dir: &ffi::OsStr, settings: Settings) -> Result<Database> {
        let settings_path = std::path::Path::new(dir).join("settings.json");
        if settings_path.exists() {
            return err_at!(
                UsageError, msg: "database already exists at {:?}", dir
            );
        }

        let record = settings.freeze();
        record.create(dir)?;

        let db = Database {
            dir: dir.to_os_string(),
            hash_store: HashStore::create(dir, &record)?,
            source_store: SourceStore::create(dir, &record)?,
            source_name_store: SourceNameStore::create(dir)?,
            settings: record,
            timestamp_log: Mutex::new(()),
        };

        info!("created hashdb database at {:?}", dir);
        db.log_event("create", json!({}))?;
        Ok(db)
    }

    /// Open an existing database directory, validating its settings schema
    /// version (spec §10.6).
    pub fn open(dir: &ffi::OsStr) -> Result<Database> {
        let record = settings::Record::open(dir)?;

        let db = Database {
            dir: dir.to_os_string(),
            hash_store: HashStore::open(dir, &record)?,
            source_store: SourceStore::open(dir, &record)?,
            source_name_store: SourceNameStore::open(dir)?,
            settings: record,
            timestamp_log: Mutex::new(()),
        };

        info!("opened hashdb database at {:?}", dir);
        Ok(db)
    }

    pub fn dir(&self) -> &ffi::OsStr {
        &self.dir
    }

    pub fn settings(&self) -> &settings::Record {
        &self.settings
    }

    /// Flush all stores and the Bloom filter to stable storage.
    pub fn flush(&self) -> Result<()> {
        self.hash_store.flush()?;
        self.source_store.flush()?;
        self.source_name_store.flush()?;
        Ok(())
    }

    /// Append one progress event to `timestamp.json` (spec §6): a single
    /// JSON object per line, timestamped at the moment of the call. Import
    /// and ingest report milestones here; readers tail the file for
    /// external progress monitoring.
    pub fn log_event(&self, event: &str, detail: serde_json::Value) -> Result<()> {
        let _guard = self.timestamp_log.lock().unwrap();
        let path = std::path::Path::new(&self.dir).join("timestamp.json");
        let mut file = err_at!(IOError, OpenOptions::new().create(true).append(true).open(&path))?;
        let record = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": event,
            "detail": detail,
        });
        err_at!(IOError, writeln!(file, "{}", record))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().as_os_str();

        {
            let db = Database::create(dir, Settings::new()).unwrap();
            db.flush().unwrap();
        }

        let reopened = Database::open(dir).unwrap();
        assert_eq!(reopened.settings().settings_version, settings::SETTINGS_VERSION);
    }

    #[test]
    fn create_twice_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().as_os_str();
        Database::create(dir, Settings::new()).unwrap();
        assert!(Database::create(dir, Settings::new()).is_err());
    }

    #[test]
    fn log_event_appends_timestamped_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().as_os_str();
        let db = Database::create(dir, Settings::new()).unwrap();
        db.log_event("progress", json!({"bytes_done": 10})).unwrap();

        let contents = std::fs::read_to_string(tmp.path().join("timestamp.json")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        // One line from Database::create itself, one from this test.
        assert_eq!(lines.len(), 2);
        let last: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last["event"], "progress");
        assert_eq!(last["detail"]["bytes_done"], 10);
        assert!(last["timestamp"].as_str().unwrap().contains('T'));
    }
}
