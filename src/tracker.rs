//! `IngestTracker`: shared, mutex-guarded per-run state tracking which file
//! hashes have already been observed, partial aggregate counts per source,
//! and total bytes processed (spec §4.10). Grounded directly on
//! `original_source/src_libhashdb/hasher/ingest_tracker.hpp`; the
//! `pthread_mutex_t` + explicit `lock()`/`unlock()` pair becomes a single
//! `std::sync::Mutex<Inner>`, per REDESIGN FLAGS' "singleton-style global
//! state -> explicit context objects".

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use log::info;
use serde_json::json;

use crate::{import::ImportManager, Result};

/// Progress is reported every this many bytes processed (spec: 2^27, 128 MiB
/// in the original; matched here).
const BYTES_REPORT_INCREMENT: u64 = 1 << 27;

struct SourceData {
    filesize: u64,
    file_type: String,
    parts_total: u64,
    parts_done: u64,
    zero_count: u64,
    nonprobative_count: u64,
}

struct Inner {
    source_data: HashMap<Vec<u8>, SourceData>,
    preexisting_sources: HashSet<Vec<u8>>,
    bytes_total: u64,
    bytes_done: u64,
    bytes_reported_done: u64,
}

pub struct IngestTracker {
    import_manager: Arc<ImportManager>,
    inner: Mutex<Inner>,
}

impl IngestTracker {
    /// `preexisting_sources` should be every file hash already present in
    /// the destination database (spec: "identify_preexisting_sources"),
    /// collected by the caller via a [crate::scan::ScanManager] walk before
    /// ingest starts.
    pub fn new(
        import_manager: Arc<ImportManager>,
        preexisting_sources: HashSet<Vec<u8>>,
        bytes_total: u64,
    ) -> IngestTracker {
        IngestTracker {
            import_manager,
            inner: Mutex::new(Inner {
                source_data: HashMap::new(),
                preexisting_sources,
                bytes_total,
                bytes_done: 0,
                bytes_reported_done: 0,
            }),
        }
    }

    /// Registers a new source about to be ingested. Returns `true` if this
    /// is genuinely new (block-hash ingest should proceed), `false` if the
    /// file hash was already known (block-hash ingest for this file should
    /// be suppressed, but the caller should still record the name).
    pub fn add_source(
        &self,
        file_hash: &[u8],
        filesize: u64,
        file_type: &str,
        parts_total: u64,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.preexisting_sources.contains(file_hash) || inner.source_data.contains_key(file_hash) {
            return false;
        }
        inner.source_data.insert(
            file_hash.to_vec(),
            SourceData {
                filesize,
                file_type: file_type.to_string(),
                parts_total,
                parts_done: 0,
                zero_count: 0,
                nonprobative_count: 0,
            },
        );
        true
    }

    pub fn seen_source(&self, file_hash: &[u8]) -> bool {
        self.inner.lock().unwrap().source_data.contains_key(file_hash)
    }

    /// Accumulates one buffer job's partial counts. Once every part of the
    /// source has reported in, writes the aggregate source-data record.
    pub fn track_source(
        &self,
        file_hash: &[u8],
        zero_count: u64,
        nonprobative_count: u64,
    ) -> Result<()> {
        let finished = {
            let mut inner = self.inner.lock().unwrap();
            let data = inner
                .source_data
                .get_mut(file_hash)
                .expect("track_source called for an untracked file hash");
            assert!(
                data.parts_done < data.parts_total,
                "track_source called after all parts already reported"
            );
            data.zero_count += zero_count;
            data.nonprobative_count += nonprobative_count;
            data.parts_done += 1;

            if data.parts_done == data.parts_total {
                Some((
                    data.filesize,
                    data.file_type.clone(),
                    data.zero_count,
                    data.nonprobative_count,
                ))
            } else {
                None
            }
        };

        if let Some((filesize, file_type, zero_count, nonprobative_count)) = finished {
            self.import_manager
                .insert_source_data(file_hash, filesize, &file_type, zero_count, nonprobative_count)?;
            self.import_manager.log_event(
                "source_done",
                json!({
                    "file_hash": hex::encode(file_hash),
                    "filesize": filesize,
                    "file_type": file_type,
                    "zero_count": zero_count,
                    "nonprobative_count": nonprobative_count,
                }),
            )?;
        }
        Ok(())
    }

    /// Accumulates bytes processed for progress reporting, logging at each
    /// 128 MiB milestone (spec: matches the original's percent-complete
    /// print cadence).
    pub fn track_bytes(&self, count: u64) {
        let (bytes_done, bytes_total, percent, should_report) = {
            let mut inner = self.inner.lock().unwrap();
            inner.bytes_done += count;
            let should_report = inner.bytes_total > 0
                && (inner.bytes_done >= inner.bytes_total
                    || inner.bytes_done > inner.bytes_reported_done + BYTES_REPORT_INCREMENT);
            if should_report {
                inner.bytes_reported_done += BYTES_REPORT_INCREMENT;
            }
            let percent = if inner.bytes_total > 0 { inner.bytes_done * 100 / inner.bytes_total } else { 0 };
            (inner.bytes_done, inner.bytes_total, percent, should_report)
        };

        if should_report {
            info!("{} of {} bytes completed ({}%)", bytes_done, bytes_total, percent);
            let _ = self.import_manager.log_event(
                "progress",
                json!({ "bytes_done": bytes_done, "bytes_total": bytes_total, "percent": percent }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::Database, settings::Settings};

    fn tracker(bytes_total: u64) -> IngestTracker {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        std::mem::forget(tmp);
        let db = Database::create(dir.as_os_str(), Settings::new()).unwrap();
        let import_manager = Arc::new(ImportManager::new(Arc::new(db)).unwrap());
        IngestTracker::new(import_manager, HashSet::new(), bytes_total)
    }

    #[test]
    fn add_source_rejects_duplicate_file_hash() {
        let t = tracker(100);
        assert!(t.add_source(b"file-a", 1024, "raw", 1));
        assert!(!t.add_source(b"file-a", 1024, "raw", 1));
    }

    #[test]
    fn preexisting_sources_suppress_add() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        std::mem::forget(tmp);
        let db = Database::create(dir.as_os_str(), Settings::new()).unwrap();
        let import_manager = Arc::new(ImportManager::new(Arc::new(db)).unwrap());

        let mut preexisting = HashSet::new();
        preexisting.insert(b"file-a".to_vec());
        let t = IngestTracker::new(import_manager, preexisting, 100);

        assert!(!t.add_source(b"file-a", 1024, "raw", 1));
    }

    #[test]
    fn track_source_writes_aggregate_after_last_part() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        std::mem::forget(tmp);
        let db = Arc::new(Database::create(dir.as_os_str(), Settings::new()).unwrap());
        let import_manager = Arc::new(ImportManager::new(db.clone()).unwrap());
        let t = IngestTracker::new(import_manager, HashSet::new(), 100);

        t.add_source(b"file-a", 2048, "raw", 2);
        t.track_source(b"file-a", 3, 1).unwrap();
        assert!(t.seen_source(b"file-a"));

        t.track_source(b"file-a", 2, 0).unwrap();

        let scan = crate::scan::ScanManager::new(db);
        let source_id = scan.find_source_id(b"file-a").unwrap().unwrap();
        let record = scan.find_source(source_id).unwrap().unwrap();
        assert_eq!(record.zero_count, 5);
        assert_eq!(record.nonprobative_count, 1);
    }
}
