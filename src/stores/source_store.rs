//! SourceStore: source_id ↔ file_binary_hash bijection plus per-source
//! metadata (filesize, file_type, zero_count, nonprobative_count).
//!
//! Grounded on `original_source/src/lmdb_source_store.hpp`'s "add merges
//! into the existing record, conflicting non-empty values are a program
//! error" behavior.

use std::{ffi, sync::Mutex};

use serde::{Deserialize, Serialize};

use crate::{
    err_at,
    kv::{MemStore, Store},
    settings, Error, Result,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub file_hash: Vec<u8>,
    pub filesize: u64,
    pub file_type: String,
    pub zero_count: u64,
    pub nonprobative_count: u64,
}

pub struct SourceStore {
    by_id: MemStore,
    by_hash: MemStore,
    next_id: Mutex<u64>,
}

fn id_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

fn id_from_key(key: &[u8]) -> Result<u64> {
    if key.len() != 8 {
        return err_at!(DecodeFail, msg: "malformed source_id key, len {}", key.len());
    }
    Ok(u64::from_be_bytes(key.try_into().unwrap()))
}

impl SourceStore {
    pub fn create(dir: &ffi::OsStr, _settings: &settings::Record) -> Result<SourceStore> {
        Ok(SourceStore {
            by_id: MemStore::create(dir, "source_store_by_id")?,
            by_hash: MemStore::create(dir, "source_store_by_hash")?,
            next_id: Mutex::new(1),
        })
    }

    pub fn open(dir: &ffi::OsStr, _settings: &settings::Record) -> Result<SourceStore> {
        let by_id = MemStore::open(dir, "source_store_by_id")?;
        let by_hash = MemStore::open(dir, "source_store_by_hash")?;
        let next_id = 1 + by_id.len()? as u64;
        Ok(SourceStore {
            by_id,
            by_hash,
            next_id: Mutex::new(next_id),
        })
    }

    /// Find-or-allocate the source_id for `file_hash`, creating an empty
    /// record if this is the first reference.
    pub fn intern(&self, file_hash: &[u8]) -> Result<u64> {
        if let Some(id) = self.find_id(file_hash)? {
            return Ok(id);
        }

        let mut next_id = self.next_id.lock().unwrap();
        let id = *next_id;

        self.by_hash.insert(file_hash, &id_key(id))?;
        let record = SourceRecord { file_hash: file_hash.to_vec(), ..Default::default() };
        let value = err_at!(EncodeFail, serde_json::to_vec(&record))?;
        self.by_id.insert(&id_key(id), &value)?;

        *next_id += 1;
        Ok(id)
    }

    pub fn find_id(&self, file_hash: &[u8]) -> Result<Option<u64>> {
        match self.by_hash.get(file_hash)? {
            Some(key) => Ok(Some(id_from_key(&key)?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, id: u64) -> Result<Option<SourceRecord>> {
        match self.by_id.get(&id_key(id))? {
            Some(value) => {
                let record = err_at!(DecodeFail, serde_json::from_slice(&value))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Upsert metadata for the source named by `file_hash`, interning it if
    /// necessary. Conflicting non-empty `filesize`/`file_type` is a fatal
    /// `InvariantViolation`; empty-to-value updates are allowed.
    /// `zero_count`/`nonprobative_count` are always overwritten (they are
    /// written exactly once, by the ingest tracker, after all of a source's
    /// buffer jobs complete).
    pub fn upsert_metadata(
        &self,
        file_hash: &[u8],
        filesize: u64,
        file_type: &str,
        zero_count: u64,
        nonprobative_count: u64,
    ) -> Result<u64> {
        let id = self.intern(file_hash)?;
        let mut record = self.get(id)?.unwrap_or_default();

        if record.filesize != 0 && filesize != 0 && record.filesize != filesize {
            return err_at!(
                InvariantViolation,
                msg: "conflicting filesize for source {}: {} vs {}", id, record.filesize, filesize
            );
        }
        if !record.file_type.is_empty() && !file_type.is_empty() && record.file_type != file_type {
            return err_at!(
                InvariantViolation,
                msg: "conflicting file_type for source {}: {:?} vs {:?}",
                id, record.file_type, file_type
            );
        }

        if filesize != 0 {
            record.filesize = filesize;
        }
        if !file_type.is_empty() {
            record.file_type = file_type.to_string();
        }
        record.zero_count = zero_count;
        record.nonprobative_count = nonprobative_count;

        let value = err_at!(EncodeFail, serde_json::to_vec(&record))?;
        self.by_id.upsert(&id_key(id), &value)?;
        Ok(id)
    }

    /// Ordered walk over source IDs.
    pub fn source_after(&self, prev: Option<u64>) -> Result<Option<u64>> {
        let from = prev.map(|id| id_key(id + 1));
        let entries = self.by_id.range_from(from.as_deref())?;
        match entries.into_iter().next() {
            Some((key, _)) => Ok(Some(id_from_key(&key)?)),
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.by_id.flush()?;
        self.by_hash.flush()
    }
}
