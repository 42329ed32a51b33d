//! SourceNameStore: (source_id, repository_name, filename) set membership.
//! A source may be named multiple times, under different repository/filename
//! pairs; both dimensions are preserved (spec §10.5), grounded on
//! `original_source/src/repository_name_lookup_store.hpp`.

use crate::{err_at, kv::{MemStore, Store}, util, Error, Result};
use std::ffi;

pub struct SourceNameStore {
    store: MemStore,
}

fn encode_key(source_id: u64, repository_name: &str, filename: &str) -> Vec<u8> {
    let mut key = source_id.to_be_bytes().to_vec();
    util::encode_bytes(repository_name.as_bytes(), &mut key);
    util::encode_bytes(filename.as_bytes(), &mut key);
    key
}

fn decode_name(key: &[u8]) -> Result<(String, String)> {
    if key.len() < 8 {
        return err_at!(DecodeFail, msg: "malformed source-name key, len {}", key.len());
    }
    let (repo, n) = util::decode_bytes(&key[8..])?;
    let (name, _) = util::decode_bytes(&key[8 + n..])?;
    let repo = err_at!(DecodeFail, String::from_utf8(repo))?;
    let name = err_at!(DecodeFail, String::from_utf8(name))?;
    Ok((repo, name))
}

impl SourceNameStore {
    pub fn create(dir: &ffi::OsStr) -> Result<SourceNameStore> {
        Ok(SourceNameStore { store: MemStore::create(dir, "source_name_store")? })
    }

    pub fn open(dir: &ffi::OsStr) -> Result<SourceNameStore> {
        Ok(SourceNameStore { store: MemStore::open(dir, "source_name_store")? })
    }

    /// Record a name for `source_id`. Idempotent: naming the same source the
    /// same way twice is a no-op. Returns whether this name was newly added.
    pub fn insert_name(&self, source_id: u64, repository_name: &str, filename: &str) -> Result<bool> {
        let key = encode_key(source_id, repository_name, filename);
        match self.store.upsert(&key, &[])? {
            Some(_) => Ok(false),
            None => Ok(true),
        }
    }

    pub fn find_names(&self, source_id: u64) -> Result<Vec<(String, String)>> {
        let prefix = source_id.to_be_bytes().to_vec();
        let entries = self.store.range_from(Some(&prefix))?;

        let mut names = vec![];
        for (key, _) in entries {
            if !key.starts_with(&prefix) {
                break;
            }
            names.push(decode_name(&key)?);
        }
        Ok(names)
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}
