//! HashStore: block-hash → ordered list of (source_id, offset, entropy,
//! label) tuples, with a Bloom prefilter. Grounded on
//! `original_source/src/lmdb_hash_store.hpp` (bi_store.hpp) for the
//! "bounded append list, count-capped" behavior.

use std::{ffi, path, sync::Mutex};

use crate::{bloom::Bloom, err_at, hashcodec, kv::{MemStore, Store}, settings, Error, Result};

pub use hashcodec::Tuple;

const BLOOM_FILE: &str = "bloom_filter";

/// Outcome of [HashStore::insert_tuple], distinguishing the three ways an
/// insert can be rejected (spec §4.5, §10.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateElement,
    ExceedsMax,
    InvalidAlignment,
}

pub struct HashStore {
    store: MemStore,
    bloom: Mutex<Bloom>,
    bloom_path: path::PathBuf,
    settings: settings::Record,
}

impl HashStore {
    pub fn create(dir: &ffi::OsStr, settings: &settings::Record) -> Result<HashStore> {
        let store = MemStore::create(dir, "hash_store")?;
        let bloom = Bloom::new(settings.bloom_m_hash_size, settings.bloom_k_hash_functions)?;
        let bloom_path = path::Path::new(dir).join(BLOOM_FILE);
        bloom.save(bloom_path.as_os_str())?;
        Ok(HashStore {
            store,
            bloom: Mutex::new(bloom),
            bloom_path,
            settings: settings.clone(),
        })
    }

    pub fn open(dir: &ffi::OsStr, settings: &settings::Record) -> Result<HashStore> {
        let store = MemStore::open(dir, "hash_store")?;
        let bloom_path = path::Path::new(dir).join(BLOOM_FILE);
        let bloom = if settings.bloom_is_used {
            Bloom::load(bloom_path.as_os_str())?
        } else {
            Bloom::new(settings.bloom_m_hash_size, settings.bloom_k_hash_functions)?
        };
        Ok(HashStore {
            store,
            bloom: Mutex::new(bloom),
            bloom_path,
            settings: settings.clone(),
        })
    }

    /// Append `tuple` to the record for `hash`, honoring
    /// `max_id_offset_pairs` and de-duplicating on (source_id, offset).
    pub fn insert_tuple(&self, hash: &[u8], tuple: Tuple) -> Result<InsertOutcome> {
        let (key, remainder) = hashcodec::encode_key(hash, &self.settings)?;

        let mut tuples = match self.store.get(&key)? {
            Some(value) => hashcodec::decode_value(&value)?.1,
            None => vec![],
        };

        if tuples
            .iter()
            .any(|t| t.source_id == tuple.source_id && t.offset == tuple.offset)
        {
            return Ok(InsertOutcome::DuplicateElement);
        }
        if tuples.len() as u32 >= self.settings.max_id_offset_pairs {
            return Ok(InsertOutcome::ExceedsMax);
        }

        if self.settings.bloom_is_used {
            self.bloom.lock().unwrap().add(hash);
        }

        tuples.push(tuple);
        let value = hashcodec::encode_value(&remainder, &tuples);
        self.store.upsert(&key, &value)?;

        Ok(InsertOutcome::Inserted)
    }

    /// `find_hash`: consults the Bloom filter first; on a positive, looks up
    /// the store and verifies full-hash equality.
    pub fn find_hash(&self, hash: &[u8]) -> Result<Option<Vec<Tuple>>> {
        if self.settings.bloom_is_used && !self.bloom.lock().unwrap().contains(hash) {
            return Ok(None);
        }

        let (key, _) = hashcodec::encode_key(hash, &self.settings)?;
        let value = match self.store.get(&key)? {
            Some(value) => value,
            None => return Ok(None),
        };

        let (remainder, tuples) = hashcodec::decode_value(&value)?;
        if hashcodec::full_hash(&key, &remainder) != hash {
            return Ok(None);
        }
        Ok(Some(tuples))
    }

    pub fn find_hash_count(&self, hash: &[u8]) -> Result<u64> {
        Ok(self.find_hash(hash)?.map(|t| t.len() as u64).unwrap_or(0))
    }

    /// Ordered walk over distinct block hashes, keyed by (prefix, suffix).
    /// `prev` is the full hash previously returned by this walk, or `None`
    /// to start from the first hash.
    pub fn hash_after(&self, prev: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let from_key = match prev {
            Some(hash) => {
                let (key, _) = hashcodec::encode_key(hash, &self.settings)?;
                Some(next_key(&key))
            }
            None => None,
        };
        let mut entries = self
            .store
            .range_from(from_key.as_deref())?
            .into_iter();

        match entries.next() {
            Some((key, value)) => {
                let (remainder, _) = hashcodec::decode_value(&value)?;
                Ok(Some(hashcodec::full_hash(&key, &remainder)))
            }
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()?;
        if self.settings.bloom_is_used {
            self.bloom.lock().unwrap().flush(self.bloom_path.as_os_str())?;
        }
        Ok(())
    }
}

/// The lexicographically-next byte string after `key` (used to resume a
/// range walk strictly after `key`, since `range_from` is inclusive).
fn next_key(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0);
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> settings::Record {
        settings::Settings::new().freeze()
    }

    fn hash(byte: u8) -> Vec<u8> {
        vec![byte; 16]
    }

    #[test]
    fn insert_then_find() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HashStore::create(tmp.path().as_os_str(), &settings()).unwrap();

        let h = hash(1);
        let tuple = Tuple { source_id: 1, offset: 0, entropy: 0, label: vec![] };
        assert_eq!(store.insert_tuple(&h, tuple.clone()).unwrap(), InsertOutcome::Inserted);

        let found = store.find_hash(&h).unwrap().unwrap();
        assert_eq!(found, vec![tuple]);
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HashStore::create(tmp.path().as_os_str(), &settings()).unwrap();

        let h = hash(2);
        let tuple = Tuple { source_id: 1, offset: 0, entropy: 0, label: vec![] };
        store.insert_tuple(&h, tuple.clone()).unwrap();
        assert_eq!(store.insert_tuple(&h, tuple).unwrap(), InsertOutcome::DuplicateElement);
    }

    #[test]
    fn exceeds_max_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = settings();
        s.max_id_offset_pairs = 2;
        let store = HashStore::create(tmp.path().as_os_str(), &s).unwrap();

        let h = hash(3);
        for i in 0..2u64 {
            let tuple = Tuple { source_id: 1, offset: i * 512, entropy: 0, label: vec![] };
            assert_eq!(store.insert_tuple(&h, tuple).unwrap(), InsertOutcome::Inserted);
        }
        let tuple = Tuple { source_id: 1, offset: 1024, entropy: 0, label: vec![] };
        assert_eq!(store.insert_tuple(&h, tuple).unwrap(), InsertOutcome::ExceedsMax);
    }

    #[test]
    fn absent_hash_bloom_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HashStore::create(tmp.path().as_os_str(), &settings()).unwrap();
        assert!(store.find_hash(&hash(9)).unwrap().is_none());
    }

    #[test]
    fn hash_after_walks_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HashStore::create(tmp.path().as_os_str(), &settings()).unwrap();

        for b in [3u8, 1, 2] {
            let tuple = Tuple { source_id: 1, offset: 0, entropy: 0, label: vec![] };
            store.insert_tuple(&hash(b), tuple).unwrap();
        }

        let first = store.hash_after(None).unwrap().unwrap();
        assert_eq!(first, hash(1));
        let second = store.hash_after(Some(&first)).unwrap().unwrap();
        assert_eq!(second, hash(2));
        let third = store.hash_after(Some(&second)).unwrap().unwrap();
        assert_eq!(third, hash(3));
        assert!(store.hash_after(Some(&third)).unwrap().is_none());
    }
}
