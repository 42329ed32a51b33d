//! Database settings: a mutable builder used at create time, and the
//! immutable, serializable record persisted as `settings.json`.
//!
//! Mirrors the `Config`/`Stats` split in `robt::config`: a builder-style
//! type with `set_*` methods, collapsed at database-creation time into a
//! `Record` that round-trips through `serde_json` and is never mutated
//! again.

use serde::{Deserialize, Serialize};

use std::{ffi, fs, path};

use crate::{err_at, util, Error, Result};

/// Current on-disk schema version. Bump whenever `Record`'s JSON shape
/// changes in a way that isn't backward compatible.
pub const SETTINGS_VERSION: u32 = 1;

const SETTINGS_FILE: &str = "settings.json";

/// Builder for a new database's settings. Collapses into a [Record] via
/// [Settings::freeze], which is what actually gets persisted.
#[derive(Clone, Debug)]
pub struct Settings {
    sector_size: u32,
    block_size: u32,
    max_id_offset_pairs: u32,
    hash_prefix_bits: u32,
    hash_suffix_bytes: u32,
    bloom_is_used: bool,
    bloom_m_hash_size: u32,
    bloom_k_hash_functions: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            sector_size: 512,
            block_size: 512,
            max_id_offset_pairs: 100,
            hash_prefix_bits: 96,
            hash_suffix_bytes: 2,
            bloom_is_used: true,
            bloom_m_hash_size: 28,
            bloom_k_hash_functions: 3,
        }
    }
}

impl Settings {
    pub fn new() -> Settings {
        Settings::default()
    }

    pub fn set_sector_size(&mut self, sector_size: u32) -> &mut Self {
        self.sector_size = sector_size;
        self
    }

    pub fn set_block_size(&mut self, block_size: u32) -> &mut Self {
        self.block_size = block_size;
        self
    }

    pub fn set_max_id_offset_pairs(&mut self, n: u32) -> &mut Self {
        self.max_id_offset_pairs = n;
        self
    }

    /// `prefix_bits` must be a multiple of 8; `hashcodec` splits keys at
    /// byte boundaries only.
    pub fn set_hash_key_split(&mut self, prefix_bits: u32, suffix_bytes: u32) -> &mut Self {
        self.hash_prefix_bits = prefix_bits;
        self.hash_suffix_bytes = suffix_bytes;
        self
    }

    pub fn set_bloom(&mut self, used: bool, m_hash_size: u32, k_hash_functions: u32) -> &mut Self {
        self.bloom_is_used = used;
        self.bloom_m_hash_size = m_hash_size;
        self.bloom_k_hash_functions = k_hash_functions;
        self
    }

    /// Choose `(M, k)` for an expected element count `n`, per spec §4.2:
    /// k=3, m = 2^M ≈ n/0.17.
    pub fn size_bloom_for(&mut self, expected_elements: u64) -> &mut Self {
        let m = ((expected_elements as f64 / 0.17).log2().ceil() as u32).max(3);
        self.bloom_is_used = true;
        self.bloom_m_hash_size = m;
        self.bloom_k_hash_functions = 3;
        self
    }

    /// Freeze this builder into the persisted record.
    pub fn freeze(&self) -> Record {
        Record {
            settings_version: SETTINGS_VERSION,
            sector_size: self.sector_size,
            block_size: self.block_size,
            max_id_offset_pairs: self.max_id_offset_pairs,
            hash_prefix_bits: self.hash_prefix_bits,
            hash_suffix_bytes: self.hash_suffix_bytes,
            bloom_is_used: self.bloom_is_used,
            bloom_m_hash_size: self.bloom_m_hash_size,
            bloom_k_hash_functions: self.bloom_k_hash_functions,
        }
    }
}

/// Immutable, persisted database settings. Written once at `create`, read
/// once at `open`; never mutated after that.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub settings_version: u32,
    pub sector_size: u32,
    pub block_size: u32,
    pub max_id_offset_pairs: u32,
    pub hash_prefix_bits: u32,
    pub hash_suffix_bytes: u32,
    pub bloom_is_used: bool,
    /// Serialized as `bloom_M_hash_size` (capital M) to match the
    /// `settings.json` contract in spec §6; the Rust-side field name stays
    /// snake_case.
    #[serde(rename = "bloom_M_hash_size")]
    pub bloom_m_hash_size: u32,
    pub bloom_k_hash_functions: u32,
}

impl Record {
    /// Persist as `settings.json` inside `dir`, as a single JSON line.
    pub fn create(&self, dir: &ffi::OsStr) -> Result<()> {
        let path = settings_path(dir);
        let data = err_at!(EncodeFail, serde_json::to_vec(self))?;
        let mut fd = util::create_file_a(path.as_os_str())?;
        util::sync_write(&mut fd, &data)?;
        Ok(())
    }

    /// Load `settings.json` from `dir`, validating the schema version.
    pub fn open(dir: &ffi::OsStr) -> Result<Record> {
        let path = settings_path(dir);
        let data = err_at!(IOError, fs::read(&path), "read {:?}", path)?;
        let record: Record = err_at!(DecodeFail, serde_json::from_slice(&data))?;
        if record.settings_version != SETTINGS_VERSION {
            return err_at!(
                InvariantViolation,
                msg: "settings_version mismatch: database={}, binary={}",
                record.settings_version, SETTINGS_VERSION
            );
        }
        Ok(record)
    }
}

fn settings_path(dir: &ffi::OsStr) -> path::PathBuf {
    path::Path::new(dir).join(SETTINGS_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_carries_builder_values() {
        let mut s = Settings::new();
        s.set_block_size(4096).set_sector_size(4096);
        let record = s.freeze();
        assert_eq!(record.block_size, 4096);
        assert_eq!(record.sector_size, 4096);
        assert_eq!(record.settings_version, SETTINGS_VERSION);
    }

    #[test]
    fn bloom_sizing_grows_with_expected_elements() {
        let mut s = Settings::new();
        s.size_bloom_for(1_000_000);
        let record = s.freeze();
        assert!(record.bloom_m_hash_size >= 22);
        assert_eq!(record.bloom_k_hash_functions, 3);
    }

    #[test]
    fn create_then_open_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().as_os_str();

        let record = Settings::new().freeze();
        record.create(dir).unwrap();

        let reopened = Record::open(dir).unwrap();
        assert_eq!(reopened.block_size, record.block_size);
        assert_eq!(reopened.settings_version, SETTINGS_VERSION);
    }

    #[test]
    fn open_rejects_version_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().as_os_str();

        let mut record = Settings::new().freeze();
        record.settings_version = SETTINGS_VERSION + 1;
        record.create(dir).unwrap();

        assert!(matches!(
            Record::open(dir),
            Err(Error::InvariantViolation(_, _))
        ));
    }
}
