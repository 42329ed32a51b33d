//! The abstract ordered key-value substrate the three logical stores
//! (HashStore, SourceStore, SourceNameStore) are built on top of.
//!
//! Spec §4.1 only requires an ordered map from bytes to bytes with atomic
//! single-key writes, forward range iteration, and single-writer/multi-reader
//! discipline — "a non-mmap backend is acceptable". This is deliberately not
//! `robt`'s immutable on-disk B+Tree engine: that engine solves a larger
//! problem (background compaction, multi-level LSM, MVCC snapshots) than
//! this crate needs. What's kept is the *idiom* — `robt::build`/
//! `robt::index`'s "accumulate, then flush a sorted snapshot" shape, and
//! `wral::wal`'s append-log-before-durable idiom — generalized down to a
//! single in-memory sorted map with a write-ahead log.

mod memstore;

pub use memstore::MemStore;

use crate::Result;

/// An ordered byte-keyed store. Implementations serialize writers
/// internally; readers observe a consistent snapshot per call.
pub trait Store {
    /// Point lookup. `Ok(None)` is a miss, not an error.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert `(key, value)`, failing if `key` is already present.
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Insert-or-update `(key, value)`, returning the previous value if any.
    fn upsert(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove `key`, returning its value if present.
    fn delete(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Forward iteration of `(key, value)` pairs starting at `from`
    /// (inclusive), or from the first key if `from` is `None`.
    fn range_from(&self, from: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Number of live keys.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush any buffered writes to stable storage.
    fn flush(&self) -> Result<()>;
}
