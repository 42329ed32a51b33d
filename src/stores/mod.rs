//! The three logical stores the database directory owns: `HashStore`,
//! `SourceStore`, `SourceNameStore`.
//!
//! Grounded on `original_source/src/lmdb_hash_store.hpp`,
//! `lmdb_source_store.hpp`, `repository_name_lookup_store.hpp` for the
//! three-way split, and on `db::db`'s module shape of "traits + concrete
//! types wrapping a backend".

mod hash_store;
mod source_name_store;
mod source_store;

pub use hash_store::{HashStore, InsertOutcome};
pub use source_name_store::SourceNameStore;
pub use source_store::{SourceRecord, SourceStore};
