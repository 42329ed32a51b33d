//! `hashdb`: a content-addressed block-hash database for digital forensics.
//!
//! Given a corpus of source files (disk images, archives, loose files), this
//! crate indexes fixed-size block hashes (typically MD5 over 512-byte
//! sectors) together with the sources and offsets at which each hash
//! occurs, plus per-source and per-block metadata (entropy, labels, file
//! type, file size). It supports bulk ingest (including recursive descent
//! into compressed containers), scan (hash lookup with source attribution),
//! and set-algebraic composition across databases (add, intersect,
//! subtract, deduplicate).
//!
//! [crate::db::Database] owns a database directory's three stores and
//! settings. [crate::import::ImportManager] is the write facade;
//! [crate::scan::ScanManager] is the read-only facade; [crate::ingest]
//! drives bulk filesystem ingest on top of them; [crate::merge] implements
//! the set-algebraic operators across two databases.

#[macro_use]
mod error;

mod bloom;
mod db;
mod forensic_path;
mod hashcodec;
mod hashworker;
mod import;
mod ingest;
mod kv;
mod media;
mod merge;
mod pipeline;
mod scan;
mod settings;
mod stores;
mod tracker;
mod uncompress;
mod util;

pub use crate::{
    bloom::Bloom,
    db::Database,
    error::{Error, Result},
    forensic_path::read_bytes,
    hashcodec::Tuple,
    import::{Counters, ImportManager},
    ingest::IngestPipeline,
    media::Media,
    merge::{add, add_multiple, deduplicate, intersect, intersect_hash, subtract, subtract_hash},
    scan::{ScanManager, ScanMode, ScanSession},
    settings::Settings,
    stores::{InsertOutcome, SourceRecord},
    tracker::IngestTracker,
    uncompress::Codec,
};
