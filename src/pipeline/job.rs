//! The unit of work a pipeline worker consumes. Grounded on
//! `original_source/src_libhashdb/hasher/job.hpp`'s `job_t`, trimmed to the
//! fields this crate's ingest path actually needs (the original also
//! threads scan-mode fields through the same struct; scanning is driven
//! through [crate::scan::ScanManager] directly here instead).

use std::sync::Arc;

/// One D-byte-plus-overlap buffer from a single source, queued for block
/// hashing. `buffer` carries `buffer_data_size` bytes of "real" data
/// followed by up to `T` bytes of tail overlap (spec §4.7).
pub struct IngestJob {
    pub repository_name: String,
    pub filename: String,
    pub file_hash: Vec<u8>,
    pub file_offset: u64,
    pub buffer: Arc<Vec<u8>>,
    pub buffer_data_size: usize,
    pub recursion_depth: u32,
    pub suppress_hash_ingest: bool,
}

impl IngestJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository_name: String,
        filename: String,
        file_hash: Vec<u8>,
        file_offset: u64,
        buffer: Arc<Vec<u8>>,
        buffer_data_size: usize,
        recursion_depth: u32,
        suppress_hash_ingest: bool,
    ) -> IngestJob {
        IngestJob {
            repository_name,
            filename,
            file_hash,
            file_offset,
            buffer,
            buffer_data_size,
            recursion_depth,
            suppress_hash_ingest,
        }
    }
}
