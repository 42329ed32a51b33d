//! Single RAW file reader. Grounded on
//! `original_source/src_libhashdb/hasher/single_file_reader.hpp`'s use of
//! `pread` for positional, lock-free concurrent reads; expressed here with
//! `std::os::unix::fs::FileExt::read_at`, its direct Rust counterpart.

use std::{ffi, fs, os::unix::fs::FileExt};

use crate::{err_at, Error, Result};

pub struct RawReader {
    file: fs::File,
    size: u64,
}

impl RawReader {
    pub fn open(path: &ffi::OsStr) -> Result<RawReader> {
        let file = err_at!(IOError, fs::File::open(path), "open {:?}", path)?;
        let size = err_at!(IOError, file.metadata(), "stat {:?}", path)?.len();
        Ok(RawReader { file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn read(&self, offset: u64, dst: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let remaining = (self.size - offset).min(dst.len() as u64) as usize;
        let n = err_at!(
            IOError,
            self.file.read_at(&mut dst[..remaining], offset),
            "read_at offset {}",
            offset
        )?;
        Ok(n)
    }
}
