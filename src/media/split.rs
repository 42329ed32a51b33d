//! Split-file (`.000`/`.001`/… or `.vmdk`) sequential segment reader.
//! Segments are discovered by directory listing and chained by cumulative
//! size; a read spanning a segment boundary is served by a loop over
//! [RawReader]s rather than a single `pread`. No counterpart in
//! `original_source` carries this concern as its own file — it is modeled
//! after the same "positional read over a contiguous address space" idea as
//! `raw.rs`, generalized to N backing files.

use std::{ffi, fs, path::PathBuf};

use crate::{err_at, media::raw::RawReader, Error, Result};

struct Segment {
    reader: RawReader,
    /// Offset of this segment's first byte in the logical address space.
    start: u64,
}

pub struct SplitReader {
    segments: Vec<Segment>,
    size: u64,
}

impl SplitReader {
    pub fn open(path: &ffi::OsStr) -> Result<SplitReader> {
        let paths = discover_segments(path)?;
        if paths.is_empty() {
            return err_at!(UsageError, msg: "no split-file segments found for {:?}", path);
        }

        let mut segments = Vec::with_capacity(paths.len());
        let mut start = 0u64;
        for p in &paths {
            let reader = RawReader::open(p.as_os_str())?;
            let len = reader.size();
            segments.push(Segment { reader, start });
            start += len;
        }

        Ok(SplitReader { segments, size: start })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn read(&self, offset: u64, dst: &mut [u8]) -> Result<usize> {
        if offset >= self.size || dst.is_empty() {
            return Ok(0);
        }

        let idx = match self
            .segments
            .binary_search_by(|seg| seg.start.cmp(&offset))
        {
            Ok(i) => i,
            Err(0) => return Ok(0),
            Err(i) => i - 1,
        };

        let mut total = 0usize;
        let mut offset = offset;
        for seg in &self.segments[idx..] {
            if total == dst.len() {
                break;
            }
            if offset < seg.start {
                break;
            }
            let local_offset = offset - seg.start;
            let n = seg.reader.read(local_offset, &mut dst[total..])?;
            if n == 0 {
                break;
            }
            total += n;
            offset += n as u64;
        }
        Ok(total)
    }
}

fn discover_segments(path: &ffi::OsStr) -> Result<Vec<PathBuf>> {
    let p = std::path::Path::new(path);
    let dir = p.parent().unwrap_or_else(|| std::path::Path::new("."));
    let stem = p
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let mut candidates = vec![];
    let entries = err_at!(IOError, fs::read_dir(dir), "read_dir {:?}", dir)?;
    for entry in entries {
        let entry = err_at!(IOError, entry)?;
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(n) => n,
            None => continue,
        };
        if !name.starts_with(&stem) {
            continue;
        }
        let suffix = &name[stem.len()..];
        let is_member = suffix.eq_ignore_ascii_case(".vmdk")
            || (suffix.len() == 4
                && suffix.starts_with('.')
                && suffix[1..].bytes().all(|b| b.is_ascii_digit()));
        if is_member {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    Ok(candidates)
}
