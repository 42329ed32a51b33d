//! Common utility functions: file helpers, directory walking, varint codec.

use std::{ffi, fs, path};

use crate::{err_at, Result};

/// Read `n` bytes at `seek` from `fd`, erroring if the read is short.
#[macro_export]
macro_rules! read_file {
    ($fd:expr, $seek:expr, $n:expr, $msg:expr) => {{
        use std::io::{Read, Seek};

        match $fd.seek($seek) {
            Ok(_) => {
                let mut buf = vec![0; $n];
                match $fd.read(&mut buf) {
                    Ok(n) if buf.len() == n => Ok(buf),
                    Ok(n) => {
                        let m = buf.len();
                        err_at!(IOError, msg: concat!($msg, " short read {}/{} at {:?}"), n, m, $seek)
                    }
                    Err(err) => err_at!(IOError, Err(err)),
                }
            }
            Err(err) => err_at!(IOError, Err(err)),
        }
    }};
}

/// Write the entire `buffer` to `fd`, erroring on a partial write.
#[macro_export]
macro_rules! write_file {
    ($fd:expr, $buffer:expr, $file:expr, $msg:expr) => {{
        use std::io::Write;

        match err_at!(IOError, $fd.write($buffer)) {
            Ok(n) if $buffer.len() == n => Ok(n),
            Ok(n) => err_at!(
                IOError, msg: "partial-write {}, {:?}, {}/{}", $msg, $file, n, $buffer.len()
            ),
            Err(err) => Err(err),
        }
    }};
}

/// Create a file in append mode, removing any previous file at this path.
pub fn create_file_a(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    fs::remove_file(os_file).ok(); // ignore "didn't exist" errors

    if let Some(parent) = os_file.parent() {
        if !parent.as_os_str().is_empty() {
            err_at!(IOError, fs::create_dir_all(parent))?;
        }
    }

    let mut opts = fs::OpenOptions::new();
    err_at!(IOError, opts.append(true).create_new(true).open(os_file))
}

/// Open an existing file in append mode.
pub fn open_file_a(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    let mut opts = fs::OpenOptions::new();
    err_at!(IOError, opts.append(true).open(os_file))
}

/// Open a file for reading.
pub fn open_file_r(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    err_at!(IOError, fs::OpenOptions::new().read(true).open(os_file))
}

/// Write `data` and fsync before returning.
pub fn sync_write(file: &mut fs::File, data: &[u8]) -> Result<usize> {
    use std::io::Write;

    let n = err_at!(IOError, file.write(data))?;
    if n != data.len() {
        err_at!(IOError, msg: "partial write {}/{}", n, data.len())?;
    }
    err_at!(IOError, file.sync_all())?;
    Ok(n)
}

pub enum WalkRes {
    Ok,
    SkipDir,
}

/// Depth-first directory walk. `callb` is invoked once per directory entry
/// with `(state, parent, entry, depth, breadth)`. Returning `SkipDir` from
/// `callb` on a directory entry prevents descent into it.
pub fn walk<P, S, F>(root: P, state: S, mut callb: F) -> Result<S>
where
    P: AsRef<path::Path>,
    F: FnMut(&mut S, &path::Path, &fs::DirEntry, usize, usize) -> Result<WalkRes>,
{
    do_walk(root, state, &mut callb, 0)
}

fn do_walk<P, S, F>(parent: P, mut state: S, callb: &mut F, depth: usize) -> Result<S>
where
    P: AsRef<path::Path>,
    F: FnMut(&mut S, &path::Path, &fs::DirEntry, usize, usize) -> Result<WalkRes>,
{
    let parent: path::PathBuf = parent.as_ref().to_path_buf();
    let mut subdirs = vec![];

    let dirs = err_at!(IOError, fs::read_dir(&parent), "read_dir({:?})", parent)?;
    for (breadth, entry) in dirs.enumerate() {
        let entry = err_at!(IOError, entry)?;
        let is_dir = err_at!(IOError, entry.file_type())?.is_dir();
        if let (WalkRes::Ok, true) = (callb(&mut state, &parent, &entry, depth, breadth)?, is_dir) {
            subdirs.push(entry)
        }
    }

    for subdir in subdirs.into_iter() {
        state = do_walk(subdir.path(), state, callb, depth + 1)?;
    }

    Ok(state)
}

/// Encode `val` as a base-128 varint (LEB128, unsigned), appending to `out`.
pub fn encode_varint(mut val: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }
}

/// Decode a varint from the front of `buf`. Returns (value, bytes consumed).
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut val: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return err_at!(DecodeFail, msg: "varint too long");
        }
        val |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
        shift += 7;
    }
    err_at!(DecodeFail, msg: "truncated varint")
}

/// Length-prefix `bytes` with a varint length, appending to `out`.
pub fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    encode_varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

/// Decode a varint-length-prefixed byte string from the front of `buf`.
/// Returns (bytes, bytes consumed).
pub fn decode_bytes(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let (len, n) = decode_varint(buf)?;
    let len = len as usize;
    if buf.len() < n + len {
        return err_at!(DecodeFail, msg: "truncated length-prefixed bytes");
    }
    Ok((buf[n..n + len].to_vec(), n + len))
}
