//! `MemStore`: an in-memory `BTreeMap`, backed by an append-only write log
//! and a periodic sorted snapshot, implementing [super::Store].
//!
//! Grounded in idiom on `robt::build`/`robt::index` (accumulate, then flush
//! an immutable sorted snapshot) and `wral::wal` (append-before-durable), but
//! collapsed to a single level: no compaction, no multi-generation index —
//! spec §4.1 only asks for atomic single-key writes and range iteration.

use std::{collections::BTreeMap, ffi, fs, path, sync::Mutex};

use crate::{err_at, kv::Store, util, Error, Result};

const SNAPSHOT_FILE: &str = "snapshot";
const LOG_FILE: &str = "log";

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

struct Inner {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    log_fd: fs::File,
}

/// A `BTreeMap`-backed ordered KV store rooted at `<dir>/<name>.{snapshot,log}`.
pub struct MemStore {
    dir: path::PathBuf,
    name: String,
    inner: Mutex<Inner>,
}

impl MemStore {
    /// Create a fresh, empty store. Fails if the snapshot or log file
    /// already exists.
    pub fn create(dir: &ffi::OsStr, name: &str) -> Result<MemStore> {
        let dir = path::PathBuf::from(dir);
        err_at!(IOError, fs::create_dir_all(&dir))?;

        let log_fd = util::create_file_a(snapshot_path(&dir, name, LOG_FILE).as_os_str())?;

        Ok(MemStore {
            dir,
            name: name.to_string(),
            inner: Mutex::new(Inner {
                map: BTreeMap::new(),
                log_fd,
            }),
        })
    }

    /// Open an existing store, replaying its snapshot then its log.
    pub fn open(dir: &ffi::OsStr, name: &str) -> Result<MemStore> {
        let dir = path::PathBuf::from(dir);
        let mut map = BTreeMap::new();

        let snap_path = snapshot_path(&dir, name, SNAPSHOT_FILE);
        if snap_path.exists() {
            let data = err_at!(IOError, fs::read(&snap_path), "read {:?}", snap_path)?;
            load_snapshot(&data, &mut map)?;
        }

        let log_path = snapshot_path(&dir, name, LOG_FILE);
        if log_path.exists() {
            let data = err_at!(IOError, fs::read(&log_path), "read {:?}", log_path)?;
            replay_log(&data, &mut map)?;
        }

        let log_fd = util::open_file_a(log_path.as_os_str())?;

        Ok(MemStore {
            dir,
            name: name.to_string(),
            inner: Mutex::new(Inner { map, log_fd }),
        })
    }

    fn append(&self, fd: &mut fs::File, record: &[u8]) -> Result<()> {
        util::sync_write(fd, record)?;
        Ok(())
    }
}

fn snapshot_path(dir: &path::Path, name: &str, suffix: &str) -> path::PathBuf {
    dir.join(format!("{}.{}", name, suffix))
}

fn encode_put(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = vec![OP_PUT];
    util::encode_bytes(key, &mut out);
    util::encode_bytes(value, &mut out);
    out
}

fn encode_delete(key: &[u8]) -> Vec<u8> {
    let mut out = vec![OP_DELETE];
    util::encode_bytes(key, &mut out);
    out
}

fn replay_log(data: &[u8], map: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> Result<()> {
    let mut off = 0;
    while off < data.len() {
        let op = data[off];
        off += 1;
        let (key, n) = util::decode_bytes(&data[off..])?;
        off += n;
        match op {
            OP_PUT => {
                let (value, n) = util::decode_bytes(&data[off..])?;
                off += n;
                map.insert(key, value);
            }
            OP_DELETE => {
                map.remove(&key);
            }
            other => return err_at!(DecodeFail, msg: "unknown log op-code {}", other),
        }
    }
    Ok(())
}

fn load_snapshot(data: &[u8], map: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> Result<()> {
    let mut off = 0;
    while off < data.len() {
        let (key, n) = util::decode_bytes(&data[off..])?;
        off += n;
        let (value, n) = util::decode_bytes(&data[off..])?;
        off += n;
        map.insert(key, value);
    }
    Ok(())
}

fn encode_snapshot(map: &BTreeMap<Vec<u8>, Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    for (k, v) in map.iter() {
        util::encode_bytes(k, &mut out);
        util::encode_bytes(v, &mut out);
    }
    out
}

impl Store for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.map.get(key).cloned())
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.map.contains_key(key) {
            return err_at!(InvariantViolation, msg: "key already present");
        }
        let record = encode_put(key, value);
        self.append(&mut inner.log_fd, &record)?;
        inner.map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn upsert(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        let record = encode_put(key, value);
        self.append(&mut inner.log_fd, &record)?;
        Ok(inner.map.insert(key.to_vec(), value.to_vec()))
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        let record = encode_delete(key);
        self.append(&mut inner.log_fd, &record)?;
        Ok(inner.map.remove(key))
    }

    fn range_from(&self, from: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let inner = self.inner.lock().unwrap();
        let iter = match from {
            Some(from) => inner.map.range(from.to_vec()..),
            None => inner.map.range(..),
        };
        Ok(iter.map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn len(&self) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.map.len())
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = encode_snapshot(&inner.map);

        let snap_path = snapshot_path(&self.dir, &self.name, SNAPSHOT_FILE);
        let tmp_path = snapshot_path(&self.dir, &self.name, "snapshot.tmp");
        let mut tmp_fd = util::create_file_a(tmp_path.as_os_str())?;
        util::sync_write(&mut tmp_fd, &snapshot)?;
        err_at!(IOError, fs::rename(&tmp_path, &snap_path))?;

        let log_path = snapshot_path(&self.dir, &self.name, LOG_FILE);
        inner.log_fd = util::create_file_a(log_path.as_os_str())?;
        Ok(())
    }
}
