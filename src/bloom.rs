//! A custom on-disk Bloom filter: a bit array with `k` independent hash
//! functions over the first 16 bytes of a block hash. No false negatives.
//!
//! Trait shape grounded on `db::Bloom` (`src/db/mod.rs`) and its `Xor8`
//! adaptor (`src/bitmaps/xor8.rs`); the bit-array implementation is
//! original since a specific design is called for that the xorfilter-backed
//! filters don't provide — this crate's Bloom filter never clears a bit and
//! is sized directly from an expected element count rather than built from
//! a finished key set.

use std::{ffi, fs, io::Read as _};

use crate::{err_at, util, Error, Result};

const BLOOM_FILE_VERSION: u8 = 1;

/// A Bloom filter over 16-byte (or longer, truncated) digests.
#[derive(Clone, Debug)]
pub struct Bloom {
    /// log2 of the bit-array size; m = 2^m_bits.
    m_bits: u32,
    /// number of independent hash functions.
    k: u32,
    bits: Vec<u8>,
    message: String,
}

fn popcount_bytes(bits: &[u8]) -> u64 {
    bits.iter().map(|b| b.count_ones() as u64).sum()
}

impl Bloom {
    /// Create a fresh, all-zero filter. `m_bits` is the log2 of the bit
    /// array size (so must be in `3..=63` per spec §4.2); `k` is the number
    /// of hash functions (`1..=5`).
    pub fn new(m_bits: u32, k: u32) -> Result<Bloom> {
        if !(3..64).contains(&m_bits) {
            return err_at!(UsageError, msg: "bloom m_bits {} out of range 3..64", m_bits);
        }
        if !(1..=5).contains(&k) {
            return err_at!(UsageError, msg: "bloom k {} out of range 1..=5", k);
        }
        let m_bytes = (1usize << m_bits) / 8;
        Ok(Bloom {
            m_bits,
            k,
            bits: vec![0u8; m_bytes.max(1)],
            message: String::new(),
        })
    }

    pub fn set_message(&mut self, message: &str) -> &mut Self {
        self.message = message.to_string();
        self
    }

    fn num_bits(&self) -> u64 {
        1u64 << self.m_bits
    }

    /// The two base hashes used for double hashing: `h_i = h1 + i*h2 mod m`.
    /// Only the first 16 bytes of `digest` participate, per spec §4.2.
    fn base_hashes(digest: &[u8]) -> (u64, u64) {
        let slice = &digest[..digest.len().min(16)];

        let mut h1: u64 = 0xcbf29ce484222325; // FNV-1a, offset basis
        for &b in slice {
            h1 ^= b as u64;
            h1 = h1.wrapping_mul(0x100000001b3);
        }

        let mut h2: u64 = 0x9e3779b97f4a7c15; // distinct seed (golden ratio)
        for &b in slice.iter().rev() {
            h2 ^= b as u64;
            h2 = h2.wrapping_mul(0xff51afd7ed558ccd);
            h2 = h2.rotate_left(13);
        }

        (h1, h2)
    }

    fn bit_indices(&self, digest: &[u8]) -> Vec<u64> {
        let (h1, h2) = Self::base_hashes(digest);
        let m = self.num_bits();
        (0..self.k as u64)
            .map(|i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
            .collect()
    }

    /// Set all bits for `digest`. Never clears a bit.
    pub fn add(&mut self, digest: &[u8]) {
        for idx in self.bit_indices(digest) {
            let (byte, bit) = (idx / 8, idx % 8);
            self.bits[byte as usize] |= 1 << bit;
        }
    }

    /// Query whether `digest` may be present. `false` is definitive;
    /// `true` may be a false positive.
    pub fn contains(&self, digest: &[u8]) -> bool {
        self.bit_indices(digest).into_iter().all(|idx| {
            let (byte, bit) = (idx / 8, idx % 8);
            self.bits[byte as usize] & (1 << bit) != 0
        })
    }

    /// Union with `other`; both filters must share the same dimensions.
    pub fn or(&self, other: &Bloom) -> Result<Bloom> {
        if self.m_bits != other.m_bits || self.k != other.k {
            return err_at!(
                InvariantViolation,
                msg: "bloom dimension mismatch: ({},{}) vs ({},{})",
                self.m_bits, self.k, other.m_bits, other.k
            );
        }
        let bits = self
            .bits
            .iter()
            .zip(other.bits.iter())
            .map(|(a, b)| a | b)
            .collect();
        Ok(Bloom {
            m_bits: self.m_bits,
            k: self.k,
            bits,
            message: self.message.clone(),
        })
    }

    /// Fraction of bits set, useful for diagnosing filter saturation.
    pub fn fill_ratio(&self) -> f64 {
        popcount_bytes(&self.bits) as f64 / self.num_bits() as f64
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let msg = self.message.as_bytes();
        let mut out = Vec::with_capacity(1 + 4 + 4 + 4 + msg.len() + self.bits.len());
        out.push(BLOOM_FILE_VERSION);
        out.extend_from_slice(&self.m_bits.to_le_bytes());
        out.extend_from_slice(&self.k.to_le_bytes());
        out.extend_from_slice(&(msg.len() as u32).to_le_bytes());
        out.extend_from_slice(msg);
        out.extend_from_slice(&self.bits);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Bloom> {
        if buf.len() < 13 {
            return err_at!(DecodeFail, msg: "bloom header truncated");
        }
        let version = buf[0];
        if version != BLOOM_FILE_VERSION {
            return err_at!(DecodeFail, msg: "bloom version {} unsupported", version);
        }
        let m_bits = u32::from_le_bytes(buf[1..5].try_into().unwrap());
        let k = u32::from_le_bytes(buf[5..9].try_into().unwrap());
        let msg_len = u32::from_le_bytes(buf[9..13].try_into().unwrap()) as usize;

        let msg_start = 13;
        let msg_end = msg_start + msg_len;
        if buf.len() < msg_end {
            return err_at!(DecodeFail, msg: "bloom message truncated");
        }
        let message = err_at!(DecodeFail, String::from_utf8(buf[msg_start..msg_end].to_vec()))?;

        let bits = buf[msg_end..].to_vec();
        let want = (1usize << m_bits) / 8;
        if bits.len() != want.max(1) {
            return err_at!(
                DecodeFail, msg: "bloom bit array length {} != expected {}", bits.len(), want
            );
        }

        Ok(Bloom { m_bits, k, bits, message })
    }

    pub fn save(&self, file: &ffi::OsStr) -> Result<()> {
        let data = self.to_bytes();
        let mut fd = util::create_file_a(file)?;
        util::sync_write(&mut fd, &data)?;
        Ok(())
    }

    pub fn load(file: &ffi::OsStr) -> Result<Bloom> {
        let mut fd = util::open_file_r(file)?;
        let mut data = vec![];
        err_at!(IOError, fd.read_to_end(&mut data))?;
        Bloom::from_bytes(&data)
    }

    /// Overwrite the filter on disk in place, for use under the import
    /// manager's write mutex.
    pub fn flush(&self, file: &ffi::OsStr) -> Result<()> {
        let data = self.to_bytes();
        let tmp = {
            let mut p = std::path::PathBuf::from(file);
            let name = format!(
                "{}.tmp",
                p.file_name().unwrap_or_default().to_string_lossy()
            );
            p.set_file_name(name);
            p
        };
        let mut fd = util::create_file_a(tmp.as_os_str())?;
        util::sync_write(&mut fd, &data)?;
        err_at!(IOError, fs::rename(&tmp, file))?;
        Ok(())
    }
}
