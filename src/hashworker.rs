//! Block hash, entropy, and block-label calculators (spec §4.8, §4.9).
//! Grounded closely on
//! `original_source/src_libhashdb/hasher/{calculate_hash,entropy_calculator,calculate_block_label}.hpp`,
//! translated from OpenSSL/raw-loop C++ into the RustCrypto `md-5` crate and
//! safe slice arithmetic.

use md5::{Digest, Md5};

/// Incremental whole-file hasher (spec §4.7 step 1): streamed once over the
/// entire file, with no block padding applied.
#[derive(Default)]
pub struct FileHasher {
    hasher: Md5,
}

impl FileHasher {
    pub fn new() -> FileHasher {
        FileHasher { hasher: Md5::new() }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finish(self) -> Vec<u8> {
        self.hasher.finalize().to_vec()
    }
}

/// Computes the MD5 block hash over `count` bytes of `buffer` starting at
/// `offset`, zero-extending past the end of `buffer` rather than reading out
/// of bounds.
pub fn block_hash(buffer: &[u8], offset: usize, count: usize) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(&windowed(buffer, offset, count));
    hasher.finalize().to_vec()
}

/// Returns `count` bytes starting at `offset`, zero-padding any portion that
/// runs past `buffer`'s end.
fn windowed(buffer: &[u8], offset: usize, count: usize) -> Vec<u8> {
    if offset + count <= buffer.len() {
        buffer[offset..offset + count].to_vec()
    } else {
        let mut out = vec![0u8; count];
        if offset < buffer.len() {
            let available = buffer.len() - offset;
            out[..available].copy_from_slice(&buffer[offset..]);
        }
        out
    }
}

/// True if `count` bytes starting at `offset` are all equal to one another
/// (spec §4.7's "all-equal test, all-zero as a specialization"). Past-buffer
/// bytes zero-extend like [block_hash], so a short tail of zeros still
/// counts as uniform.
pub(crate) fn is_uniform_block(buffer: &[u8], offset: usize, count: usize) -> bool {
    let block = windowed(buffer, offset, count);
    match block.first() {
        Some(&first) => block.iter().all(|&b| b == first),
        None => true,
    }
}

/// Fixed-point Shannon-like entropy over 16-bit little-endian symbols of a
/// block (spec §4.8). `block_size` determines the lookup table, which should
/// match the configured block size so `p = (i+1)/block_size` lines up with
/// the maximum possible bucket count.
pub struct EntropyCalculator {
    lookup_table: Vec<u64>,
}

impl EntropyCalculator {
    pub fn new(block_size: usize) -> EntropyCalculator {
        let lookup_table = (0..block_size)
            .map(|i| {
                let p = (i as f64 + 1.0) / block_size as f64;
                let bits = -p * p.log2() / 6.0;
                (bits * 1024.0) as u64
            })
            .collect();
        EntropyCalculator { lookup_table }
    }

    /// Entropy of `count` bytes of `buffer` starting at `offset`,
    /// zero-extending on overrun exactly like [block_hash].
    pub fn calculate(&self, buffer: &[u8], offset: usize, count: usize) -> u64 {
        let block = windowed(buffer, offset, count);
        self.calculate_block(&block)
    }

    fn calculate_block(&self, block: &[u8]) -> u64 {
        let mut buckets = std::collections::HashMap::new();
        let mut i = 0;
        while i + 1 < block.len() {
            let element = u16::from_le_bytes([block[i], block[i + 1]]);
            *buckets.entry(element).or_insert(0u64) += 1;
            i += 2;
        }

        buckets
            .values()
            .map(|&count| self.lookup_table[(count - 1) as usize])
            .sum()
    }
}

/// Computes the block label (spec §4.9): concatenation of `R`/`H`/`W`/`M`
/// single-letter tags for each heuristic that fires. Empty string means
/// "probative".
pub fn block_label(buffer: &[u8], offset: usize, count: usize) -> String {
    let block = windowed(buffer, offset, count);
    let mut label = String::new();
    if ramp_trait(&block) {
        label.push('R');
    }
    if hist_trait(&block) {
        label.push('H');
    }
    if whitespace_trait(&block) {
        label.push('W');
    }
    if monotonic_trait(&block) {
        label.push('M');
    }
    label
}

fn le_u32_pairs(block: &[u8]) -> impl Iterator<Item = (u32, u32)> + '_ {
    let n = block.len();
    (0..n.saturating_sub(8)).step_by(4).map(move |i| {
        let a = u32::from_le_bytes(block[i..i + 4].try_into().unwrap());
        let b = u32::from_le_bytes(block[i + 4..i + 8].try_into().unwrap());
        (a, b)
    })
}

fn ramp_trait(block: &[u8]) -> bool {
    let count = le_u32_pairs(block).filter(|&(a, b)| a.wrapping_add(1) == b).count();
    count > block.len() / 8
}

fn hist_trait(block: &[u8]) -> bool {
    let mut hist = std::collections::HashMap::new();
    let n = block.len();
    for i in (0..n.saturating_sub(4)).step_by(4) {
        let a = u32::from_be_bytes(block[i..i + 4].try_into().unwrap());
        *hist.entry(a).or_insert(0u32) += 1;
    }
    if hist.len() < 3 {
        return true;
    }
    hist.values().any(|&count| count as usize > block.len() / 16)
}

fn whitespace_trait(block: &[u8]) -> bool {
    let count = block.iter().filter(|&&b| (b as char).is_ascii_whitespace()).count();
    count * 4 >= block.len() * 3
}

fn monotonic_trait(block: &[u8]) -> bool {
    let total = block.len() as f64 / 4.0;
    if total == 0.0 {
        return false;
    }
    let (mut increasing, mut decreasing, mut same) = (0u32, 0u32, 0u32);
    for (a, b) in le_u32_pairs(block) {
        if b > a {
            increasing += 1;
        } else if b < a {
            decreasing += 1;
        } else {
            same += 1;
        }
    }
    increasing as f64 / total >= 0.75 || decreasing as f64 / total >= 0.75 || same as f64 / total >= 0.75
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_hasher_matches_one_shot_digest() {
        let mut hasher = FileHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        let incremental = hasher.finish();

        let expected = Md5::digest(b"hello world").to_vec();
        assert_eq!(incremental, expected);
    }

    #[test]
    fn block_hash_zero_extends_past_buffer_end() {
        let buffer = b"abc";
        let direct = block_hash(buffer, 0, 3);
        let padded = block_hash(buffer, 0, 8);
        assert_ne!(direct, padded);

        let mut expected_input = b"abc".to_vec();
        expected_input.extend(vec![0u8; 5]);
        assert_eq!(padded, Md5::digest(&expected_input).to_vec());
    }

    #[test]
    fn all_zero_block_has_minimal_entropy() {
        let calc = EntropyCalculator::new(512);
        let zeros = vec![0u8; 512];
        let entropy = calc.calculate(&zeros, 0, 512);
        assert_eq!(entropy, 0);
    }

    #[test]
    fn uniform_random_like_block_has_higher_entropy_than_zero_block() {
        let calc = EntropyCalculator::new(512);
        let zeros = vec![0u8; 512];
        let varied: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();

        let zero_entropy = calc.calculate(&zeros, 0, 512);
        let varied_entropy = calc.calculate(&varied, 0, 512);
        assert!(varied_entropy > zero_entropy);
    }

    #[test]
    fn uniform_block_detects_all_equal_runs() {
        assert!(is_uniform_block(&[0u8; 512], 0, 512));
        assert!(is_uniform_block(&[7u8; 512], 0, 512));
        let mut mixed = vec![7u8; 512];
        mixed[511] = 8;
        assert!(!is_uniform_block(&mixed, 0, 512));
    }

    #[test]
    fn uniform_block_true_past_buffer_end() {
        assert!(is_uniform_block(b"", 0, 512));
    }

    #[test]
    fn whitespace_block_is_labeled_w() {
        // uniform bytes also trip the histogram and monotonic ("equal run")
        // traits, so all three non-ramp tags fire together.
        let block = vec![b' '; 512];
        assert_eq!(block_label(&block, 0, 512), "HWM");
    }

    #[test]
    fn ramp_block_is_labeled_r() {
        let mut block = vec![0u8; 512];
        for i in (0..504).step_by(4) {
            let v = (i / 4) as u32;
            block[i..i + 4].copy_from_slice(&v.to_le_bytes());
        }
        let label = block_label(&block, 0, 512);
        assert!(label.contains('R'));
    }
}
