//! HashStore key/value codec: prefix/suffix split of the binary block hash
//! for key compaction, and the varint tuple-list value layout.
//!
//! Grounded on `original_source/src/bi_data_types.hpp`'s "key carries the
//! ordering-relevant part, value carries the rest" shape, and on
//! `robt::entry`'s general idea of a compact on-disk entry codec. The
//! prefix/suffix split here is byte-aligned (`hash_prefix_bits` must be a
//! multiple of 8) rather than true bit-level, trading a little key
//! compaction for a much simpler, obviously-correct codec — see DESIGN.md.

use crate::{err_at, settings, util, Error, Result};

/// One (source_id, file_offset, entropy, label) tuple attached to a block
/// hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tuple {
    pub source_id: u64,
    pub offset: u64,
    pub entropy: u32,
    pub label: Vec<u8>,
}

/// Splits `hash` into `(key, remainder)` per the settings' prefix/suffix
/// split. `key` is `hash[..prefix_len+suffix_len]`; `remainder` is the rest
/// of `hash`, which must be stored in the value to reconstruct `hash`
/// exactly via [full_hash].
pub fn encode_key(hash: &[u8], settings: &settings::Record) -> Result<(Vec<u8>, Vec<u8>)> {
    let (prefix_len, suffix_len) = split_lengths(settings)?;
    let key_len = prefix_len + suffix_len;
    if hash.len() < key_len {
        return err_at!(
            UsageError, msg: "hash too short: {} bytes, need at least {}", hash.len(), key_len
        );
    }
    let key = hash[..key_len].to_vec();
    let remainder = hash[key_len..].to_vec();
    Ok((key, remainder))
}

/// Reassembles the full binary hash from a HashStore `key` and the
/// `remainder` stored in its value. Byte-exact for every hash that went in
/// through [encode_key].
pub fn full_hash(key: &[u8], remainder: &[u8]) -> Vec<u8> {
    let mut hash = Vec::with_capacity(key.len() + remainder.len());
    hash.extend_from_slice(key);
    hash.extend_from_slice(remainder);
    hash
}

fn split_lengths(settings: &settings::Record) -> Result<(usize, usize)> {
    if settings.hash_prefix_bits % 8 != 0 {
        return err_at!(
            InvariantViolation,
            msg: "hash_prefix_bits {} is not byte-aligned", settings.hash_prefix_bits
        );
    }
    let prefix_len = (settings.hash_prefix_bits / 8) as usize;
    let suffix_len = settings.hash_suffix_bytes as usize;
    Ok((prefix_len, suffix_len))
}

/// Encodes a HashStore value: `[varint remainder-len][remainder][varint
/// count][for each tuple: varint source_id, varint offset, varint entropy,
/// length-prefixed label]`.
pub fn encode_value(remainder: &[u8], tuples: &[Tuple]) -> Vec<u8> {
    let mut out = Vec::new();
    util::encode_bytes(remainder, &mut out);
    util::encode_varint(tuples.len() as u64, &mut out);
    for t in tuples {
        util::encode_varint(t.source_id, &mut out);
        util::encode_varint(t.offset, &mut out);
        util::encode_varint(t.entropy as u64, &mut out);
        util::encode_bytes(&t.label, &mut out);
    }
    out
}

/// Decodes a HashStore value back into `(remainder, tuples)`.
pub fn decode_value(buf: &[u8]) -> Result<(Vec<u8>, Vec<Tuple>)> {
    let (remainder, mut off) = util::decode_bytes(buf)?;

    let (count, n) = util::decode_varint(&buf[off..])?;
    off += n;

    let mut tuples = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (source_id, n) = util::decode_varint(&buf[off..])?;
        off += n;
        let (offset, n) = util::decode_varint(&buf[off..])?;
        off += n;
        let (entropy, n) = util::decode_varint(&buf[off..])?;
        off += n;
        let (label, n) = util::decode_bytes(&buf[off..])?;
        off += n;

        tuples.push(Tuple {
            source_id,
            offset,
            entropy: entropy as u32,
            label,
        });
    }

    Ok((remainder, tuples))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> settings::Record {
        settings::Settings::new().freeze()
    }

    #[test]
    fn encode_key_splits_at_byte_boundary() {
        let settings = settings();
        let hash: Vec<u8> = (0..16u8).collect();
        let (key, remainder) = encode_key(&hash, &settings).unwrap();
        assert_eq!(key.len(), 14); // 96/8 + 2
        assert_eq!(remainder.len(), 2);
        assert_eq!(full_hash(&key, &remainder), hash);
    }

    #[test]
    fn value_round_trips_multiple_tuples() {
        let tuples = vec![
            Tuple { source_id: 1, offset: 0, entropy: 0, label: vec![] },
            Tuple { source_id: 2, offset: 512, entropy: 900, label: b"RH".to_vec() },
        ];
        let remainder = vec![0xab, 0xcd];
        let encoded = encode_value(&remainder, &tuples);
        let (got_remainder, got_tuples) = decode_value(&encoded).unwrap();
        assert_eq!(got_remainder, remainder);
        assert_eq!(got_tuples, tuples);
    }

    #[test]
    fn empty_tuple_list_round_trips() {
        let encoded = encode_value(&[1, 2], &[]);
        let (remainder, tuples) = decode_value(&encoded).unwrap();
        assert_eq!(remainder, vec![1, 2]);
        assert!(tuples.is_empty());
    }

    #[test]
    fn rejects_non_byte_aligned_prefix() {
        let mut bad = settings();
        bad.hash_prefix_bits = 13;
        let hash = vec![0u8; 16];
        assert!(encode_key(&hash, &bad).is_err());
    }
}
