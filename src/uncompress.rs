//! Zip/gzip signature detection and decompression (spec §4.9, §4.7
//! recursion). Grounded byte-for-byte on
//! `original_source/src_libhashdb/hasher/uncompress.hpp`'s `zip_signature`
//! and `gzip_signature` tests; decompression itself uses `zip`/`flate2`
//! rather than hand-rolled DEFLATE.

use std::io::Read;

use crate::{err_at, Error, Result};

/// A compression container recognized at a given buffer offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Zip,
    Gzip,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Zip => "zip",
            Codec::Gzip => "gzip",
        }
    }

    pub fn parse(s: &str) -> Result<Codec> {
        match s {
            "zip" => Ok(Codec::Zip),
            "gzip" => Ok(Codec::Gzip),
            other => err_at!(UsageError, msg: "unknown recursion codec {:?}", other),
        }
    }
}

/// Local file header signature `PK\x03\x04`, requiring 30 bytes of header
/// to be present so a reader never need to bounds-check further.
pub fn zip_signature(buf: &[u8], offset: usize) -> bool {
    if offset + 30 > buf.len() {
        return false;
    }
    buf[offset] == 0x50 && buf[offset + 1] == 0x4B && buf[offset + 2] == 0x03 && buf[offset + 3] == 0x04
}

/// Gzip member header: magic `1f 8b`, deflate method `08`, and a compression
/// flag byte of 0, 2, or 4 (matches the original's permissive check).
pub fn gzip_signature(buf: &[u8], offset: usize) -> bool {
    if offset + 18 > buf.len() {
        return false;
    }
    buf[offset] == 0x1f
        && buf[offset + 1] == 0x8b
        && buf[offset + 2] == 0x08
        && matches!(buf[offset + 8], 0x00 | 0x02 | 0x04)
}

/// Scans `buf` for any recognized container signature, returning
/// `(offset, codec)` pairs in ascending offset order.
pub fn scan_signatures(buf: &[u8]) -> Vec<(usize, Codec)> {
    let mut hits = vec![];
    for offset in 0..buf.len() {
        if zip_signature(buf, offset) {
            hits.push((offset, Codec::Zip));
        } else if gzip_signature(buf, offset) {
            hits.push((offset, Codec::Gzip));
        }
    }
    hits
}

/// Decompresses the container starting at `in_offset` in `in_buf`, returning
/// a freshly allocated buffer of the uncompressed bytes.
pub fn decompress(codec: Codec, in_buf: &[u8], in_offset: usize) -> Result<Vec<u8>> {
    match codec {
        Codec::Zip => decompress_zip(in_buf, in_offset),
        Codec::Gzip => decompress_gzip(in_buf, in_offset),
    }
}

fn decompress_zip(in_buf: &[u8], in_offset: usize) -> Result<Vec<u8>> {
    let cursor = std::io::Cursor::new(&in_buf[in_offset..]);
    let mut archive = err_at!(DecodeFail, zip::ZipArchive::new(cursor))?;

    let mut out = vec![];
    for i in 0..archive.len() {
        let mut entry = err_at!(DecodeFail, archive.by_index(i))?;
        err_at!(IOError, entry.read_to_end(&mut out))?;
    }
    Ok(out)
}

fn decompress_gzip(in_buf: &[u8], in_offset: usize) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(&in_buf[in_offset..]);
    let mut out = vec![];
    err_at!(IOError, decoder.read_to_end(&mut out))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn zip_signature_requires_full_header_room() {
        let mut buf = vec![0u8; 29];
        buf[0..4].copy_from_slice(&[0x50, 0x4B, 0x03, 0x04]);
        assert!(!zip_signature(&buf, 0));

        buf.push(0);
        assert!(zip_signature(&buf, 0));
    }

    #[test]
    fn gzip_signature_matches_known_method_byte() {
        let mut buf = vec![0u8; 18];
        buf[0] = 0x1f;
        buf[1] = 0x8b;
        buf[2] = 0x08;
        buf[8] = 0x02;
        assert!(gzip_signature(&buf, 0));

        buf[8] = 0x99;
        assert!(!gzip_signature(&buf, 0));
    }

    #[test]
    fn scan_signatures_finds_embedded_gzip() {
        let mut encoder = flate2::write::GzEncoder::new(vec![], flate2::Compression::default());
        encoder.write_all(b"hello world").unwrap();
        let gz = encoder.finish().unwrap();

        let mut buf = vec![0xAA; 5];
        buf.extend_from_slice(&gz);

        let hits = scan_signatures(&buf);
        assert_eq!(hits, vec![(5, Codec::Gzip)]);
    }

    #[test]
    fn decompress_gzip_round_trips() {
        let mut encoder = flate2::write::GzEncoder::new(vec![], flate2::Compression::default());
        encoder.write_all(b"recursion target bytes").unwrap();
        let gz = encoder.finish().unwrap();

        let out = decompress(Codec::Gzip, &gz, 0).unwrap();
        assert_eq!(out, b"recursion target bytes");
    }

    #[test]
    fn codec_parse_rejects_unknown_names() {
        assert!(Codec::parse("zip").is_ok());
        assert!(Codec::parse("bzip2").is_err());
    }
}
