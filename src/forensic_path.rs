//! Forensic-path reader (spec §4.11): parses `off0(-codec-off_i)*` and
//! recursively decompresses through nested containers to resolve a byte
//! range. Grounded on
//! `original_source/src_libhashdb/hasher/read_bytes.cpp`'s `off0` +
//! repeating `(codec, off_i)` walk; the regex validating the path's grammar
//! is the idiomatic replacement for that file's hand-rolled `-`-split loop.

use regex::Regex;

use crate::{err_at, media::Media, uncompress::Codec, Error, Result};

/// Initial read size at `off0` (spec §4.11: "reads up to 1 MiB").
const INITIAL_READ_SIZE: u64 = 1 << 20;

/// One `-codec-off_i` component following the initial offset.
struct Step {
    codec: Codec,
    offset: usize,
}

fn parse(forensic_path: &str) -> Result<(u64, Vec<Step>)> {
    let grammar = Regex::new(r"^(?P<off0>\d+)(?P<rest>(?:-[A-Za-z0-9]+-\d+)*)$").unwrap();
    let step_re = Regex::new(r"-(?P<codec>[A-Za-z0-9]+)-(?P<off>\d+)").unwrap();

    let caps = err_at!(
        FormatError,
        grammar.captures(forensic_path).ok_or("malformed forensic path")
    )?;

    let off0: u64 = err_at!(FormatError, caps["off0"].parse())?;

    let mut steps = vec![];
    for step in step_re.captures_iter(&caps["rest"]) {
        let codec = Codec::parse(&step["codec"])?;
        let offset: usize = err_at!(FormatError, step["off"].parse())?;
        steps.push(Step { codec, offset });
    }
    Ok((off0, steps))
}

/// Resolves `forensic_path` against `media` and returns up to `count` bytes
/// from the final position, short-reading past the end exactly like
/// [crate::media::Media::read].
pub fn read_bytes(media: &Media, forensic_path: &str, count: usize) -> Result<Vec<u8>> {
    let (off0, steps) = parse(forensic_path)?;

    let mut buf = vec![0u8; INITIAL_READ_SIZE as usize];
    let n = media.read(off0, &mut buf)?;
    buf.truncate(n);

    let mut position = 0usize;
    for step in steps {
        buf = crate::uncompress::decompress(step.codec, &buf, position)?;
        position = step.offset;
    }

    if position >= buf.len() {
        return Ok(vec![]);
    }
    let end = (position + count).min(buf.len());
    Ok(buf[position..end].to_vec())
}
