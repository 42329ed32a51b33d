//! Set-algebraic merge operators over two (or more) databases (spec §4.10).
//! Grounded on `original_source/src/adder_set.hpp`'s `adder_set_t`: each
//! function here corresponds to one of its methods (`add_source_data`,
//! `intersect`, `intersect_hash`, `subtract`, `subtract_hash`), translated
//! from its `manager_a`/`manager_b`/`manager_c` triple into a pair of
//! [ScanManager] readers plus one [ImportManager] writer, walking block
//! hashes in ascending order exactly as the C++ original's LMDB cursor loop
//! does.

use std::collections::HashSet;

use crate::{import::ImportManager, scan::ScanManager, Result};

/// One resolved tuple: the source's *file* hash (not its DB-local
/// `source_id`, which has no meaning across databases) plus offset, entropy,
/// and label.
type ResolvedTuple = (Vec<u8>, u64, u32, Vec<u8>);

fn resolved_tuples(scan: &ScanManager, hash: &[u8]) -> Result<Vec<ResolvedTuple>> {
    let tuples = match scan.find_hash(hash)? {
        Some(tuples) => tuples,
        None => return Ok(vec![]),
    };
    let mut out = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        if let Some(record) = scan.find_source(tuple.source_id)? {
            out.push((record.file_hash, tuple.offset, tuple.entropy, tuple.label));
        }
    }
    Ok(out)
}

/// Copies a source's aggregate record and all of its names into `dest`,
/// reading from `primary` if it knows `file_hash`, else from `fallback`
/// (`adder_set_t::add_source_data`'s "read from A, else B" rule). A no-op if
/// `cache` already holds `file_hash` (`adder_set_t`'s `processed_sources`).
fn copy_source_preferred(
    primary: &ScanManager,
    fallback: Option<&ScanManager>,
    dest: &ImportManager,
    file_hash: &[u8],
    cache: &mut HashSet<Vec<u8>>,
) -> Result<()> {
    if cache.contains(file_hash) {
        return Ok(());
    }
    cache.insert(file_hash.to_vec());

    let source = match primary.find_source_id(file_hash)? {
        Some(_) => Some(primary),
        None => match fallback {
            Some(fallback) if fallback.find_source_id(file_hash)?.is_some() => Some(fallback),
            _ => None,
        },
    };

    let scan = match source {
        Some(scan) => scan,
        None => return Ok(()),
    };
    let source_id = scan.find_source_id(file_hash)?.expect("checked above");
    if let Some(record) = scan.find_source(source_id)? {
        dest.insert_source_data(
            file_hash,
            record.filesize,
            &record.file_type,
            record.zero_count,
            record.nonprobative_count,
        )?;
    }
    for (repo, filename) in scan.find_source_names(source_id)? {
        dest.insert_source_name(file_hash, &repo, &filename)?;
    }
    Ok(())
}

/// `add(A -> B)`: copies every (hash, tuple) pair from `source` into `dest`,
/// interning the owning source's data and names along the way.
pub fn add(source: &ScanManager, dest: &ImportManager) -> Result<()> {
    let mut cache = HashSet::new();
    let mut hash = source.hash_first()?;
    while let Some(h) = hash {
        for (file_hash, offset, entropy, label) in resolved_tuples(source, &h)? {
            copy_source_preferred(source, None, dest, &file_hash, &mut cache)?;
            dest.insert_hash(&h, &file_hash, offset, entropy, &label)?;
        }
        hash = source.hash_next(&h)?;
    }
    Ok(())
}

/// `add_multiple(A1..An -> B)`: an n-way ordered merge over every input
/// database keyed by block hash; for each distinct hash, applies `add`'s
/// logic against every database that has it.
pub fn add_multiple(sources: &[ScanManager], dest: &ImportManager) -> Result<()> {
    let mut cursors: Vec<Option<Vec<u8>>> =
        sources.iter().map(ScanManager::hash_first).collect::<Result<_>>()?;
    let mut caches: Vec<HashSet<Vec<u8>>> = sources.iter().map(|_| HashSet::new()).collect();

    loop {
        let min_hash = match cursors.iter().flatten().min().cloned() {
            Some(h) => h,
            None => break,
        };

        for (i, cursor) in cursors.iter_mut().enumerate() {
            if cursor.as_deref() != Some(min_hash.as_slice()) {
                continue;
            }
            for (file_hash, offset, entropy, label) in resolved_tuples(&sources[i], &min_hash)? {
                copy_source_preferred(&sources[i], None, dest, &file_hash, &mut caches[i])?;
                dest.insert_hash(&min_hash, &file_hash, offset, entropy, &label)?;
            }
            *cursor = sources[i].hash_next(&min_hash)?;
        }
    }
    Ok(())
}

/// `intersect(A,B -> C)`: for each hash present in both, the intersection of
/// their `(file_binary_hash, offset)` sets, written with A's entropy/label.
pub fn intersect(a: &ScanManager, b: &ScanManager, dest: &ImportManager) -> Result<()> {
    let mut cache = HashSet::new();
    let mut hash = a.hash_first()?;
    while let Some(h) = hash {
        let ta = resolved_tuples(a, &h)?;
        let tb = resolved_tuples(b, &h)?;
        if !ta.is_empty() && !tb.is_empty() {
            let b_keys: HashSet<(Vec<u8>, u64)> =
                tb.iter().map(|(fh, off, _, _)| (fh.clone(), *off)).collect();

            for (file_hash, offset, entropy, label) in &ta {
                if b_keys.contains(&(file_hash.clone(), *offset)) {
                    copy_source_preferred(a, Some(b), dest, file_hash, &mut cache)?;
                    dest.insert_hash(&h, file_hash, *offset, *entropy, label)?;
                }
            }
        }
        hash = a.hash_next(&h)?;
    }
    Ok(())
}

/// `intersect_hash(A,B -> C)`: for each hash present in both databases (by
/// hash only), writes the **union** of their tuples, per spec §9's
/// resolution of the original's `intersect_hash` contract. A's tuple wins
/// when both sides carry the same `(file_binary_hash, offset)` pair.
pub fn intersect_hash(a: &ScanManager, b: &ScanManager, dest: &ImportManager) -> Result<()> {
    let mut cache = HashSet::new();
    let mut hash = a.hash_first()?;
    while let Some(h) = hash {
        let count_b = b.find_hash_count(&h)?;
        if count_b > 0 {
            let mut seen: HashSet<(Vec<u8>, u64)> = HashSet::new();
            let mut union: Vec<ResolvedTuple> = vec![];
            for tuple in resolved_tuples(a, &h)?.into_iter().chain(resolved_tuples(b, &h)?) {
                let key = (tuple.0.clone(), tuple.1);
                if seen.insert(key) {
                    union.push(tuple);
                }
            }

            for (file_hash, offset, entropy, label) in union {
                copy_source_preferred(a, Some(b), dest, &file_hash, &mut cache)?;
                dest.insert_hash(&h, &file_hash, offset, entropy, &label)?;
            }
        }
        hash = a.hash_next(&h)?;
    }
    Ok(())
}

/// `subtract(A,B -> C)`: for each hash in A, the `(file_binary_hash, offset)`
/// pairs present in A but absent from B.
pub fn subtract(a: &ScanManager, b: &ScanManager, dest: &ImportManager) -> Result<()> {
    let mut cache = HashSet::new();
    let mut hash = a.hash_first()?;
    while let Some(h) = hash {
        let ta = resolved_tuples(a, &h)?;
        let tb = resolved_tuples(b, &h)?;
        let b_keys: HashSet<(Vec<u8>, u64)> =
            tb.iter().map(|(fh, off, _, _)| (fh.clone(), *off)).collect();

        for (file_hash, offset, entropy, label) in &ta {
            if !b_keys.contains(&(file_hash.clone(), *offset)) {
                copy_source_preferred(a, None, dest, file_hash, &mut cache)?;
                dest.insert_hash(&h, file_hash, *offset, *entropy, label)?;
            }
        }
        hash = a.hash_next(&h)?;
    }
    Ok(())
}

/// `subtract_hash(A,B -> C)`: for each hash in A whose count in B is zero,
/// copies all of A's tuples for that hash.
pub fn subtract_hash(a: &ScanManager, b: &ScanManager, dest: &ImportManager) -> Result<()> {
    let mut cache = HashSet::new();
    let mut hash = a.hash_first()?;
    while let Some(h) = hash {
        if b.find_hash_count(&h)? == 0 {
            for (file_hash, offset, entropy, label) in resolved_tuples(a, &h)? {
                copy_source_preferred(a, None, dest, &file_hash, &mut cache)?;
                dest.insert_hash(&h, &file_hash, offset, entropy, &label)?;
            }
        }
        hash = a.hash_next(&h)?;
    }
    Ok(())
}

/// `deduplicate(A -> B)`: copies only the hashes whose tuple count is
/// exactly one -- the blocks unique to a single (source, offset) pair.
pub fn deduplicate(source: &ScanManager, dest: &ImportManager) -> Result<()> {
    let mut cache = HashSet::new();
    let mut hash = source.hash_first()?;
    while let Some(h) = hash {
        let tuples = resolved_tuples(source, &h)?;
        if tuples.len() == 1 {
            let (file_hash, offset, entropy, label) = &tuples[0];
            copy_source_preferred(source, None, dest, file_hash, &mut cache)?;
            dest.insert_hash(&h, file_hash, *offset, *entropy, label)?;
        }
        hash = source.hash_next(&h)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::Database, settings::Settings};
    use std::sync::Arc;

    fn fresh() -> (ScanManager, ImportManager) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        std::mem::forget(tmp);
        let db = Arc::new(Database::create(dir.as_os_str(), Settings::new()).unwrap());
        (ScanManager::new(db.clone()), ImportManager::new(db).unwrap())
    }

    fn seed(imp: &ImportManager, file: &[u8], repo: &str, name: &str, hash: &[u8], offset: u64) {
        imp.insert_source_name(file, repo, name).unwrap();
        imp.insert_source_data(file, 4096, "raw", 0, 0).unwrap();
        imp.insert_hash(hash, file, offset, 1, b"").unwrap();
    }

    #[test]
    fn add_copies_hashes_and_source_metadata() {
        let (scan_a, imp_a) = fresh();
        seed(&imp_a, b"file-a", "repo", "a.bin", &[9u8; 16], 512);

        let (scan_c, imp_c) = fresh();
        add(&scan_a, &imp_c).unwrap();

        assert_eq!(scan_c.find_hash_count(&[9u8; 16]).unwrap(), 1);
        let source_id = scan_c.find_source_id(b"file-a").unwrap().unwrap();
        assert_eq!(scan_c.find_source(source_id).unwrap().unwrap().filesize, 4096);
        assert_eq!(scan_c.find_source_names(source_id).unwrap(), vec![("repo".into(), "a.bin".into())]);
    }

    #[test]
    fn intersect_keeps_only_common_pairs() {
        let (scan_a, imp_a) = fresh();
        seed(&imp_a, b"file-a", "repo", "a.bin", &[1u8; 16], 512);
        imp_a.insert_hash(&[1u8; 16], b"file-b", 1024, 1, b"").unwrap();

        let (scan_b, imp_b) = fresh();
        seed(&imp_b, b"file-a", "repo", "a.bin", &[1u8; 16], 512);

        let (scan_c, imp_c) = fresh();
        intersect(&scan_a, &scan_b, &imp_c).unwrap();

        assert_eq!(scan_c.find_hash_count(&[1u8; 16]).unwrap(), 1);
    }

    #[test]
    fn intersect_hash_unions_tuples() {
        let (scan_a, imp_a) = fresh();
        seed(&imp_a, b"file-a", "repo", "a.bin", &[2u8; 16], 512);

        let (scan_b, imp_b) = fresh();
        seed(&imp_b, b"file-b", "repo", "b.bin", &[2u8; 16], 1024);

        let (scan_c, imp_c) = fresh();
        intersect_hash(&scan_a, &scan_b, &imp_c).unwrap();

        assert_eq!(scan_c.find_hash_count(&[2u8; 16]).unwrap(), 2);
    }

    #[test]
    fn subtract_removes_pairs_present_in_b() {
        let (scan_a, imp_a) = fresh();
        seed(&imp_a, b"file-a", "repo", "a.bin", &[3u8; 16], 512);
        imp_a.insert_hash(&[3u8; 16], b"file-b", 1024, 1, b"").unwrap();

        let (scan_b, imp_b) = fresh();
        seed(&imp_b, b"file-a", "repo", "a.bin", &[3u8; 16], 512);

        let (scan_c, imp_c) = fresh();
        subtract(&scan_a, &scan_b, &imp_c).unwrap();

        assert_eq!(scan_c.find_hash_count(&[3u8; 16]).unwrap(), 1);
        let source_id = scan_c.find_source_id(b"file-b").unwrap().unwrap();
        assert_eq!(scan_c.find_source(source_id).unwrap().unwrap().filesize, 0);
    }

    #[test]
    fn subtract_hash_requires_absence_in_b() {
        let (scan_a, imp_a) = fresh();
        seed(&imp_a, b"file-a", "repo", "a.bin", &[4u8; 16], 512);

        let (scan_b, _imp_b) = fresh();

        let (scan_c, imp_c) = fresh();
        subtract_hash(&scan_a, &scan_b, &imp_c).unwrap();
        assert_eq!(scan_c.find_hash_count(&[4u8; 16]).unwrap(), 1);
    }

    #[test]
    fn deduplicate_keeps_only_singleton_hashes() {
        let (scan_a, imp_a) = fresh();
        seed(&imp_a, b"file-a", "repo", "a.bin", &[5u8; 16], 512);
        seed(&imp_a, b"file-a", "repo", "a.bin", &[6u8; 16], 1024);
        imp_a.insert_hash(&[6u8; 16], b"file-b", 2048, 1, b"").unwrap();

        let (scan_c, imp_c) = fresh();
        deduplicate(&scan_a, &imp_c).unwrap();

        assert_eq!(scan_c.find_hash_count(&[5u8; 16]).unwrap(), 1);
        assert_eq!(scan_c.find_hash_count(&[6u8; 16]).unwrap(), 0);
    }
}
