//! Map-side partitioning and the on-disk layout shared by every process.
//!
//! Files are addressed purely by task numbers, so any worker can find them
//! without asking the coordinator:
//!
//! - `mr-<m>-<r>`: records emitted by map task `m` for reduce partition `r`
//! - `mr-out-<r>`: final output of partition `r`
//!
//! Every file is published by writing a temporary file in the same directory
//! and renaming it over the final name, so readers never see a partial file.

use std::fs;
use std::hash::Hasher;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};
use crate::task::TaskId;
use crate::MapFn;

/// A single intermediate key-value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Hashes an intermediate key with 64-bit FNV-1a, keeping the low 31 bits.
/// Same key, same hash, in every process.
pub fn ihash(key: &str) -> u32 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() & 0x7fff_ffff) as u32
}

/// Reduce partition for `key`: `ihash(key) % n_reduce`.
pub fn partition_of(key: &str, n_reduce: usize) -> usize {
    ihash(key) as usize % n_reduce
}

pub fn intermediate_path(work_dir: &Path, map_id: TaskId, partition: usize) -> PathBuf {
    work_dir.join(format!("mr-{}-{}", map_id, partition))
}

pub fn output_path(work_dir: &Path, partition: usize) -> PathBuf {
    work_dir.join(format!("mr-out-{}", partition))
}

/// Splits `records` into `n_reduce` buckets, keeping emission order inside each.
pub fn bucketize(records: Vec<KeyValue>, n_reduce: usize) -> Vec<Vec<KeyValue>> {
    let mut buckets = vec![Vec::new(); n_reduce];
    for kv in records {
        let r = partition_of(&kv.key, n_reduce);
        buckets[r].push(kv);
    }
    buckets
}

/// Writes all `n_reduce` intermediate files of map task `map_id`, including
/// empty ones, and returns their paths in partition order.
pub fn write_intermediate(
    work_dir: &Path,
    map_id: TaskId,
    n_reduce: usize,
    records: Vec<KeyValue>,
) -> Result<Vec<PathBuf>> {
    let buckets = bucketize(records, n_reduce);
    let mut paths = Vec::with_capacity(n_reduce);
    for (r, bucket) in buckets.iter().enumerate() {
        let path = intermediate_path(work_dir, map_id, r);
        publish(&path, |w| {
            for kv in bucket {
                serde_json::to_writer(&mut *w, kv)?;
                w.write_all(b"\n")?;
            }
            Ok(())
        })?;
        debug!("published {} ({} records)", path.display(), bucket.len());
        paths.push(path);
    }
    Ok(paths)
}

/// Reads back one intermediate file.
///
/// A missing file is reported as [`Error::MissingIntermediate`]; a last line
/// without its newline as [`Error::TruncatedRecord`].
pub fn read_intermediate(path: &Path) -> Result<Vec<KeyValue>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingIntermediate {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(Error::io(path, e)),
    };

    let mut records = Vec::new();
    for (i, line) in contents.split_inclusive('\n').enumerate() {
        let Some(line) = line.strip_suffix('\n') else {
            return Err(Error::TruncatedRecord {
                path: path.to_path_buf(),
                line: i + 1,
            });
        };
        let kv = serde_json::from_str(line).map_err(|source| Error::CorruptRecord {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        records.push(kv);
    }
    Ok(records)
}

/// Runs one map attempt: read `input` whole, hand it to `map_fn`, and
/// publish the `n_reduce` intermediate files for `map_id`.
pub fn run_map(
    work_dir: &Path,
    map_id: TaskId,
    input: &str,
    n_reduce: usize,
    map_fn: MapFn,
) -> Result<Vec<PathBuf>> {
    let bytes = fs::read(input).map_err(|e| Error::io(input, e))?;
    // invalid UTF-8 becomes U+FFFD rather than failing every attempt
    let contents = String::from_utf8_lossy(&bytes).into_owned();
    let records = map_fn(input.to_string(), contents).map_err(Error::Callback)?;
    debug!("map {} emitted {} records from {}", map_id, records.len(), input);
    write_intermediate(work_dir, map_id, n_reduce, records)
}

/// Atomically replaces `path` with whatever `write` produces.
pub(crate) fn publish<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer).map_err(|e| Error::io(path, e))?;
        writer.flush().map_err(|e| Error::io(path, e))?;
    }
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ihash_is_fnv1a() {
        // 64-bit FNV-1a offset basis 0xcbf29ce484222325, low 31 bits
        assert_eq!(ihash(""), 0x0422_2325);
        assert_eq!(ihash("apple"), ihash("apple"));
    }

    #[test]
    fn test_partition_in_range() {
        for word in ["a", "b", "c", "hello", "world", ""] {
            assert!(partition_of(word, 3) < 3);
            assert_eq!(partition_of(word, 1), 0);
        }
    }

    #[test]
    fn test_bucketize_keeps_order() {
        let records = vec![
            KeyValue::new("x", "1"),
            KeyValue::new("y", "1"),
            KeyValue::new("x", "2"),
        ];
        let buckets = bucketize(records, 4);
        assert_eq!(buckets.len(), 4);
        let xs = &buckets[partition_of("x", 4)];
        let values: Vec<&str> = xs
            .iter()
            .filter(|kv| kv.key == "x")
            .map(|kv| kv.value.as_str())
            .collect();
        assert_eq!(values, vec!["1", "2"]);
        assert_eq!(buckets.iter().map(Vec::len).sum::<usize>(), 3);
    }

    #[test]
    fn test_write_intermediate_creates_every_partition() {
        let dir = TempDir::new().unwrap();
        let paths = write_intermediate(dir.path(), 5, 3, vec![KeyValue::new("only", "1")]).unwrap();
        assert_eq!(paths.len(), 3);
        for (r, path) in paths.iter().enumerate() {
            assert_eq!(path, &intermediate_path(dir.path(), 5, r));
            assert!(path.exists());
        }
        let total: usize = paths
            .iter()
            .map(|p| read_intermediate(p).unwrap().len())
            .sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_rewrite_is_identical() {
        let dir = TempDir::new().unwrap();
        let records = vec![KeyValue::new("a", "1"), KeyValue::new("b", "1")];
        write_intermediate(dir.path(), 0, 2, records.clone()).unwrap();
        let first: Vec<Vec<u8>> = (0..2)
            .map(|r| fs::read(intermediate_path(dir.path(), 0, r)).unwrap())
            .collect();
        write_intermediate(dir.path(), 0, 2, records).unwrap();
        let second: Vec<Vec<u8>> = (0..2)
            .map(|r| fs::read(intermediate_path(dir.path(), 0, r)).unwrap())
            .collect();
        assert_eq!(first, second);
        // no temporary files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    fn split_words(_filename: String, contents: String) -> anyhow::Result<Vec<KeyValue>> {
        Ok(contents
            .split_whitespace()
            .map(|word| KeyValue::new(word, "1"))
            .collect())
    }

    fn failing_map(_filename: String, _contents: String) -> anyhow::Result<Vec<KeyValue>> {
        anyhow::bail!("bad input")
    }

    #[test]
    fn test_run_map() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.txt");
        fs::write(&input, "a b a").unwrap();
        let paths = run_map(dir.path(), 1, input.to_str().unwrap(), 2, split_words).unwrap();
        let mut records: Vec<KeyValue> = paths
            .iter()
            .flat_map(|p| read_intermediate(p).unwrap())
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            records,
            vec![
                KeyValue::new("a", "1"),
                KeyValue::new("a", "1"),
                KeyValue::new("b", "1")
            ]
        );
    }

    #[test]
    fn test_run_map_missing_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("nope.txt");
        let err = run_map(dir.path(), 0, input.to_str().unwrap(), 2, split_words).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!intermediate_path(dir.path(), 0, 0).exists());
    }

    #[test]
    fn test_run_map_non_utf8_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("latin1.txt");
        fs::write(&input, b"caf\xe9 ok").unwrap();
        let paths = run_map(dir.path(), 0, input.to_str().unwrap(), 1, split_words).unwrap();
        let keys: Vec<String> = read_intermediate(&paths[0])
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["caf\u{fffd}".to_string(), "ok".to_string()]);
    }

    #[test]
    fn test_run_map_callback_error() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.txt");
        fs::write(&input, "x").unwrap();
        let err = run_map(dir.path(), 0, input.to_str().unwrap(), 1, failing_map).unwrap_err();
        assert!(matches!(err, Error::Callback(_)));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = read_intermediate(&intermediate_path(dir.path(), 0, 0)).unwrap_err();
        assert!(matches!(err, Error::MissingIntermediate { .. }));
    }

    #[test]
    fn test_read_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mr-0-0");
        fs::write(&path, "{\"key\":\"a\",\"value\":\"1\"}\n{\"key\":\"b\",").unwrap();
        let err = read_intermediate(&path).unwrap_err();
        assert!(matches!(err, Error::TruncatedRecord { line: 2, .. }));
    }

    #[test]
    fn test_read_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mr-0-0");
        fs::write(&path, "not json\n").unwrap();
        let err = read_intermediate(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptRecord { line: 1, .. }));
    }
}
