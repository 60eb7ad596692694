//! Reduce-side shuffle: gather one partition from every map task, sort by
//! key, group equal keys and feed each group to the reduce callback.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use tracing::debug;

use crate::error::{Error, Result};
use crate::partition::{intermediate_path, output_path, publish, read_intermediate, KeyValue};
use crate::ReduceFn;

/// Reads `mr-<m>-<partition>` for every `m` in `0..n_map`.
///
/// Any missing file fails the whole read; nothing is skipped.
pub fn gather(work_dir: &Path, partition: usize, n_map: usize) -> Result<Vec<KeyValue>> {
    let mut records = Vec::new();
    for m in 0..n_map {
        let path = intermediate_path(work_dir, m, partition);
        records.extend(read_intermediate(&path)?);
    }
    Ok(records)
}

/// Sorts `records` by key and collapses runs of equal keys.
pub fn group_by_key(mut records: Vec<KeyValue>) -> Vec<(String, Vec<String>)> {
    records.sort_by(|a, b| a.key.cmp(&b.key));
    let chunks = records.into_iter().chunk_by(|kv| kv.key.clone());
    let groups = chunks
        .into_iter()
        .map(|(key, group)| (key, group.map(|kv| kv.value).collect()))
        .collect();
    groups
}

/// Runs one reduce attempt for `partition` and publishes `mr-out-<partition>`.
pub fn run_reduce(
    work_dir: &Path,
    partition: usize,
    n_map: usize,
    reduce_fn: ReduceFn,
) -> Result<PathBuf> {
    let groups = group_by_key(gather(work_dir, partition, n_map)?);

    let mut lines = Vec::with_capacity(groups.len());
    for (key, values) in groups {
        let out = reduce_fn(key.clone(), values).map_err(Error::Callback)?;
        lines.push((key, out));
    }

    let path = output_path(work_dir, partition);
    publish(&path, |w| {
        for (key, out) in &lines {
            writeln!(w, "{} {}", key, out)?;
        }
        Ok(())
    })?;
    debug!("published {} ({} keys)", path.display(), lines.len());
    Ok(path)
}
