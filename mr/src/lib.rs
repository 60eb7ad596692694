//! A fault-tolerant MapReduce runtime.
//!
//! One [`coordinator::Coordinator`] hands out map and reduce tasks to any
//! number of [`worker::Worker`]s over a Unix-socket RPC channel. Workers share
//! a directory for intermediate and output files; a worker that stops
//! reporting loses its task once the lease expires, and the task is handed to
//! someone else. Tasks may therefore run more than once, which is safe because
//! every output file has a fixed name and is published atomically.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod partition;
pub mod rpc;
pub mod shuffle;
pub mod task;
pub mod worker;

pub use error::{Error, Result};
pub use partition::KeyValue;

/// A map function takes the input file name and its whole contents and
/// returns the intermediate pairs.
pub type MapFn = fn(filename: String, contents: String) -> anyhow::Result<Vec<KeyValue>>;

/// A reduce function takes a key and every value emitted for it and returns
/// the text written after the key on its output line.
pub type ReduceFn = fn(key: String, values: Vec<String>) -> anyhow::Result<String>;
