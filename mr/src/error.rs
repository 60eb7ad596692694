use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A reduce attempt found no intermediate file for one of the map tasks.
    #[error("missing intermediate file {path}")]
    MissingIntermediate { path: PathBuf },

    #[error("corrupt record in {path} at line {line}: {source}")]
    CorruptRecord {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("truncated record in {path} at line {line}")]
    TruncatedRecord { path: PathBuf, line: usize },

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("callback failed: {0}")]
    Callback(#[source] anyhow::Error),

    #[error("rpc error: {0}")]
    Rpc(#[from] tarpc::client::RpcError),

    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
