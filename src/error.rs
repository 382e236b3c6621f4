use std::path::PathBuf;

use crate::Hash;

/// error type for store and conversion operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("repository already exists at {0}")]
    RepoExists(PathBuf),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("ref {name} changed concurrently: expected {}, found {}", fmt_opt(.expected), fmt_opt(.actual))]
    RefConflict {
        name: String,
        expected: Option<Hash>,
        actual: Option<Hash>,
    },

    #[error("invalid ref name: {0}")]
    InvalidRef(String),

    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    #[error("object not found: {0}")]
    ObjectNotFound(Hash),

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: Hash, actual: Hash },

    #[error("invalid tree: {0}")]
    InvalidTree(String),

    #[error("invalid tree entry name: {0}")]
    InvalidEntryName(String),

    #[error("checkout target not empty: {0}")]
    TargetNotEmpty(PathBuf),

    #[error("layer {0} is not present in the store")]
    MissingLayer(String),

    #[error("image config {0} is not present in the store")]
    MissingConfig(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid image reference: {0}")]
    InvalidImage(String),

    #[error("lock contention on repository")]
    LockContention,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),

    #[error("xattr error on {path}: {message}")]
    Xattr { path: PathBuf, message: String },

    #[error("{program} exited with status {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ToolFailed { program: String, code: Option<i32> },
}

fn fmt_opt(hash: &Option<Hash>) -> String {
    match hash {
        Some(h) => h.to_hex(),
        None => "<none>".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
