//! Errors raised while reading or writing a state file

use std::path::PathBuf;
use thiserror::Error;

/// Every variant returned from a load is fatal: the state cannot be trusted
/// and the operator must reset it before the next certification run.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error on state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("state file is not valid BSON: {0}")]
    BsonDecode(#[from] bson::de::Error),

    #[error("failed to encode state as BSON: {0}")]
    BsonEncode(#[from] bson::ser::Error),

    #[error("bad magic {found:?}, expected {expected:?}")]
    BadMagic { found: String, expected: &'static str },

    #[error("unsupported state version {found} (this build reads version {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    #[error("checksum mismatch: header says {stored}, payload hashes to {computed}")]
    ChecksumMismatch { stored: String, computed: String },

    #[error("invalid state: {0}")]
    Invalid(String),
}

impl StateError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
