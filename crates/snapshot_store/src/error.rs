use std::path::PathBuf;

use thiserror::Error;

use crate::schema::SnapshotKey;

#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse snapshot JSON at {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot {path} has unsupported version {found}; expected 1")]
    UnsupportedVersion { path: PathBuf, found: u32 },

    #[error("snapshot {path} holds key '{found}' but was read as '{expected}'")]
    KeyMismatch {
        path: PathBuf,
        expected: SnapshotKey,
        found: SnapshotKey,
    },

    #[error("snapshot {path} has invalid RFC3339 timestamp in 'saved_at': {value}")]
    InvalidTimestamp { path: PathBuf, value: String },

    #[error("failed to decode '{key}' payload in {path}: {source}")]
    PayloadDecode {
        key: SnapshotKey,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize '{key}' snapshot for {path}: {source}")]
    JsonSerialize {
        key: SnapshotKey,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot '{key}' needs {size} bytes which exceeds the storage quota of {limit} bytes")]
    QuotaExceeded {
        key: SnapshotKey,
        size: usize,
        limit: usize,
    },

    #[error("failed to format current UTC timestamp as RFC3339: {0}")]
    ClockFormat(#[source] time::error::Format),
}

impl SnapshotStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn json_parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::JsonParse {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn json_serialize(
        key: SnapshotKey,
        path: impl Into<PathBuf>,
        source: serde_json::Error,
    ) -> Self {
        Self::JsonSerialize {
            key,
            path: path.into(),
            source,
        }
    }

    /// Returns true when the stored bytes exist but cannot be understood.
    ///
    /// Callers treat these as "no usable snapshot" and fall back to defaults.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::JsonParse { .. }
                | Self::UnsupportedVersion { .. }
                | Self::KeyMismatch { .. }
                | Self::InvalidTimestamp { .. }
                | Self::PayloadDecode { .. }
        )
    }
}
