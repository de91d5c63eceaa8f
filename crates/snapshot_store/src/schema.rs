use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current on-disk envelope version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Fixed set of logical keys the store is addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKey {
    Items,
    GeneratedText,
    Visibility,
    Pagination,
    Interruptions,
    GenerationStates,
}

impl SnapshotKey {
    pub const ALL: [SnapshotKey; 6] = [
        Self::Items,
        Self::GeneratedText,
        Self::Visibility,
        Self::Pagination,
        Self::Interruptions,
        Self::GenerationStates,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Items => "items",
            Self::GeneratedText => "generated_text",
            Self::Visibility => "visibility",
            Self::Pagination => "pagination",
            Self::Interruptions => "interruptions",
            Self::GenerationStates => "generation_states",
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One snapshot file: a versioned header around an opaque JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotEnvelope {
    pub version: u32,
    pub key: SnapshotKey,
    pub saved_at: String,
    pub data: Value,
}

impl SnapshotEnvelope {
    #[must_use]
    pub fn v1(key: SnapshotKey, saved_at: impl Into<String>, data: Value) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            key,
            saved_at: saved_at.into(),
            data,
        }
    }
}
