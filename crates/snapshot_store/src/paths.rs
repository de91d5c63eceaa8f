use std::path::{Path, PathBuf};

use crate::schema::SnapshotKey;

pub const STATE_DIR: [&str; 2] = [".pr_digest", "state"];

#[must_use]
pub fn state_root(cwd: &Path) -> PathBuf {
    cwd.join(STATE_DIR[0]).join(STATE_DIR[1])
}

#[must_use]
pub fn snapshot_file_name(key: SnapshotKey) -> String {
    format!("{}.json", key.as_str())
}
