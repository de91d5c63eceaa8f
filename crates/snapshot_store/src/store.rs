use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::SnapshotStoreError;
use crate::paths::snapshot_file_name;
use crate::schema::{SnapshotEnvelope, SnapshotKey, SNAPSHOT_VERSION};

/// Directory of versioned JSON snapshots, one file per [`SnapshotKey`].
///
/// Writes go through a temporary file and a rename, so a crash mid-write leaves
/// the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    quota_bytes: Option<usize>,
}

impl SnapshotStore {
    pub fn open(root: &Path) -> Result<Self, SnapshotStoreError> {
        fs::create_dir_all(root)
            .map_err(|source| SnapshotStoreError::io("creating state directory", root, source))?;

        Ok(Self {
            root: root.to_path_buf(),
            quota_bytes: None,
        })
    }

    /// Caps the encoded size of any single snapshot.
    #[must_use]
    pub fn with_quota(mut self, limit: usize) -> Self {
        self.quota_bytes = Some(limit);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn quota_bytes(&self) -> Option<usize> {
        self.quota_bytes
    }

    #[must_use]
    pub fn path_for(&self, key: SnapshotKey) -> PathBuf {
        self.root.join(snapshot_file_name(key))
    }

    /// Reads the payload stored under `key`, or `None` when nothing was saved.
    pub fn read<T>(&self, key: SnapshotKey) -> Result<Option<T>, SnapshotStoreError>
    where
        T: DeserializeOwned,
    {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SnapshotStoreError::io("reading snapshot", &path, source));
            }
        };

        let envelope = serde_json::from_str::<SnapshotEnvelope>(&raw)
            .map_err(|source| SnapshotStoreError::json_parse(&path, source))?;
        validate_envelope(&path, key, &envelope)?;

        serde_json::from_value(envelope.data)
            .map(Some)
            .map_err(|source| SnapshotStoreError::PayloadDecode { key, path, source })
    }

    pub fn write<T>(&self, key: SnapshotKey, value: &T) -> Result<(), SnapshotStoreError>
    where
        T: Serialize + ?Sized,
    {
        let path = self.path_for(key);
        let data = serde_json::to_value(value)
            .map_err(|source| SnapshotStoreError::json_serialize(key, &path, source))?;
        let envelope = SnapshotEnvelope::v1(key, now_rfc3339()?, data);
        let encoded = serde_json::to_string(&envelope)
            .map_err(|source| SnapshotStoreError::json_serialize(key, &path, source))?;

        if let Some(limit) = self.quota_bytes {
            if encoded.len() > limit {
                return Err(SnapshotStoreError::QuotaExceeded {
                    key,
                    size: encoded.len(),
                    limit,
                });
            }
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, encoded)
            .map_err(|source| SnapshotStoreError::io("writing snapshot", &tmp, source))?;
        fs::rename(&tmp, &path)
            .map_err(|source| SnapshotStoreError::io("replacing snapshot", &path, source))?;
        Ok(())
    }

    pub fn remove(&self, key: SnapshotKey) -> Result<(), SnapshotStoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SnapshotStoreError::io("removing snapshot", &path, source)),
        }
    }

    /// Removes every known snapshot; unrelated files in the root are left alone.
    pub fn clear(&self) -> Result<(), SnapshotStoreError> {
        for key in SnapshotKey::ALL {
            self.remove(key)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, key: SnapshotKey) -> bool {
        self.path_for(key).is_file()
    }
}

fn validate_envelope(
    path: &Path,
    key: SnapshotKey,
    envelope: &SnapshotEnvelope,
) -> Result<(), SnapshotStoreError> {
    if envelope.version != SNAPSHOT_VERSION {
        return Err(SnapshotStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: envelope.version,
        });
    }

    if envelope.key != key {
        return Err(SnapshotStoreError::KeyMismatch {
            path: path.to_path_buf(),
            expected: key,
            found: envelope.key,
        });
    }

    if OffsetDateTime::parse(&envelope.saved_at, &Rfc3339).is_err() {
        return Err(SnapshotStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            value: envelope.saved_at.clone(),
        });
    }

    Ok(())
}

fn now_rfc3339() -> Result<String, SnapshotStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(SnapshotStoreError::ClockFormat)
}
