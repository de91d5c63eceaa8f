//! Durable mirror of the in-memory state.
//!
//! State is split across the fixed [`SnapshotKey`] set so that a hot path (an
//! appended increment) only rewrites the key it touched. Reads are tolerant:
//! a key that fails to load falls back to its default and is reported.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snapshot_store::{SnapshotKey, SnapshotStore, SnapshotStoreError};
use thiserror::Error;

use crate::model::{DigestState, GenerationRecord, GenerationState, Item, PaginationState};

pub const RECORD_KEYS: [SnapshotKey; 4] = [
    SnapshotKey::GeneratedText,
    SnapshotKey::Visibility,
    SnapshotKey::Interruptions,
    SnapshotKey::GenerationStates,
];

pub const PAGINATION_KEYS: [SnapshotKey; 2] = [SnapshotKey::Items, SnapshotKey::Pagination];

pub(crate) const CLOSED_MID_STREAM_MARKER: &str =
    "Generation was cut off when the app closed. Resume to continue from where it stopped.";
pub(crate) const CLOSED_BEFORE_TEXT_DIAGNOSTIC: &str =
    "Generation was cut off when the app closed before any text arrived.";
pub(crate) const STATE_NOT_RECOVERED_MARKER: &str =
    "Generation state could not be recovered. Resume to continue or restart.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationPhase {
    NotHydrated,
    Hydrated,
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("persistence is closed until the stored state has been loaded")]
    NotHydrated,

    #[error(transparent)]
    Store(#[from] SnapshotStoreError),
}

/// Result of [`PersistenceMirror::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedState {
    pub state: DigestState,
    /// Keys whose stored data was unreadable and replaced by defaults.
    pub recovered_keys: Vec<SnapshotKey>,
    /// Records rewritten because the process stopped mid-generation.
    pub normalized_records: usize,
    /// Records dropped because their item is no longer held.
    pub orphaned_records: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoredPagination {
    cursor: Option<u32>,
    current_page: u32,
}

#[derive(Debug)]
pub struct PersistenceMirror {
    store: SnapshotStore,
    phase: HydrationPhase,
}

impl PersistenceMirror {
    #[must_use]
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            store,
            phase: HydrationPhase::NotHydrated,
        }
    }

    #[must_use]
    pub fn phase(&self) -> HydrationPhase {
        self.phase
    }

    #[must_use]
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Restores persisted state and opens the gate for writes.
    pub fn load(&mut self) -> LoadedState {
        let mut recovered_keys = Vec::new();

        let items: Vec<Item> = self.read_or_default(SnapshotKey::Items, &mut recovered_keys);
        let pagination: StoredPagination =
            self.read_or_default(SnapshotKey::Pagination, &mut recovered_keys);
        let texts: BTreeMap<String, String> =
            self.read_or_default(SnapshotKey::GeneratedText, &mut recovered_keys);
        let visibility: BTreeMap<String, bool> =
            self.read_or_default(SnapshotKey::Visibility, &mut recovered_keys);
        let interruptions: BTreeMap<String, String> =
            self.read_or_default(SnapshotKey::Interruptions, &mut recovered_keys);
        let states: BTreeMap<String, GenerationState> =
            self.read_or_default(SnapshotKey::GenerationStates, &mut recovered_keys);

        let pagination = PaginationState {
            cursor: pagination.cursor,
            current_page: pagination.current_page,
            items: dedupe_items(items),
        };

        let mut normalized_records = 0;
        let mut orphaned_records = 0;
        let mut records = BTreeMap::new();
        let ids: BTreeSet<&String> = states
            .keys()
            .chain(texts.keys())
            .chain(visibility.keys())
            .chain(interruptions.keys())
            .collect();

        for id in ids {
            if pagination.item(id).is_none() {
                orphaned_records += 1;
                continue;
            }

            let text = texts.get(id).cloned().unwrap_or_default();
            let mut record = GenerationRecord {
                item_id: id.clone(),
                state: GenerationState::Idle,
                accumulated_text: text,
                visible: visibility.get(id).copied().unwrap_or(true),
                interruption_marker: interruptions.get(id).cloned(),
                session: None,
            };

            match states.get(id).copied() {
                Some(GenerationState::Generating) => {
                    normalized_records += 1;
                    if record.accumulated_text.is_empty() {
                        record.state = GenerationState::Failed;
                        record.accumulated_text = CLOSED_BEFORE_TEXT_DIAGNOSTIC.to_string();
                        record.interruption_marker = None;
                    } else {
                        record.state = GenerationState::Interrupted;
                        record.interruption_marker = Some(CLOSED_MID_STREAM_MARKER.to_string());
                    }
                }
                Some(state) => record.state = state,
                None if record.accumulated_text.is_empty() => continue,
                None => {
                    normalized_records += 1;
                    record.state = GenerationState::Interrupted;
                    record.interruption_marker = Some(STATE_NOT_RECOVERED_MARKER.to_string());
                }
            }

            if record.state != GenerationState::Interrupted {
                record.interruption_marker = None;
            }
            records.insert(id.clone(), record);
        }

        self.phase = HydrationPhase::Hydrated;
        tracing::info!(
            items = pagination.items.len(),
            records = records.len(),
            normalized_records,
            orphaned_records,
            recovered_keys = recovered_keys.len(),
            "hydrated persisted state"
        );

        LoadedState {
            state: DigestState {
                pagination,
                records,
            },
            recovered_keys,
            normalized_records,
            orphaned_records,
        }
    }

    /// Opens the gate without reading anything; the next save overwrites storage.
    pub fn skip_hydration(&mut self) {
        self.phase = HydrationPhase::Hydrated;
    }

    /// Persists the given keys from `state`.
    ///
    /// Every key is attempted; the first failure is returned.
    pub fn save(&self, state: &DigestState, keys: &[SnapshotKey]) -> Result<(), MirrorError> {
        self.ensure_hydrated()?;

        let mut first_error = None;
        for key in keys {
            if let Err(error) = self.save_key(state, *key) {
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(MirrorError::Store(error)),
            None => Ok(()),
        }
    }

    pub fn clear(&self) -> Result<(), MirrorError> {
        self.ensure_hydrated()?;
        self.store.clear().map_err(MirrorError::from)
    }

    fn ensure_hydrated(&self) -> Result<(), MirrorError> {
        match self.phase {
            HydrationPhase::Hydrated => Ok(()),
            HydrationPhase::NotHydrated => Err(MirrorError::NotHydrated),
        }
    }

    fn save_key(&self, state: &DigestState, key: SnapshotKey) -> Result<(), SnapshotStoreError> {
        let records = &state.records;
        match key {
            SnapshotKey::Items => self.store.write(key, &state.pagination.items),
            SnapshotKey::Pagination => self.store.write(
                key,
                &StoredPagination {
                    cursor: state.pagination.cursor,
                    current_page: state.pagination.current_page,
                },
            ),
            SnapshotKey::GeneratedText => {
                let texts: BTreeMap<&str, &str> = records
                    .values()
                    .map(|record| (record.item_id.as_str(), record.accumulated_text.as_str()))
                    .collect();
                self.store.write(key, &texts)
            }
            SnapshotKey::Visibility => {
                let visibility: BTreeMap<&str, bool> = records
                    .values()
                    .map(|record| (record.item_id.as_str(), record.visible))
                    .collect();
                self.store.write(key, &visibility)
            }
            SnapshotKey::Interruptions => {
                let markers: BTreeMap<&str, &str> = records
                    .values()
                    .filter_map(|record| {
                        record
                            .interruption_marker
                            .as_deref()
                            .map(|marker| (record.item_id.as_str(), marker))
                    })
                    .collect();
                self.store.write(key, &markers)
            }
            SnapshotKey::GenerationStates => {
                let states: BTreeMap<&str, GenerationState> = records
                    .values()
                    .map(|record| (record.item_id.as_str(), record.state))
                    .collect();
                self.store.write(key, &states)
            }
        }
    }

    fn read_or_default<T>(&self, key: SnapshotKey, recovered: &mut Vec<SnapshotKey>) -> T
    where
        T: DeserializeOwned + Default,
    {
        match self.store.read::<T>(key) {
            Ok(value) => value.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(key = %key, %error, "discarding unreadable snapshot");
                recovered.push(key);
                T::default()
            }
        }
    }
}

fn dedupe_items(items: Vec<Item>) -> Vec<Item> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn item(id: &str) -> Item {
        Item {
            id: id.to_string(),
            description: format!("desc {id}"),
            prompt_payload: format!("payload {id}"),
            source_url: format!("https://example.com/{id}"),
        }
    }

    fn mirror(dir: &TempDir) -> PersistenceMirror {
        PersistenceMirror::new(SnapshotStore::open(dir.path()).expect("open store"))
    }

    #[test]
    fn save_is_refused_until_hydrated() {
        let dir = TempDir::new().expect("tempdir");
        let mut mirror = mirror(&dir);

        let error = mirror
            .save(&DigestState::default(), &PAGINATION_KEYS)
            .expect_err("gate is closed");
        assert!(matches!(error, MirrorError::NotHydrated));
        assert!(!mirror.store().contains(SnapshotKey::Items));

        mirror.skip_hydration();
        mirror
            .save(&DigestState::default(), &PAGINATION_KEYS)
            .expect("gate is open");
        assert!(mirror.store().contains(SnapshotKey::Items));
    }

    #[test]
    fn load_on_empty_storage_returns_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let mut mirror = mirror(&dir);

        let loaded = mirror.load();
        assert_eq!(loaded, LoadedState::default());
        assert_eq!(mirror.phase(), HydrationPhase::Hydrated);
    }

    #[test]
    fn interruption_markers_are_only_kept_for_interrupted_records() {
        let dir = TempDir::new().expect("tempdir");
        let mut mirror = mirror(&dir);
        mirror.skip_hydration();

        let mut state = DigestState::default();
        state.pagination.items = vec![item("a")];
        state.pagination.current_page = 1;
        let mut record = GenerationRecord::idle("a");
        record.state = GenerationState::Complete;
        record.accumulated_text = "done".to_string();
        record.interruption_marker = Some("stale".to_string());
        state.records.insert("a".to_string(), record);

        let all: Vec<SnapshotKey> = SnapshotKey::ALL.to_vec();
        mirror.save(&state, &all).expect("save");

        let loaded = mirror.load();
        let restored = &loaded.state.records["a"];
        assert_eq!(restored.state, GenerationState::Complete);
        assert_eq!(restored.interruption_marker, None);
    }
}
