use std::sync::{Arc, Mutex, MutexGuard};

use snapshot_store::SnapshotKey;

use crate::error::DigestError;
use crate::mirror::{
    HydrationPhase, LoadedState, MirrorError, PersistenceMirror, PAGINATION_KEYS, RECORD_KEYS,
};
use crate::model::{DigestSnapshot, DigestState, ItemView};

pub type SharedStore = Arc<Mutex<StateStore>>;

/// Which slice of state a committed change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistScope {
    /// Items and cursor.
    Pagination,
    /// Every per-item record key.
    Records,
    /// Only accumulated text; used once per increment.
    Text,
    All,
}

impl PersistScope {
    fn keys(self) -> &'static [SnapshotKey] {
        match self {
            Self::Pagination => &PAGINATION_KEYS,
            Self::Records => &RECORD_KEYS,
            Self::Text => &[SnapshotKey::GeneratedText],
            Self::All => &SnapshotKey::ALL,
        }
    }
}

/// In-memory state plus its durable mirror.
#[derive(Debug)]
pub struct StateStore {
    pub(crate) state: DigestState,
    mirror: PersistenceMirror,
    persist_failures: u64,
    epoch: u64,
}

impl StateStore {
    #[must_use]
    pub fn new(mirror: PersistenceMirror) -> Self {
        Self {
            state: DigestState::default(),
            mirror,
            persist_failures: 0,
            epoch: 0,
        }
    }

    #[must_use]
    pub fn shared(mirror: PersistenceMirror) -> SharedStore {
        Arc::new(Mutex::new(Self::new(mirror)))
    }

    #[must_use]
    pub fn state(&self) -> &DigestState {
        &self.state
    }

    /// Bumped whenever held state is discarded wholesale.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn persistence_degraded(&self) -> bool {
        self.persist_failures > 0
    }

    #[must_use]
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures
    }

    /// Replaces in-memory state with whatever storage holds.
    pub fn hydrate(&mut self) -> LoadedState {
        let loaded = self.mirror.load();
        self.state = loaded.state.clone();
        self.epoch += 1;
        loaded
    }

    pub fn skip_hydration(&mut self) {
        self.mirror.skip_hydration();
    }

    /// Network-bound commands wait until storage was restored or skipped.
    pub fn ensure_hydrated(&self) -> Result<(), DigestError> {
        match self.mirror.phase() {
            HydrationPhase::Hydrated => Ok(()),
            HydrationPhase::NotHydrated => Err(DigestError::NotHydrated),
        }
    }

    /// Mirrors a committed change. Failures never propagate to the caller.
    pub fn persist(&mut self, scope: PersistScope) {
        match self.mirror.save(&self.state, scope.keys()) {
            Ok(()) => {}
            Err(MirrorError::NotHydrated) => {
                tracing::debug!(?scope, "skipping persistence before hydration");
            }
            Err(error) => {
                self.persist_failures += 1;
                tracing::warn!(
                    ?scope,
                    %error,
                    failures = self.persist_failures,
                    "persisting state failed; continuing in memory"
                );
            }
        }
    }

    /// Drops all held state and clears storage.
    pub fn reset(&mut self) {
        self.state = DigestState::default();
        self.epoch += 1;
        match self.mirror.clear() {
            Ok(()) => {}
            Err(MirrorError::NotHydrated) => {
                tracing::debug!("skipping storage clear before hydration");
            }
            Err(error) => {
                self.persist_failures += 1;
                tracing::warn!(%error, "clearing persisted state failed");
            }
        }
    }

    #[must_use]
    pub fn item_view(&self, item_id: &str) -> Option<ItemView> {
        let item = self.state.pagination.item(item_id)?;
        Some(ItemView::new(item, self.state.records.get(item_id)))
    }

    #[must_use]
    pub fn snapshot(&self) -> DigestSnapshot {
        let pagination = &self.state.pagination;
        DigestSnapshot {
            items: pagination
                .items
                .iter()
                .map(|item| ItemView::new(item, self.state.records.get(&item.id)))
                .collect(),
            current_page: pagination.current_page,
            cursor: pagination.cursor,
            persistence_degraded: self.persistence_degraded(),
            persist_failures: self.persist_failures,
        }
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use snapshot_store::SnapshotStore;
    use tempfile::TempDir;

    use super::*;
    use crate::model::Item;

    fn item(id: &str) -> Item {
        Item {
            id: id.to_string(),
            description: "desc".to_string(),
            prompt_payload: "payload".to_string(),
            source_url: "https://example.com".to_string(),
        }
    }

    #[test]
    fn quota_failures_degrade_persistence_without_losing_memory_state() {
        let dir = TempDir::new().expect("tempdir");
        let snapshots = SnapshotStore::open(dir.path())
            .expect("open")
            .with_quota(64);
        let mut store = StateStore::new(PersistenceMirror::new(snapshots));
        store.skip_hydration();

        store.state.pagination.items = (0..20).map(|i| item(&format!("pr-{i}"))).collect();
        store.persist(PersistScope::Pagination);

        assert!(store.persistence_degraded());
        assert_eq!(store.snapshot().items.len(), 20);
        assert!(store.snapshot().persistence_degraded);
    }

    #[test]
    fn writes_before_hydration_are_not_counted_as_failures() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StateStore::new(PersistenceMirror::new(
            SnapshotStore::open(dir.path()).expect("open"),
        ));

        store.state.pagination.items = vec![item("pr-1")];
        store.persist(PersistScope::All);

        assert!(!store.persistence_degraded());
        assert!(!dir.path().join("items.json").exists());
    }

    #[test]
    fn network_commands_wait_for_hydration_or_skip() {
        let dir = TempDir::new().expect("tempdir");
        let mut restored = StateStore::new(PersistenceMirror::new(
            SnapshotStore::open(dir.path()).expect("open"),
        ));
        assert_eq!(restored.ensure_hydrated(), Err(DigestError::NotHydrated));
        restored.hydrate();
        assert_eq!(restored.ensure_hydrated(), Ok(()));

        let mut skipped = StateStore::new(PersistenceMirror::new(
            SnapshotStore::open(dir.path()).expect("open"),
        ));
        skipped.skip_hydration();
        assert_eq!(skipped.ensure_hydrated(), Ok(()));
    }

    #[test]
    fn reset_bumps_epoch_and_clears_state() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StateStore::new(PersistenceMirror::new(
            SnapshotStore::open(dir.path()).expect("open"),
        ));
        store.skip_hydration();
        store.state.pagination.items = vec![item("pr-1")];
        store.persist(PersistScope::All);
        let before = store.epoch();

        store.reset();

        assert!(store.epoch() > before);
        assert!(store.state().pagination.items.is_empty());
        assert!(!dir.path().join("items.json").exists());
    }
}
