use std::sync::Arc;
use std::time::Duration;

use digest_provider::{GenerationBackend, ItemSource};
use tokio::task::JoinHandle;

use crate::error::DigestError;
use crate::mirror::{LoadedState, PersistenceMirror};
use crate::model::{DigestSnapshot, GenerationState, ItemView};
use crate::pagination::{PageOutcome, PaginationFetcher};
use crate::session::{SessionManager, StartMode};
use crate::store::{lock_unpoisoned, PersistScope, SharedStore, StateStore};

pub use crate::session::IncrementObserver;

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestSettings {
    pub per_page: u32,
    pub page_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchNext {
    Fetched(PageOutcome),
    /// The source reported no further pages; nothing was requested.
    Exhausted,
}

/// Command surface over the state store, sessions and pagination.
///
/// Generation commands spawn their session on the current tokio runtime and
/// return its handle; the handle resolves to the settled state.
pub struct Digest {
    store: SharedStore,
    sessions: SessionManager,
    fetcher: PaginationFetcher,
}

impl Digest {
    pub fn new(
        mirror: PersistenceMirror,
        backend: Arc<dyn GenerationBackend>,
        source: Arc<dyn ItemSource>,
        settings: DigestSettings,
    ) -> Self {
        Self::build(mirror, backend, source, settings, None)
    }

    pub fn with_observer(
        mirror: PersistenceMirror,
        backend: Arc<dyn GenerationBackend>,
        source: Arc<dyn ItemSource>,
        settings: DigestSettings,
        observer: IncrementObserver,
    ) -> Self {
        Self::build(mirror, backend, source, settings, Some(observer))
    }

    fn build(
        mirror: PersistenceMirror,
        backend: Arc<dyn GenerationBackend>,
        source: Arc<dyn ItemSource>,
        settings: DigestSettings,
        observer: Option<IncrementObserver>,
    ) -> Self {
        let store = StateStore::shared(mirror);
        let mut sessions =
            SessionManager::new(Arc::clone(&store), backend, settings.generation_timeout);
        if let Some(observer) = observer {
            sessions = sessions.with_observer(observer);
        }
        let fetcher = PaginationFetcher::new(
            Arc::clone(&store),
            source,
            settings.per_page,
            settings.page_timeout,
        );

        Self {
            store,
            sessions,
            fetcher,
        }
    }

    /// Restores persisted state. Until this or [`Self::skip_hydration`] runs,
    /// network-bound commands fail with [`DigestError::NotHydrated`].
    pub fn hydrate(&self) -> LoadedState {
        self.sessions.abort_all();
        lock_unpoisoned(&self.store).hydrate()
    }

    /// Starts from an empty state; the first save overwrites storage.
    pub fn skip_hydration(&self) {
        lock_unpoisoned(&self.store).skip_hydration();
    }

    pub fn request_generation(
        &self,
        item_id: &str,
    ) -> Result<JoinHandle<GenerationState>, DigestError> {
        self.start(item_id, StartMode::Fresh)
    }

    pub fn resume_generation(
        &self,
        item_id: &str,
    ) -> Result<JoinHandle<GenerationState>, DigestError> {
        self.start(item_id, StartMode::Resume)
    }

    pub fn start(
        &self,
        item_id: &str,
        mode: StartMode,
    ) -> Result<JoinHandle<GenerationState>, DigestError> {
        let session = self.sessions.begin(item_id, mode)?;
        Ok(tokio::spawn(session.run()))
    }

    pub fn abort_generation(&self, item_id: &str) -> Result<(), DigestError> {
        if lock_unpoisoned(&self.store)
            .state()
            .pagination
            .item(item_id)
            .is_none()
        {
            return Err(DigestError::UnknownItem(item_id.to_string()));
        }
        self.sessions.abort(item_id)
    }

    /// Flips whether the item's generated text is shown. Returns the new flag.
    pub fn toggle_visibility(&self, item_id: &str) -> Result<bool, DigestError> {
        let mut store = lock_unpoisoned(&self.store);
        if store.state.pagination.item(item_id).is_none() {
            return Err(DigestError::UnknownItem(item_id.to_string()));
        }
        let record = store
            .state
            .records
            .get_mut(item_id)
            .ok_or_else(|| DigestError::NoGeneration(item_id.to_string()))?;
        record.visible = !record.visible;
        let visible = record.visible;
        store.persist(PersistScope::Records);
        Ok(visible)
    }

    /// Fetches the page after the last one held, or page 1 when nothing is held.
    pub async fn fetch_next_page(&self) -> Result<FetchNext, DigestError> {
        let next = {
            let store = lock_unpoisoned(&self.store);
            let pagination = &store.state().pagination;
            if !pagination.has_fetched() {
                Some(1)
            } else {
                pagination.cursor
            }
        };

        match next {
            Some(page) => {
                let outcome = self.fetcher.fetch_page(page).await?;
                self.abort_pruned(&outcome);
                Ok(FetchNext::Fetched(outcome))
            }
            None => Ok(FetchNext::Exhausted),
        }
    }

    /// Replaces the held items with a fresh first page.
    pub async fn refetch_first_page(&self) -> Result<PageOutcome, DigestError> {
        let outcome = self.fetcher.fetch_page(1).await?;
        self.abort_pruned(&outcome);
        Ok(outcome)
    }

    /// Stops every session and discards all held and persisted state.
    pub fn reset_all(&self) {
        self.sessions.abort_all();
        lock_unpoisoned(&self.store).reset();
        tracing::info!("state reset");
    }

    #[must_use]
    pub fn item_view(&self, item_id: &str) -> Option<ItemView> {
        lock_unpoisoned(&self.store).item_view(item_id)
    }

    #[must_use]
    pub fn snapshot(&self) -> DigestSnapshot {
        lock_unpoisoned(&self.store).snapshot()
    }

    #[must_use]
    pub fn is_generating(&self, item_id: &str) -> bool {
        self.sessions.is_active(item_id)
    }

    fn abort_pruned(&self, outcome: &PageOutcome) {
        for item_id in &outcome.pruned {
            match self.sessions.abort(item_id) {
                Ok(()) | Err(DigestError::NoGeneration(_)) => {}
                Err(error) => {
                    tracing::warn!(item_id = %item_id, %error, "could not stop pruned generation");
                }
            }
        }
    }
}
