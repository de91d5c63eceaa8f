use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use digest_provider::{ItemSource, PageRequest};
use serde_json::Value;

use crate::error::DigestError;
use crate::model::{Item, PaginationState};
use crate::store::{lock_unpoisoned, PersistScope, SharedStore};

/// Result of one applied page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    /// Valid items delivered by this page, before de-duplication.
    pub items: Vec<Item>,
    /// Items that were actually new to the held sequence.
    pub added: usize,
    /// Raw items rejected by validation.
    pub dropped: usize,
    pub current_page: u32,
    pub next_cursor: Option<u32>,
    /// Items whose records were discarded because a page-1 refetch no longer holds them.
    pub pruned: Vec<String>,
}

pub struct PaginationFetcher {
    store: SharedStore,
    source: Arc<dyn ItemSource>,
    per_page: u32,
    page_timeout: Duration,
    in_flight: AtomicBool,
}

impl PaginationFetcher {
    pub fn new(
        store: SharedStore,
        source: Arc<dyn ItemSource>,
        per_page: u32,
        page_timeout: Duration,
    ) -> Self {
        Self {
            store,
            source,
            per_page: per_page.max(1),
            page_timeout,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Fetches, validates and applies page `page`.
    ///
    /// State is untouched unless the whole fetch succeeds.
    pub async fn fetch_page(&self, page: u32) -> Result<PageOutcome, DigestError> {
        if page == 0 {
            return Err(DigestError::invalid_input("pages are numbered from 1"));
        }
        let _guard = InFlightGuard::acquire(&self.in_flight).ok_or(DigestError::FetchInFlight)?;

        let epoch = {
            let store = lock_unpoisoned(&self.store);
            store.ensure_hydrated()?;
            store.epoch()
        };
        let request = PageRequest {
            page,
            per_page: self.per_page,
        };
        let raw = tokio::time::timeout(self.page_timeout, self.source.fetch_page(request))
            .await
            .map_err(|_elapsed| DigestError::Timeout)?
            .map_err(|error| {
                tracing::warn!(page, %error, "page fetch failed");
                DigestError::from(error)
            })?;

        let mut dropped = 0;
        let items: Vec<Item> = raw
            .items
            .iter()
            .filter_map(|value| {
                let item = parse_item(value);
                if item.is_none() {
                    dropped += 1;
                }
                item
            })
            .collect();

        let next_cursor = match raw.next_page {
            Some(next) if next <= page => {
                tracing::warn!(page, next, "ignoring non-advancing page cursor");
                None
            }
            other => other,
        };

        let mut store = lock_unpoisoned(&self.store);
        if store.epoch() != epoch {
            tracing::debug!(page, "discarding page fetched before a reset");
            return Err(DigestError::Aborted);
        }

        let added = apply_page(&mut store.state.pagination, page, &items);
        store.state.pagination.cursor = next_cursor;
        store.state.pagination.current_page = page;

        let mut pruned = Vec::new();
        if page == 1 {
            let state = &mut store.state;
            let held: HashSet<&str> = state
                .pagination
                .items
                .iter()
                .map(|item| item.id.as_str())
                .collect();
            pruned = state
                .records
                .keys()
                .filter(|id| !held.contains(id.as_str()))
                .cloned()
                .collect();
            for id in &pruned {
                state.records.remove(id);
            }
        }

        store.persist(PersistScope::Pagination);
        if !pruned.is_empty() {
            store.persist(PersistScope::Records);
        }
        tracing::info!(page, added, dropped, next = ?next_cursor, "page applied");

        Ok(PageOutcome {
            items,
            added,
            dropped,
            current_page: page,
            next_cursor,
            pruned,
        })
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Page 1 replaces the held sequence; later pages append, keeping the first
/// occurrence of every id. Returns how many items were newly held.
pub fn apply_page(pagination: &mut PaginationState, page: u32, items: &[Item]) -> usize {
    if page == 1 {
        pagination.items.clear();
    }

    let mut seen: HashSet<String> = pagination.items.iter().map(|item| item.id.clone()).collect();
    let before = pagination.items.len();
    for item in items {
        if seen.insert(item.id.clone()) {
            pagination.items.push(item.clone());
        }
    }
    pagination.items.len() - before
}

/// Validates one raw item field by field.
pub fn parse_item(value: &Value) -> Option<Item> {
    let field = |name: &str| value.get(name).and_then(Value::as_str);

    let id = field("id")?;
    if id.trim().is_empty() {
        return None;
    }

    Some(Item {
        id: id.to_string(),
        description: field("description")?.to_string(),
        prompt_payload: field("promptPayload")?.to_string(),
        source_url: field("url")?.to_string(),
    })
}

struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
