use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifies one generation session; only the current session may write to a record.
pub type SessionId = u64;

/// One unit of work as served by the item source. Immutable once held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub description: String,
    pub prompt_payload: String,
    pub source_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Idle,
    Generating,
    Complete,
    Interrupted,
    Failed,
}

impl GenerationState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Complete => "complete",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }
}

/// Per-item generation progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRecord {
    pub item_id: String,
    pub state: GenerationState,
    pub accumulated_text: String,
    pub visible: bool,
    pub interruption_marker: Option<String>,
    /// Session currently allowed to append. Never persisted.
    pub session: Option<SessionId>,
}

impl GenerationRecord {
    #[must_use]
    pub fn idle(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            state: GenerationState::Idle,
            accumulated_text: String::new(),
            visible: true,
            interruption_marker: None,
            session: None,
        }
    }
}

/// Held items plus the continuation cursor.
///
/// `current_page == 0` means nothing was fetched yet; `cursor == None` after a
/// fetch means the source has no further pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationState {
    pub cursor: Option<u32>,
    pub current_page: u32,
    pub items: Vec<Item>,
}

impl PaginationState {
    #[must_use]
    pub fn item(&self, item_id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == item_id)
    }

    #[must_use]
    pub fn has_fetched(&self) -> bool {
        self.current_page > 0
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.has_fetched() && self.cursor.is_none()
    }
}

/// Everything the store holds and the mirror persists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestState {
    pub pagination: PaginationState,
    pub records: BTreeMap<String, GenerationRecord>,
}

/// Read-only per-item view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    pub item: Item,
    pub state: GenerationState,
    pub accumulated_text: String,
    pub visible: bool,
    pub interruption_marker: Option<String>,
}

impl ItemView {
    pub(crate) fn new(item: &Item, record: Option<&GenerationRecord>) -> Self {
        match record {
            Some(record) => Self {
                item: item.clone(),
                state: record.state,
                accumulated_text: record.accumulated_text.clone(),
                visible: record.visible,
                interruption_marker: record.interruption_marker.clone(),
            },
            None => Self {
                item: item.clone(),
                state: GenerationState::Idle,
                accumulated_text: String::new(),
                visible: false,
                interruption_marker: None,
            },
        }
    }

    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.state == GenerationState::Interrupted
    }

    #[must_use]
    pub fn can_start(&self) -> bool {
        self.state != GenerationState::Generating
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSnapshot {
    pub items: Vec<ItemView>,
    pub current_page: u32,
    pub cursor: Option<u32>,
    pub persistence_degraded: bool,
    pub persist_failures: u64,
}

impl DigestSnapshot {
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.current_page == 0 || self.cursor.is_some()
    }
}
