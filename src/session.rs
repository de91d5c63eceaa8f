//! Per-item generation lifecycle.
//!
//! [`SessionManager::begin`] validates and commits the transition into
//! `Generating` synchronously, so a rejected start never touches the network.
//! The returned [`GenerationSession`] then owns one stream consumption and
//! settles the record into `Complete`, `Interrupted` or `Failed`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use digest_provider::{GenerationBackend, GenerationRequest, UpstreamError};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::accumulator::{consume, IncrementReader, StreamOutcome};
use crate::error::DigestError;
use crate::model::{GenerationRecord, GenerationState, SessionId};
use crate::store::{lock_unpoisoned, PersistScope, SharedStore};

/// Prompt bodies are cut to this many Unicode scalar values before sending.
pub const MAX_PROMPT_BODY_CHARS: usize = 12_000;

/// Streamed text is written to storage once this many bytes are pending, at
/// the end of a line, and always when the session settles.
pub const TEXT_FLUSH_BYTES: usize = 1024;

const EMPTY_COMPLETION_DIAGNOSTIC: &str =
    "Generation finished without producing any text. Restart to try again.";

/// Called after every appended increment with `(item_id, increment)`.
pub type IncrementObserver = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Clears any previous text and starts over.
    Fresh,
    /// Keeps the text of an interrupted generation and continues it.
    Resume,
}

struct ActiveSession {
    session_id: SessionId,
    cancel: CancellationToken,
}

type ActiveSessions = Arc<Mutex<HashMap<String, ActiveSession>>>;

pub struct SessionManager {
    store: SharedStore,
    backend: Arc<dyn GenerationBackend>,
    generation_timeout: Duration,
    next_session_id: AtomicU64,
    active: ActiveSessions,
    observer: Option<IncrementObserver>,
}

impl SessionManager {
    pub fn new(
        store: SharedStore,
        backend: Arc<dyn GenerationBackend>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            generation_timeout,
            next_session_id: AtomicU64::new(1),
            active: Arc::new(Mutex::new(HashMap::new())),
            observer: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: IncrementObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Moves the item's record into `Generating` and prepares its session.
    pub fn begin(
        &self,
        item_id: &str,
        mode: StartMode,
    ) -> Result<GenerationSession, DigestError> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);

        let request = {
            let mut store = lock_unpoisoned(&self.store);
            store.ensure_hydrated()?;
            let item = store
                .state
                .pagination
                .item(item_id)
                .cloned()
                .ok_or_else(|| DigestError::UnknownItem(item_id.to_string()))?;

            if item.prompt_payload.trim().is_empty() {
                return Err(DigestError::invalid_input(format!(
                    "item '{item_id}' has an empty prompt payload"
                )));
            }

            let current = store.state.records.get(item_id).map(|record| record.state);
            if current == Some(GenerationState::Generating) {
                return Err(DigestError::SessionBusy(item_id.to_string()));
            }
            if mode == StartMode::Resume && current != Some(GenerationState::Interrupted) {
                return Err(DigestError::invalid_input(format!(
                    "only an interrupted generation can be resumed; '{item_id}' is {}",
                    current.unwrap_or(GenerationState::Idle).as_str()
                )));
            }

            let record = store
                .state
                .records
                .entry(item_id.to_string())
                .or_insert_with(|| GenerationRecord::idle(item_id));
            if mode == StartMode::Fresh {
                record.accumulated_text.clear();
                record.visible = true;
            }
            record.state = GenerationState::Generating;
            record.interruption_marker = None;
            record.session = Some(session_id);

            let partial_output = match mode {
                StartMode::Resume if !record.accumulated_text.is_empty() => {
                    Some(record.accumulated_text.clone())
                }
                _ => None,
            };
            store.persist(PersistScope::Records);

            GenerationRequest {
                item_id: item.id,
                prompt_title: item.description,
                prompt_body: truncate_chars(&item.prompt_payload, MAX_PROMPT_BODY_CHARS)
                    .to_string(),
                partial_output,
            }
        };

        let cancel = CancellationToken::new();
        lock_unpoisoned(&self.active).insert(
            item_id.to_string(),
            ActiveSession {
                session_id,
                cancel: cancel.clone(),
            },
        );
        tracing::info!(item_id, session_id, ?mode, "generation started");

        Ok(GenerationSession {
            item_id: item_id.to_string(),
            session_id,
            request,
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            active: Arc::clone(&self.active),
            cancel,
            timeout: self.generation_timeout,
            observer: self.observer.clone(),
            text_flush: TextFlush::default(),
        })
    }

    /// Signals the item's running session to stop. The session settles itself.
    pub fn abort(&self, item_id: &str) -> Result<(), DigestError> {
        match lock_unpoisoned(&self.active).get(item_id) {
            Some(active) => {
                tracing::info!(item_id, session_id = active.session_id, "aborting generation");
                active.cancel.cancel();
                Ok(())
            }
            None => Err(DigestError::NoGeneration(item_id.to_string())),
        }
    }

    pub fn abort_all(&self) {
        let mut active = lock_unpoisoned(&self.active);
        for (_, session) in active.drain() {
            session.cancel.cancel();
        }
    }

    #[must_use]
    pub fn is_active(&self, item_id: &str) -> bool {
        lock_unpoisoned(&self.active).contains_key(item_id)
    }
}

/// One stream consumption for one item.
pub struct GenerationSession {
    item_id: String,
    session_id: SessionId,
    request: GenerationRequest,
    backend: Arc<dyn GenerationBackend>,
    store: SharedStore,
    active: ActiveSessions,
    cancel: CancellationToken,
    timeout: Duration,
    observer: Option<IncrementObserver>,
    text_flush: TextFlush,
}

impl GenerationSession {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    /// Opens the stream, applies every increment and settles the record.
    ///
    /// Opening and reading share one deadline.
    pub async fn run(mut self) -> GenerationState {
        let deadline = Instant::now() + self.timeout;

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UpstreamError::Aborted),
            opened = timeout_at(deadline, self.backend.open(self.request.clone())) => {
                opened.unwrap_or(Err(UpstreamError::Timeout))
            }
        };

        let ending = match opened {
            Ok(source) => {
                let mut reader = IncrementReader::new(source, deadline, self.cancel.clone());
                let consumed = consume(&mut reader, |text| self.append(text)).await;
                tracing::debug!(
                    item_id = %self.item_id,
                    appended_chars = consumed.appended_chars,
                    outcome = ?consumed.outcome,
                    "stream finished"
                );
                Ending::from(consumed.outcome)
            }
            Err(error) => Ending::from(error),
        };

        let state = self.settle(ending);
        self.deregister();
        state
    }

    fn append(&mut self, text: &str) {
        {
            let mut store = lock_unpoisoned(&self.store);
            let Some(record) = store.state.records.get_mut(&self.item_id) else {
                return;
            };
            if record.session != Some(self.session_id) {
                return;
            }
            record.accumulated_text.push_str(text);
            if self.text_flush.record(text) {
                store.persist(PersistScope::Text);
            }
        }

        if let Some(observer) = &self.observer {
            observer(&self.item_id, text);
        }
    }

    fn settle(&self, ending: Ending) -> GenerationState {
        let mut store = lock_unpoisoned(&self.store);
        let Some(record) = store.state.records.get_mut(&self.item_id) else {
            tracing::debug!(item_id = %self.item_id, "record removed while generating");
            return GenerationState::Idle;
        };
        if record.session != Some(self.session_id) {
            return record.state;
        }

        record.session = None;
        record.interruption_marker = None;
        let has_text = !record.accumulated_text.is_empty();
        match ending {
            Ending::Completed if has_text => record.state = GenerationState::Complete,
            Ending::Completed => {
                record.state = GenerationState::Failed;
                record.accumulated_text = EMPTY_COMPLETION_DIAGNOSTIC.to_string();
            }
            Ending::Interrupted(cause) if has_text => {
                record.state = GenerationState::Interrupted;
                record.interruption_marker = Some(cause.marker());
            }
            Ending::Interrupted(cause) => {
                record.state = GenerationState::Failed;
                record.accumulated_text = cause.diagnostic();
            }
            Ending::Fatal(diagnostic) => {
                record.state = GenerationState::Failed;
                record.accumulated_text = diagnostic;
            }
        }

        let state = record.state;
        store.persist(PersistScope::Records);
        tracing::info!(
            item_id = %self.item_id,
            session_id = self.session_id,
            outcome = state.as_str(),
            "generation settled"
        );
        state
    }

    fn deregister(&self) {
        let mut active = lock_unpoisoned(&self.active);
        if active
            .get(&self.item_id)
            .is_some_and(|session| session.session_id == self.session_id)
        {
            active.remove(&self.item_id);
        }
    }
}

/// Decides when buffered increments are written out.
#[derive(Debug, Default)]
struct TextFlush {
    pending_bytes: usize,
}

impl TextFlush {
    /// Notes an appended increment; true when the text should be persisted now.
    fn record(&mut self, increment: &str) -> bool {
        self.pending_bytes += increment.len();
        if self.pending_bytes >= TEXT_FLUSH_BYTES || increment.contains('\n') {
            self.pending_bytes = 0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Ending {
    Completed,
    Interrupted(Interruption),
    Fatal(String),
}

/// Recoverable causes; partial text survives them.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Interruption {
    TimedOut,
    ConnectionLost(String),
    ReadFailed(String),
    Stopped,
}

impl Interruption {
    fn marker(&self) -> String {
        match self {
            Self::TimedOut => {
                "Generation timed out before it finished. Resume to continue from where it stopped."
                    .to_string()
            }
            Self::ConnectionLost(detail) => format!(
                "Connection lost while generating ({detail}). Resume to continue from where it stopped."
            ),
            Self::ReadFailed(detail) => format!(
                "The response stream could not be read ({detail}). Resume to continue from where it stopped."
            ),
            Self::Stopped => {
                "Generation was stopped before it finished. Resume to continue from where it stopped."
                    .to_string()
            }
        }
    }

    fn diagnostic(&self) -> String {
        match self {
            Self::TimedOut => "Generation timed out before any text arrived.".to_string(),
            Self::ConnectionLost(detail) => {
                format!("Connection lost before any text arrived: {detail}")
            }
            Self::ReadFailed(detail) => {
                format!("The response stream could not be read: {detail}")
            }
            Self::Stopped => "Generation was stopped before any text arrived.".to_string(),
        }
    }
}

impl From<StreamOutcome> for Ending {
    fn from(outcome: StreamOutcome) -> Self {
        match outcome {
            StreamOutcome::CompletedOk => Self::Completed,
            StreamOutcome::TimedOut => Self::Interrupted(Interruption::TimedOut),
            StreamOutcome::TransportError(detail) => {
                Self::Interrupted(Interruption::ConnectionLost(detail))
            }
            StreamOutcome::StreamReadError(detail) => {
                Self::Interrupted(Interruption::ReadFailed(detail))
            }
            StreamOutcome::Aborted => Self::Interrupted(Interruption::Stopped),
            StreamOutcome::UpstreamError(message) => Self::Fatal(format!(
                "The generation service reported an error: {message}"
            )),
        }
    }
}

impl From<UpstreamError> for Ending {
    fn from(error: UpstreamError) -> Self {
        match error {
            UpstreamError::Timeout => Self::Interrupted(Interruption::TimedOut),
            UpstreamError::Network(detail) => {
                Self::Interrupted(Interruption::ConnectionLost(detail))
            }
            UpstreamError::Aborted => Self::Interrupted(Interruption::Stopped),
            other => Self::Fatal(format!("Generation failed: {other}")),
        }
    }
}

/// Longest prefix of `text` with at most `max_chars` Unicode scalar values.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
