//! Deterministic mock implementation of the `digest_provider` contract.
//!
//! This crate contains no transport logic. It serves scripted generation
//! streams and an in-memory item catalog for local runs and tests.

use std::collections::VecDeque;
use std::future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use digest_provider::{
    GenerationBackend, GenerationRequest, IncrementStream, ItemSource, PageRequest,
    ProviderProfile, RawPage, StreamFault, UpstreamError,
};
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// One step of a scripted generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Emit(String),
    Delay(Duration),
    /// Yields the fault and ends the stream.
    Fault(StreamFault),
    /// Never yields again; only a deadline or cancellation ends the stream.
    Hang,
}

/// Scripted behavior for a single `open` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationScript {
    open_delay: Duration,
    outcome: Result<Vec<ScriptStep>, UpstreamError>,
}

impl GenerationScript {
    /// Emits each chunk in order, then closes normally.
    #[must_use]
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::steps(chunks.into_iter().map(|chunk| ScriptStep::Emit(chunk.into())))
    }

    #[must_use]
    pub fn steps(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            open_delay: Duration::ZERO,
            outcome: Ok(steps.into_iter().collect()),
        }
    }

    /// Splits `text` into word-sized increments separated by `delay`.
    #[must_use]
    pub fn tokenized(text: &str, delay: Duration) -> Self {
        let mut steps = Vec::new();
        let mut pending = String::new();
        for ch in text.chars() {
            pending.push(ch);
            if matches!(ch, ' ' | '\n') {
                steps.push(ScriptStep::Emit(std::mem::take(&mut pending)));
                steps.push(ScriptStep::Delay(delay));
            }
        }
        if !pending.is_empty() {
            steps.push(ScriptStep::Emit(pending));
        }
        Self::steps(steps)
    }

    /// Fails before any increment is produced.
    #[must_use]
    pub fn open_error(error: UpstreamError) -> Self {
        Self {
            open_delay: Duration::ZERO,
            outcome: Err(error),
        }
    }

    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    #[must_use]
    pub fn then(mut self, step: ScriptStep) -> Self {
        if let Ok(steps) = self.outcome.as_mut() {
            steps.push(step);
        }
        self
    }

    #[must_use]
    pub fn then_fault(self, fault: StreamFault) -> Self {
        self.then(ScriptStep::Fault(fault))
    }

    #[must_use]
    pub fn then_hang(self) -> Self {
        self.then(ScriptStep::Hang)
    }
}

/// Generation backend that replays queued scripts in call order.
///
/// When the queue is empty the fallback script is replayed; without a fallback
/// the call fails with `InvalidResponse`.
#[derive(Debug)]
pub struct MockBackend {
    scripts: Mutex<VecDeque<GenerationScript>>,
    fallback: Option<GenerationScript>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockBackend {
    #[must_use]
    pub fn scripted(scripts: Vec<GenerationScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, script: GenerationScript) -> Self {
        self.fallback = Some(script);
        self
    }

    pub fn push_script(&self, script: GenerationScript) {
        lock_unpoisoned(&self.scripts).push_back(script);
    }

    /// Requests received so far, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    const TOKEN_DELAY_MS: u64 = 40;
}

impl Default for MockBackend {
    fn default() -> Self {
        let summary = "## Summary\n\
            This change reworks the retry loop so a dropped connection keeps the \
            partial response instead of discarding it.\n\n\
            ## Risk\n\
            - Low: the new path is only taken after a transport failure.\n\
            - Watch the persisted snapshot size for very long outputs.\n\n\
            ## Suggested review focus\n\
            1. Ordering of appends across resumed sessions.\n\
            2. Marker text shown to the user after a timeout.\n";

        Self::scripted(Vec::new()).with_fallback(GenerationScript::tokenized(
            summary,
            Duration::from_millis(Self::TOKEN_DELAY_MS),
        ))
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            endpoint: None,
        }
    }

    async fn open(&self, request: GenerationRequest) -> Result<IncrementStream, UpstreamError> {
        lock_unpoisoned(&self.requests).push(request);

        let script = lock_unpoisoned(&self.scripts)
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| {
                UpstreamError::InvalidResponse("no scripted generation left".to_string())
            })?;

        if !script.open_delay.is_zero() {
            tokio::time::sleep(script.open_delay).await;
        }

        let steps: VecDeque<ScriptStep> = script.outcome?.into();
        Ok(replay(steps))
    }
}

fn replay(steps: VecDeque<ScriptStep>) -> IncrementStream {
    stream::unfold(steps, |mut steps| async move {
        loop {
            match steps.pop_front()? {
                ScriptStep::Emit(text) => return Some((Ok(text), steps)),
                ScriptStep::Delay(delay) => tokio::time::sleep(delay).await,
                ScriptStep::Fault(fault) => {
                    steps.clear();
                    return Some((Err(fault), steps));
                }
                ScriptStep::Hang => future::pending::<()>().await,
            }
        }
    })
    .boxed()
}

/// Scripted response for a single `fetch_page` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PageScript {
    pub delay: Duration,
    pub result: Result<RawPage, UpstreamError>,
}

impl PageScript {
    #[must_use]
    pub fn page(page: RawPage) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(page),
        }
    }

    #[must_use]
    pub fn error(error: UpstreamError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Item source backed by an in-memory catalog.
///
/// Queued page scripts take precedence over the catalog, one per call.
#[derive(Debug)]
pub struct MockItemSource {
    catalog: Vec<Value>,
    scripted: Mutex<VecDeque<PageScript>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl MockItemSource {
    #[must_use]
    pub fn with_catalog(catalog: Vec<Value>) -> Self {
        Self {
            catalog,
            scripted: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn scripted(pages: Vec<PageScript>) -> Self {
        let source = Self::with_catalog(Vec::new());
        *lock_unpoisoned(&source.scripted) = pages.into();
        source
    }

    pub fn push_page(&self, script: PageScript) {
        lock_unpoisoned(&self.scripted).push_back(script);
    }

    #[must_use]
    pub fn requests(&self) -> Vec<PageRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    fn page_from_catalog(&self, request: PageRequest) -> RawPage {
        let per_page = request.per_page.max(1) as usize;
        let start = (request.page.saturating_sub(1) as usize).saturating_mul(per_page);
        let items: Vec<Value> = self.catalog.iter().skip(start).take(per_page).cloned().collect();
        let next_page = (start + per_page < self.catalog.len()).then(|| request.page + 1);

        RawPage {
            items,
            next_page,
            current_page: request.page,
            per_page: request.per_page,
        }
    }
}

impl Default for MockItemSource {
    fn default() -> Self {
        Self::with_catalog((1..=25).map(demo_item).collect())
    }
}

#[async_trait]
impl ItemSource for MockItemSource {
    async fn fetch_page(&self, request: PageRequest) -> Result<RawPage, UpstreamError> {
        lock_unpoisoned(&self.requests).push(request);

        let scripted = lock_unpoisoned(&self.scripted).pop_front();
        match scripted {
            Some(script) => {
                if !script.delay.is_zero() {
                    tokio::time::sleep(script.delay).await;
                }
                script.result
            }
            None => Ok(self.page_from_catalog(request)),
        }
    }
}

/// Item JSON in the shape served by the item source.
#[must_use]
pub fn item_json(id: &str, description: &str, prompt_payload: &str) -> Value {
    json!({
        "id": id,
        "description": description,
        "promptPayload": prompt_payload,
        "url": format!("https://example.com/pulls/{id}"),
    })
}

fn demo_item(index: u32) -> Value {
    item_json(
        &format!("pr-{index}"),
        &format!("Demo pull request #{index}"),
        &format!(
            "diff --git a/src/module_{index}.rs b/src/module_{index}.rs\n\
             @@ -1,3 +1,4 @@\n fn handler() {{\n+    retry_with_backoff();\n }}\n"
        ),
    )
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
