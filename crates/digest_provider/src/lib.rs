//! Minimal provider-neutral contract for generation streams and item pages.
//!
//! This crate defines only the request/response shapes and the two traits the
//! digest core consumes. It excludes transport details, wire payloads, and any
//! session or persistence policy.

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

/// Error returned while constructing/configuring a provider before any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInitError {
    message: String,
}

impl ProviderInitError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderInitError {}

impl From<String> for ProviderInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Input for one generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub item_id: String,
    pub prompt_title: String,
    pub prompt_body: String,
    /// Text already produced by an interrupted run, sent so the service can continue it.
    pub partial_output: Option<String>,
}

/// Abnormal end of an already-open stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamFault {
    /// The connection dropped while the body was being received.
    #[error("connection lost: {0}")]
    Transport(String),
    /// The body arrived but could not be read or decoded.
    #[error("stream read failed: {0}")]
    Read(String),
    /// The service itself reported an error inside the stream.
    #[error("upstream error: {0}")]
    Upstream(String),
}

/// Lazy, finite sequence of text increments. Not restartable.
pub type IncrementStream = BoxStream<'static, Result<String, StreamFault>>;

/// Failure to obtain a page or to open a generation stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request was aborted")]
    Aborted,
}

impl UpstreamError {
    /// Transient failures that leave any partial output worth resuming.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Aborted)
    }
}

/// One page request against the item source. `page` starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

/// Unvalidated page as delivered by the item source.
///
/// Items stay raw JSON so the caller can validate and drop them one by one.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub items: Vec<Value>,
    pub next_page: Option<u32>,
    pub current_page: u32,
    pub per_page: u32,
}

/// Immutable metadata describing a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub endpoint: Option<String>,
}

/// Opens generation streams.
#[async_trait]
pub trait GenerationBackend: Send + Sync + 'static {
    fn profile(&self) -> ProviderProfile;

    /// Submits the prompt and returns the stream of text increments.
    ///
    /// Dropping the returned stream must close the underlying source.
    async fn open(&self, request: GenerationRequest) -> Result<IncrementStream, UpstreamError>;
}

/// Serves cursor-paginated items.
#[async_trait]
pub trait ItemSource: Send + Sync + 'static {
    async fn fetch_page(&self, request: PageRequest) -> Result<RawPage, UpstreamError>;
}
