//! HTTP-backed implementation of the `digest_provider` contract.
//!
//! This adapter translates `upstream_api` transport results into the
//! provider-neutral increment stream and error taxonomy consumed by the core.

use std::time::Duration;

use async_trait::async_trait;
use digest_provider::{
    GenerationBackend, GenerationRequest, IncrementStream, ItemSource, PageRequest,
    ProviderInitError, ProviderProfile, RawPage, StreamFault, UpstreamError,
};
use futures_util::stream::{self, Stream, StreamExt};
use upstream_api::{
    GenerateRequest, PageQuery, TextStreamEvent, UpstreamApiError, UpstreamClient, UpstreamConfig,
};

/// Stable provider identifier used by startup selection.
pub const HTTP_PROVIDER_ID: &str = "http";

/// Runtime configuration for the HTTP provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpProviderConfig {
    pub generation_base_url: String,
    pub items_base_url: String,
    pub api_token: Option<String>,
    pub connect_timeout: Option<Duration>,
}

impl HttpProviderConfig {
    #[must_use]
    pub fn new(generation_base_url: impl Into<String>, items_base_url: impl Into<String>) -> Self {
        Self {
            generation_base_url: generation_base_url.into(),
            items_base_url: items_base_url.into(),
            api_token: None,
            connect_timeout: None,
        }
    }

    #[must_use]
    pub fn with_api_token(mut self, api_token: impl Into<String>) -> Self {
        self.api_token = Some(api_token.into());
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    fn upstream_config(&self, base_url: &str) -> UpstreamConfig {
        // Whole-request deadlines are enforced by the caller; a client-level
        // timeout would cut long generations short.
        let mut config = UpstreamConfig::new(base_url);
        if let Some(token) = &self.api_token {
            config = config.with_api_token(token.clone());
        }
        if let Some(timeout) = self.connect_timeout {
            config = config.with_connect_timeout(timeout);
        }
        config
    }
}

/// `GenerationBackend` + `ItemSource` adapter backed by `upstream_api`.
#[derive(Debug)]
pub struct HttpProvider {
    generation: UpstreamClient,
    items: UpstreamClient,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderInitError> {
        let generation = UpstreamClient::new(config.upstream_config(&config.generation_base_url))
            .map_err(map_init_error)?;
        let items = UpstreamClient::new(config.upstream_config(&config.items_base_url))
            .map_err(map_init_error)?;

        Ok(Self { generation, items })
    }
}

#[async_trait]
impl GenerationBackend for HttpProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: HTTP_PROVIDER_ID.to_string(),
            endpoint: Some(self.generation.generation_endpoint().to_string()),
        }
    }

    async fn open(&self, request: GenerationRequest) -> Result<IncrementStream, UpstreamError> {
        tracing::debug!(
            item_id = %request.item_id,
            endpoint = self.generation.generation_endpoint(),
            resume = request.partial_output.is_some(),
            "opening generation stream"
        );

        let payload = GenerateRequest {
            prompt_title: request.prompt_title,
            prompt_body: request.prompt_body,
            partial_output: request.partial_output,
        };
        let events = self
            .generation
            .open_generation(&payload)
            .await
            .map_err(map_open_error)?;

        Ok(into_increments(events))
    }
}

#[async_trait]
impl ItemSource for HttpProvider {
    async fn fetch_page(&self, request: PageRequest) -> Result<RawPage, UpstreamError> {
        let page = self
            .items
            .fetch_page(PageQuery {
                page: request.page,
                per_page: request.per_page,
            })
            .await
            .map_err(map_open_error)?;

        Ok(RawPage {
            items: page.items,
            next_page: page.next_page,
            current_page: page.current_page,
            per_page: page.per_page,
        })
    }
}

/// Maps a failure that happened before any increment was produced.
pub fn map_open_error(error: UpstreamApiError) -> UpstreamError {
    if error.is_timeout() {
        return UpstreamError::Timeout;
    }

    match error {
        UpstreamApiError::Status {
            status,
            message,
            retry_after_secs,
        } => match status.as_u16() {
            429 => UpstreamError::RateLimited {
                message,
                retry_after_secs,
            },
            code if code >= 500 => UpstreamError::Server {
                status: code,
                message,
            },
            code => UpstreamError::InvalidResponse(format!("HTTP {code}: {message}")),
        },
        UpstreamApiError::Request(error) => UpstreamError::Network(error.to_string()),
        UpstreamApiError::Serde(error) => UpstreamError::InvalidResponse(error.to_string()),
        other @ (UpstreamApiError::MalformedBody(_)
        | UpstreamApiError::InvalidUtf8(_)
        | UpstreamApiError::InvalidBaseUrl(_)) => UpstreamError::InvalidResponse(other.to_string()),
    }
}

/// Maps a failure raised while an already-open body was being read.
pub fn map_stream_error(error: UpstreamApiError) -> StreamFault {
    match error {
        UpstreamApiError::Request(error) => StreamFault::Transport(error.to_string()),
        other => StreamFault::Read(other.to_string()),
    }
}

/// Converts decoded body events into text increments.
///
/// The increment stream ends at `Done`, after the first error, or when the body
/// ends; nothing after a terminal event is forwarded.
pub fn into_increments<S>(events: S) -> IncrementStream
where
    S: Stream<Item = Result<TextStreamEvent, UpstreamApiError>> + Send + 'static,
{
    stream::unfold(Some(events.boxed()), |state| async move {
        let mut events = state?;
        loop {
            match events.next().await? {
                Ok(TextStreamEvent::Delta { text }) => {
                    if text.is_empty() {
                        continue;
                    }
                    return Some((Ok(text), Some(events)));
                }
                Ok(TextStreamEvent::Done) => return None,
                Ok(TextStreamEvent::Error { code, message }) => {
                    let message = match code {
                        Some(code) if !message.contains(&code) => format!("{message} ({code})"),
                        _ => message,
                    };
                    return Some((Err(StreamFault::Upstream(message)), None));
                }
                Err(error) => return Some((Err(map_stream_error(error)), None)),
            }
        }
    })
    .boxed()
}

fn map_init_error(error: UpstreamApiError) -> ProviderInitError {
    ProviderInitError::new(format!("Failed to initialize http provider: {error}"))
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use upstream_api::StatusCode;

    use super::*;

    fn status_error(code: u16, retry_after_secs: Option<u64>) -> UpstreamApiError {
        UpstreamApiError::Status {
            status: StatusCode::from_u16(code).expect("valid status"),
            message: "boom".to_string(),
            retry_after_secs,
        }
    }

    async fn collect(
        events: Vec<Result<TextStreamEvent, UpstreamApiError>>,
    ) -> Vec<Result<String, StreamFault>> {
        into_increments(stream::iter(events)).collect().await
    }

    #[test]
    fn status_errors_map_to_contract_taxonomy() {
        assert_eq!(
            map_open_error(status_error(429, Some(7))),
            UpstreamError::RateLimited {
                message: "boom".to_string(),
                retry_after_secs: Some(7),
            }
        );
        assert_eq!(
            map_open_error(status_error(502, None)),
            UpstreamError::Server {
                status: 502,
                message: "boom".to_string(),
            }
        );
        assert!(matches!(
            map_open_error(status_error(404, None)),
            UpstreamError::InvalidResponse(message) if message.contains("404")
        ));
    }

    #[test]
    fn body_decoding_errors_map_to_invalid_response_or_read_fault() {
        let serde_error = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid");
        assert!(matches!(
            map_open_error(UpstreamApiError::Serde(serde_error)),
            UpstreamError::InvalidResponse(_)
        ));
        assert!(matches!(
            map_stream_error(UpstreamApiError::InvalidUtf8("bad byte".to_string())),
            StreamFault::Read(message) if message.contains("bad byte")
        ));
    }

    #[tokio::test]
    async fn deltas_become_increments_and_done_ends_the_stream() {
        let increments = collect(vec![
            Ok(TextStreamEvent::delta("Hello, ")),
            Ok(TextStreamEvent::delta("")),
            Ok(TextStreamEvent::delta("world")),
            Ok(TextStreamEvent::Done),
            Ok(TextStreamEvent::delta("after done")),
        ])
        .await;

        assert_eq!(
            increments,
            vec![Ok("Hello, ".to_string()), Ok("world".to_string())]
        );
    }

    #[tokio::test]
    async fn upstream_error_event_is_forwarded_once_then_stream_ends() {
        let increments = collect(vec![
            Ok(TextStreamEvent::delta("partial")),
            Ok(TextStreamEvent::Error {
                code: Some("overloaded".to_string()),
                message: "model busy".to_string(),
            }),
            Ok(TextStreamEvent::delta("never")),
        ])
        .await;

        assert_eq!(
            increments,
            vec![
                Ok("partial".to_string()),
                Err(StreamFault::Upstream("model busy (overloaded)".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn read_errors_terminate_with_a_fault() {
        let increments = collect(vec![
            Ok(TextStreamEvent::delta("abc")),
            Err(UpstreamApiError::InvalidUtf8("truncated".to_string())),
            Ok(TextStreamEvent::delta("never")),
        ])
        .await;

        assert_eq!(increments.len(), 2);
        assert!(matches!(increments[1], Err(StreamFault::Read(_))));
    }

    #[test]
    fn invalid_base_url_fails_provider_initialization() {
        let error = HttpProvider::new(HttpProviderConfig::new("not a url", "http://localhost"))
            .expect_err("invalid url must fail");
        assert!(error.message().contains("invalid base URL"));
    }

    #[test]
    fn profile_reports_normalized_generation_endpoint() {
        let provider = HttpProvider::new(
            HttpProviderConfig::new("https://digest.example.com/api", "https://items.example.com")
                .with_api_token("tok"),
        )
        .expect("valid config");

        let profile = provider.profile();
        assert_eq!(profile.provider_id, HTTP_PROVIDER_ID);
        assert_eq!(
            profile.endpoint.as_deref(),
            Some("https://digest.example.com/api/generate")
        );
    }
}
