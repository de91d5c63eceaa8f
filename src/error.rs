use digest_provider::UpstreamError;
use thiserror::Error;

/// Failures surfaced by digest commands.
///
/// The first eight variants mirror the transport taxonomy; the rest are local
/// rejections that never reach the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
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

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("stream read failed: {0}")]
    StreamRead(String),

    #[error("request was aborted")]
    Aborted,

    #[error("unknown item '{0}'")]
    UnknownItem(String),

    #[error("a generation is already running for '{0}'")]
    SessionBusy(String),

    #[error("a page fetch is already in flight")]
    FetchInFlight,

    #[error("no generation recorded for '{0}'")]
    NoGeneration(String),

    #[error("stored state has not been restored yet")]
    NotHydrated,
}

impl DigestError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

impl From<UpstreamError> for DigestError {
    fn from(error: UpstreamError) -> Self {
        match error {
            UpstreamError::Network(message) => Self::Network(message),
            UpstreamError::Timeout => Self::Timeout,
            UpstreamError::Server { status, message } => Self::Server { status, message },
            UpstreamError::RateLimited {
                message,
                retry_after_secs,
            } => Self::RateLimited {
                message,
                retry_after_secs,
            },
            UpstreamError::InvalidResponse(message) => Self::InvalidResponse(message),
            UpstreamError::Aborted => Self::Aborted,
        }
    }
}
