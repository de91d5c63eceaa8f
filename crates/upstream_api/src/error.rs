use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum UpstreamApiError {
    InvalidBaseUrl(String),
    Request(reqwest::Error),
    Status {
        status: StatusCode,
        message: String,
        retry_after_secs: Option<u64>,
    },
    MalformedBody(String),
    InvalidUtf8(String),
    Serde(JsonError),
}

impl UpstreamApiError {
    /// True when the HTTP client gave up because its own timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(error) if error.is_timeout())
    }

    /// True for failures that happened before any response status was seen.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Request(error) if error.is_connect() || error.is_request())
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(error) => error.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(rename = "error")]
    pub value: Option<ErrorPayloadBody>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ErrorPayloadBody {
    Fields(ErrorPayloadFields),
    Text(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayloadFields {
    pub message: Option<String>,
    pub code: Option<String>,
}

impl ErrorPayloadBody {
    fn message(&self) -> Option<String> {
        match self {
            Self::Fields(fields) => fields
                .message
                .as_deref()
                .and_then(non_empty_string)
                .or_else(|| fields.code.as_deref().and_then(non_empty_string))
                .map(ToOwned::to_owned),
            Self::Text(text) => non_empty_string(text).map(ToOwned::to_owned),
        }
    }
}

impl fmt::Display for UpstreamApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status {
                status, message, ..
            } => write!(f, "HTTP {status} {message}"),
            Self::MalformedBody(message) => write!(f, "malformed response body: {message}"),
            Self::InvalidUtf8(message) => write!(f, "response body is not UTF-8: {message}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
        }
    }
}

impl std::error::Error for UpstreamApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(error) => Some(error),
            Self::Serde(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for UpstreamApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for UpstreamApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Extracts a readable message from an error response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.trim().to_string()
        }
    };

    match serde_json::from_str::<ErrorPayload>(body) {
        Ok(ErrorPayload { value: Some(value) }) => value.message().unwrap_or_else(fallback),
        _ => fallback(),
    }
}

/// Parses a `Retry-After` header given in delta-seconds.
pub fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    value.and_then(|raw| raw.trim().parse::<u64>().ok())
}

fn non_empty_string(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
