use url::Url;

use crate::error::UpstreamApiError;

/// Default base URL for local development servers.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

pub const GENERATE_PATH: &str = "/api/generate";
pub const PULLS_PATH: &str = "/api/pulls";

/// Normalize a base URL to the generation endpoint.
///
/// Normalization rules:
/// 1) keep `/api/generate` unchanged
/// 2) append `/generate` when path ends in `/api`
/// 3) append `/api/generate` otherwise
pub fn normalize_generation_url(input: &str) -> Result<String, UpstreamApiError> {
    normalize_endpoint(input, GENERATE_PATH)
}

/// Normalize a base URL to the paginated items endpoint, with the same rules as
/// [`normalize_generation_url`] applied to `/api/pulls`.
pub fn normalize_items_url(input: &str) -> Result<String, UpstreamApiError> {
    normalize_endpoint(input, PULLS_PATH)
}

fn normalize_endpoint(input: &str, endpoint: &str) -> Result<String, UpstreamApiError> {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    let parsed = Url::parse(base)
        .map_err(|error| UpstreamApiError::InvalidBaseUrl(format!("{base}: {error}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UpstreamApiError::InvalidBaseUrl(format!(
            "{base}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with(endpoint) {
        return Ok(trimmed.to_string());
    }
    if trimmed.ends_with("/api") {
        return Ok(format!("{trimmed}{}", &endpoint["/api".len()..]));
    }
    Ok(format!("{trimmed}{endpoint}"))
}
