//! Environment configuration.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::{DigestSettings, DEFAULT_PER_PAGE};

pub const PROVIDER_ENV_VAR: &str = "PR_DIGEST_PROVIDER";
pub const GENERATION_URL_ENV_VAR: &str = "PR_DIGEST_GENERATION_URL";
pub const ITEMS_URL_ENV_VAR: &str = "PR_DIGEST_ITEMS_URL";
pub const API_TOKEN_ENV_VAR: &str = "PR_DIGEST_API_TOKEN";
pub const PER_PAGE_ENV_VAR: &str = "PR_DIGEST_PER_PAGE";
pub const PAGE_TIMEOUT_ENV_VAR: &str = "PR_DIGEST_PAGE_TIMEOUT_SEC";
pub const GENERATION_TIMEOUT_ENV_VAR: &str = "PR_DIGEST_GENERATION_TIMEOUT_SEC";
pub const STATE_DIR_ENV_VAR: &str = "PR_DIGEST_STATE_DIR";
pub const STORAGE_QUOTA_ENV_VAR: &str = "PR_DIGEST_STORAGE_QUOTA_BYTES";
pub const LOG_ENV_VAR: &str = "PR_DIGEST_LOG";

const DEFAULT_PAGE_TIMEOUT_SEC: u64 = 15;
const DEFAULT_GENERATION_TIMEOUT_SEC: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestConfig {
    /// Explicit provider id; `None` selects the default.
    pub provider: Option<String>,
    pub generation_url: Option<String>,
    pub items_url: Option<String>,
    pub api_token: Option<String>,
    pub per_page: u32,
    pub page_timeout: Duration,
    pub generation_timeout: Duration,
    pub state_dir: Option<PathBuf>,
    pub storage_quota_bytes: Option<usize>,
    pub log_filter: Option<String>,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            provider: None,
            generation_url: None,
            items_url: None,
            api_token: None,
            per_page: DEFAULT_PER_PAGE,
            page_timeout: Duration::from_secs(DEFAULT_PAGE_TIMEOUT_SEC),
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SEC),
            state_dir: None,
            storage_quota_bytes: None,
            log_filter: None,
        }
    }
}

impl DigestConfig {
    pub fn from_env() -> Self {
        Self {
            provider: env_string_opt(PROVIDER_ENV_VAR),
            generation_url: env_string_opt(GENERATION_URL_ENV_VAR),
            items_url: env_string_opt(ITEMS_URL_ENV_VAR),
            api_token: env_string_opt(API_TOKEN_ENV_VAR),
            per_page: env_parse::<u32>(PER_PAGE_ENV_VAR)
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_PER_PAGE),
            page_timeout: env_secs(PAGE_TIMEOUT_ENV_VAR, DEFAULT_PAGE_TIMEOUT_SEC),
            generation_timeout: env_secs(
                GENERATION_TIMEOUT_ENV_VAR,
                DEFAULT_GENERATION_TIMEOUT_SEC,
            ),
            state_dir: env_string_opt(STATE_DIR_ENV_VAR).map(PathBuf::from),
            storage_quota_bytes: env_parse::<usize>(STORAGE_QUOTA_ENV_VAR),
            log_filter: env_string_opt(LOG_ENV_VAR),
        }
    }

    /// Snapshot directory, defaulting to `<cwd>/.pr_digest/state`.
    #[must_use]
    pub fn state_dir(&self, cwd: &Path) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| snapshot_store::state_root(cwd))
    }

    #[must_use]
    pub fn settings(&self) -> DigestSettings {
        DigestSettings {
            per_page: self.per_page,
            page_timeout: self.page_timeout,
            generation_timeout: self.generation_timeout,
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string_opt(key).and_then(|value| value.parse::<T>().ok())
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(
        env_parse::<u64>(key)
            .filter(|value| *value > 0)
            .unwrap_or(default_secs),
    )
}
