use std::sync::Arc;

use digest_provider::{GenerationBackend, ItemSource, ProviderInitError};
use digest_provider_http::{HttpProvider, HttpProviderConfig, HTTP_PROVIDER_ID};
use digest_provider_mock::{MockBackend, MockItemSource, MOCK_PROVIDER_ID};

use crate::config::{DigestConfig, GENERATION_URL_ENV_VAR};

pub const DEFAULT_PROVIDER_ID: &str = MOCK_PROVIDER_ID;

/// The two collaborators a [`crate::Digest`] is built from.
pub struct Providers {
    pub backend: Arc<dyn GenerationBackend>,
    pub source: Arc<dyn ItemSource>,
}

pub fn providers_from_config(config: &DigestConfig) -> Result<Providers, ProviderInitError> {
    providers_for_id(
        config.provider.as_deref().unwrap_or(DEFAULT_PROVIDER_ID),
        config,
    )
}

pub fn providers_for_id(
    provider_id: &str,
    config: &DigestConfig,
) -> Result<Providers, ProviderInitError> {
    match provider_id {
        MOCK_PROVIDER_ID => Ok(Providers {
            backend: Arc::new(MockBackend::default()),
            source: Arc::new(MockItemSource::default()),
        }),
        HTTP_PROVIDER_ID => {
            let generation_url = config.generation_url.clone().ok_or_else(|| {
                ProviderInitError::new(format!(
                    "{GENERATION_URL_ENV_VAR} is required for the '{HTTP_PROVIDER_ID}' provider"
                ))
            })?;
            let items_url = config
                .items_url
                .clone()
                .unwrap_or_else(|| generation_url.clone());

            let mut http_config = HttpProviderConfig::new(generation_url, items_url);
            if let Some(token) = &config.api_token {
                http_config = http_config.with_api_token(token.clone());
            }
            let provider = Arc::new(HttpProvider::new(http_config)?);

            Ok(Providers {
                backend: Arc::clone(&provider) as Arc<dyn GenerationBackend>,
                source: provider,
            })
        }
        unknown => Err(ProviderInitError::new(format!(
            "Unsupported provider '{unknown}'. Available providers: {MOCK_PROVIDER_ID}, {HTTP_PROVIDER_ID}"
        ))),
    }
}
