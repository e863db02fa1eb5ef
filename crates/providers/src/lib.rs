//! Chat-completion providers for AIQ.
//!
//! All providers implement the `aiq_core::Provider` trait. Transport
//! failures are retried here, at the client boundary, so the orchestrator
//! never has to.

pub mod openai_compat;
pub mod retry;

pub use openai_compat::{OpenAiCompatProvider, chat_completions_url};
pub use retry::{RetryPolicy, backoff_delay};

use aiq_config::AppConfig;
use aiq_core::error::ProviderError;

/// Build the configured provider.
pub fn from_config(config: &AppConfig) -> Result<OpenAiCompatProvider, ProviderError> {
    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| ProviderError::NotConfigured("no API key set".into()))?;
    OpenAiCompatProvider::new("openai-compatible", &config.base_url, api_key)
}
