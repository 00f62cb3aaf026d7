use super::compatible::OpenAiCompatibleProvider;
use super::reliable::{FallbackEntry, ReliableProvider};
use super::traits::Provider;
use crate::config::{LlmConfig, ReliabilityConfig};

/// Create a single OpenAI-compatible provider for a named endpoint.
pub fn create_provider(name: &str, base_url: &str, api_key: Option<&str>) -> Box<dyn Provider> {
    Box::new(OpenAiCompatibleProvider::new(name, base_url, api_key))
}

/// Build the fallback chain from every endpoint that has an API key, in
/// config order. Each endpoint keeps its own model name.
pub fn create_provider_chain(
    llm: &LlmConfig,
    reliability: &ReliabilityConfig,
) -> anyhow::Result<ReliableProvider> {
    let entries: Vec<FallbackEntry> = llm
        .configured()
        .map(|endpoint| FallbackEntry {
            name: endpoint.name.clone(),
            provider: create_provider(
                &endpoint.name,
                &endpoint.base_url,
                endpoint.api_key.as_deref(),
            ),
            model: Some(endpoint.model.clone()),
        })
        .collect();

    if entries.is_empty() {
        anyhow::bail!(
            "No LLM provider configured. Set DEEPSEEK_API_KEY, OPENROUTER_API_KEY or GLM_API_KEY."
        );
    }

    let chain = ReliableProvider::new(
        entries,
        reliability.provider_retries,
        reliability.provider_backoff_ms,
    );
    tracing::debug!(providers = ?chain.provider_names(), "LLM fallback chain ready");
    Ok(chain)
}
