use super::traits::Provider;
use async_trait::async_trait;
use std::time::Duration;

const MAX_BACKOFF_MS: u64 = 10_000;

/// Check if an error is non-retryable (client errors that won't resolve with retries).
fn is_non_retryable(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    if is_quota_exhausted(&msg) {
        return true;
    }

    if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>()
        && let Some(status) = reqwest_err.status()
    {
        let code = status.as_u16();
        // 408 and 429 are transient even though they are 4xx.
        return status.is_client_error() && code != 429 && code != 408;
    }

    // Provider errors carry the status in their message, e.g. "API error (401 Unauthorized)".
    if let Some(idx) = msg.find("API error (")
        && let Some(code) = msg[idx + "API error (".len()..]
            .get(..3)
            .and_then(|digits| digits.parse::<u16>().ok())
    {
        return (400..500).contains(&code) && code != 429 && code != 408;
    }
    false
}

fn is_quota_exhausted(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("insufficient_quota")
        || lower.contains("insufficient balance")
        || lower.contains("exceeded your current quota")
}

/// One link of the fallback chain. `model` overrides the model requested by
/// the caller, since fallback endpoints rarely serve the primary's model name.
pub struct FallbackEntry {
    pub name: String,
    pub provider: Box<dyn Provider>,
    pub model: Option<String>,
}

/// Provider wrapper with retry + ordered fallback.
pub struct ReliableProvider {
    entries: Vec<FallbackEntry>,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl std::fmt::Debug for ReliableProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableProvider")
            .field("providers", &self.provider_names())
            .field("max_retries", &self.max_retries)
            .field("base_backoff_ms", &self.base_backoff_ms)
            .finish_non_exhaustive()
    }
}

impl ReliableProvider {
    pub fn new(entries: Vec<FallbackEntry>, max_retries: u32, base_backoff_ms: u64) -> Self {
        Self {
            entries,
            max_retries,
            base_backoff_ms: base_backoff_ms.max(50),
        }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}

#[async_trait]
impl Provider for ReliableProvider {
    fn name(&self) -> &str {
        self.entries
            .first()
            .map_or("reliable", |entry| entry.name.as_str())
    }

    async fn warmup(&self) -> anyhow::Result<()> {
        for entry in &self.entries {
            tracing::info!(provider = entry.name.as_str(), "Warming up provider connection pool");
            if let Err(e) = entry.provider.warmup().await {
                tracing::warn!(provider = entry.name.as_str(), "Warmup failed (non-fatal): {e}");
            }
        }
        Ok(())
    }

    async fn chat_with_system(
        &self,
        system_prompt: Option<&str>,
        message: &str,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<String> {
        let mut failures = Vec::new();

        for entry in &self.entries {
            let model = entry.model.as_deref().unwrap_or(model);
            let mut backoff_ms = self.base_backoff_ms;

            for attempt in 0..=self.max_retries {
                match entry
                    .provider
                    .chat_with_system(system_prompt, message, model, temperature)
                    .await
                {
                    Ok(resp) => {
                        if attempt > 0 {
                            tracing::info!(
                                provider = entry.name.as_str(),
                                attempt,
                                "Provider recovered after retries"
                            );
                        }
                        return Ok(resp);
                    }
                    Err(e) => {
                        let non_retryable = is_non_retryable(&e);
                        failures.push(format!(
                            "{} attempt {}/{}: {e}",
                            entry.name,
                            attempt + 1,
                            self.max_retries + 1
                        ));

                        if non_retryable {
                            tracing::warn!(
                                provider = entry.name.as_str(),
                                "Non-retryable error, switching provider"
                            );
                            break;
                        }

                        if attempt < self.max_retries {
                            tracing::warn!(
                                provider = entry.name.as_str(),
                                attempt = attempt + 1,
                                max_retries = self.max_retries,
                                "Provider call failed, retrying"
                            );
                            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                            backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                        }
                    }
                }
            }

            tracing::warn!(provider = entry.name.as_str(), "Switching to fallback provider");
        }

        anyhow::bail!("All providers failed. Attempts:\n{}", failures.join("\n"))
    }
}
