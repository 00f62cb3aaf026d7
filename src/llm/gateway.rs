use super::json::parse_model_json;
use crate::error::GatewayError;
use crate::providers::Provider;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Chat capability the consolidation core depends on.
///
/// The core never looks at providers, models or retries; tests swap in a
/// deterministic implementation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Free-text completion for a system prompt and one user message.
    async fn chat(&self, system: &str, user: &str) -> Result<String, GatewayError>;
}

/// Structured completion. Returns `default` when the call fails, the reply
/// holds no JSON object, or the object does not match `T`.
pub async fn chat_json<T>(llm: &dyn LanguageModel, system: &str, user: &str, default: T) -> T
where
    T: DeserializeOwned + Send,
{
    let reply = match llm.chat(system, user).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(model = llm.name(), error = %e, "chat_json call failed, using default");
            return default;
        }
    };

    match parse_model_json(&reply) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                model = llm.name(),
                error = %e,
                "chat_json output unusable, using default"
            );
            default
        }
    }
}

/// Adapts a [`Provider`] (usually the reliable fallback chain) to
/// [`LanguageModel`] with a fixed model and temperature.
pub struct ProviderGateway {
    provider: Box<dyn Provider>,
    model: String,
    temperature: f64,
}

impl ProviderGateway {
    pub fn new(provider: Box<dyn Provider>, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
        }
    }
}

#[async_trait]
impl LanguageModel for ProviderGateway {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, GatewayError> {
        let system = Some(system).filter(|s| !s.trim().is_empty());
        self.provider
            .chat_with_system(system, user, &self.model, self.temperature)
            .await
            .map_err(|e| GatewayError::llm(self.provider.name(), format!("{e:#}")))
    }
}
