use super::memory::{ConsolidationConfig, RetrievalConfig};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Resolved path of the loaded config file (not serialized)
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Directory for scheduler state (not serialized)
    #[serde(skip)]
    pub workspace_dir: PathBuf,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    #[serde(default)]
    pub reliability: ReliabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        let home = directories::UserDirs::new().map_or_else(
            || PathBuf::from("."),
            |u| u.home_dir().to_path_buf(),
        );
        let mnemo_dir = home.join(".mnemo");

        Self {
            config_path: mnemo_dir.join("config.toml"),
            workspace_dir: mnemo_dir.join("workspace"),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            store: StoreConfig::default(),
            retrieval: RetrievalConfig::default(),
            consolidation: ConsolidationConfig::default(),
            reliability: ReliabilityConfig::default(),
        }
    }
}

// ── Embedding ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "siliconflow" | "openai" | "custom:URL" | "none"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL including the version segment
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Every stored vector must have exactly this many dimensions
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
}

fn default_embedding_provider() -> String {
    "siliconflow".into()
}
fn default_embedding_base_url() -> String {
    "https://api.siliconflow.cn/v1".into()
}
fn default_embedding_model() -> String {
    "Qwen/Qwen3-Embedding-4B".into()
}
fn default_embedding_dims() -> usize {
    2560
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimensions: default_embedding_dims(),
        }
    }
}

// ── LLM ───────────────────────────────────────────────────────────

/// One OpenAI-compatible chat endpoint. Endpoints without an API key are
/// skipped when the fallback chain is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEndpoint {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

impl LlmEndpoint {
    fn new(name: &str, base_url: &str, model: &str) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Providers in fallback order; the first one with a key is primary
    #[serde(default = "default_llm_providers")]
    pub providers: Vec<LlmEndpoint>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_llm_providers() -> Vec<LlmEndpoint> {
    vec![
        LlmEndpoint::new("deepseek", "https://api.deepseek.com", "deepseek-chat"),
        LlmEndpoint::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            "deepseek/deepseek-chat",
        ),
        LlmEndpoint::new(
            "glm",
            "https://open.bigmodel.cn/api/coding/paas/v4",
            "glm-4.6v",
        ),
    ]
}
fn default_temperature() -> f64 {
    0.3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: default_llm_providers(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn endpoint_mut(&mut self, name: &str) -> Option<&mut LlmEndpoint> {
        self.providers.iter_mut().find(|p| p.name == name)
    }

    pub fn configured(&self) -> impl Iterator<Item = &LlmEndpoint> {
        self.providers
            .iter()
            .filter(|p| p.api_key.as_deref().is_some_and(|k| !k.is_empty()))
    }
}

// ── Vector store ──────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; contents are lost on exit
    #[default]
    Memory,
    Milvus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub milvus_uri: Option<String>,
    #[serde(default)]
    pub milvus_token: Option<String>,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

fn default_collection_name() -> String {
    "memories".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            milvus_uri: None,
            milvus_token: None,
            collection_name: default_collection_name(),
        }
    }
}

// ── Reliability ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_provider_retries")]
    pub provider_retries: u32,
    #[serde(default = "default_provider_backoff_ms")]
    pub provider_backoff_ms: u64,
}

fn default_provider_retries() -> u32 {
    2
}

fn default_provider_backoff_ms() -> u64 {
    500
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            provider_retries: default_provider_retries(),
            provider_backoff_ms: default_provider_backoff_ms(),
        }
    }
}

// ── Validation / presentation ─────────────────────────────────────

const REDACTED: &str = "***";

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.consolidation.narrative_similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "consolidation.narrative_similarity_threshold must be in (0, 1], got {threshold}"
            )));
        }

        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Validation(
                "embedding.dimensions must be greater than 0".into(),
            ));
        }

        if self.consolidation.batch_size == 0 {
            return Err(ConfigError::Validation(
                "consolidation.batch_size must be greater than 0".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Validation(
                "llm.temperature must be between 0 and 2".into(),
            ));
        }

        if self.store.backend == StoreBackend::Milvus
            && self.store.milvus_uri.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::Validation(
                "store.milvus_uri is required for the milvus backend (set MILVUS_URL)".into(),
            ));
        }

        Ok(())
    }

    /// Copy of the config with every secret replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.embedding.api_key.is_some() {
            copy.embedding.api_key = Some(REDACTED.into());
        }
        if copy.store.milvus_token.is_some() {
            copy.store.milvus_token = Some(REDACTED.into());
        }
        for endpoint in &mut copy.llm.providers {
            if endpoint.api_key.is_some() {
                endpoint.api_key = Some(REDACTED.into());
            }
        }
        copy
    }
}
