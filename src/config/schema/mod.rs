mod env_overrides;
mod loader;
mod memory;
mod types;

pub use memory::{ConsolidationConfig, RetrievalConfig};
pub use types::{
    Config, EmbeddingConfig, LlmConfig, LlmEndpoint, ReliabilityConfig, StoreBackend, StoreConfig,
};
