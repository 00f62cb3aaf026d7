pub mod schema;

pub use schema::{
    Config, ConsolidationConfig, EmbeddingConfig, LlmConfig, LlmEndpoint, ReliabilityConfig,
    RetrievalConfig, StoreBackend, StoreConfig,
};
