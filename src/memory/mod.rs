pub mod consolidation;
pub mod embeddings;
pub mod reconsolidator;
pub mod retriever;
pub mod semantic_writer;
pub mod store;
pub mod types;
pub mod vector;

pub use consolidation::{
    CommitTarget, ConsolidationOrchestrator, ConsolidationPhase, ConsolidationReport,
    ConsolidationScheduler, EntryOutcome, SchedulerRun,
};
pub use embeddings::{
    EmbeddingGateway, EmbeddingProvider, NoopEmbedding, OpenAiEmbedding,
    create_embedding_provider,
};
pub use reconsolidator::{Reconsolidation, Reconsolidator};
pub use retriever::Retriever;
pub use semantic_writer::{MergePlan, SemanticChange, SemanticWriter, normalize_extraction};
pub use store::{
    InMemoryVectorStore, MilvusVectorStore, RecordFilter, VectorStore, create_vector_store,
};
pub use types::{
    ConsolidationBatch, EpisodicMemory, ExtractionResult, MemoryContext, MemoryKind,
    RecalledMemory, ScoredRecord, SemanticMemory, VectorRecord,
};
