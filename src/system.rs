use crate::config::Config;
use crate::error::{MnemoError, MnemoResult};
use crate::llm::{LanguageModel, ProviderGateway};
use crate::memory::{
    ConsolidationScheduler, EmbeddingGateway, EpisodicMemory, MemoryContext, MemoryKind,
    Retriever, SchedulerRun, VectorStore, create_embedding_provider, create_vector_store,
};
use crate::providers::{Provider, create_provider_chain};
use chrono::Utc;
use std::sync::Arc;

/// Entry point tying the gateways, the store and the consolidation
/// scheduler together for one configuration.
pub struct MemorySystem {
    config: Config,
    llm: Box<dyn LanguageModel>,
    embedder: EmbeddingGateway,
    store: Arc<dyn VectorStore>,
    scheduler: ConsolidationScheduler,
}

impl MemorySystem {
    pub fn new(
        config: Config,
        llm: Box<dyn LanguageModel>,
        embedder: EmbeddingGateway,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let scheduler = ConsolidationScheduler::new(&config.workspace_dir, &config.consolidation);
        Self {
            config,
            llm,
            embedder,
            store,
            scheduler,
        }
    }

    /// Build every component from `config`: the LLM fallback chain, the
    /// embedding provider and the vector store backend.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let chain = create_provider_chain(&config.llm, &config.reliability)?;
        chain.warmup().await?;
        let model = config
            .llm
            .configured()
            .next()
            .map(|endpoint| endpoint.model.clone())
            .unwrap_or_default();
        let llm = ProviderGateway::new(Box::new(chain), model, config.llm.temperature);

        let embedder = EmbeddingGateway::new(
            Arc::from(create_embedding_provider(&config.embedding)),
            config.embedding.dimensions,
        );
        let store = create_vector_store(&config.store, config.embedding.dimensions).await?;

        tracing::info!(
            llm = llm.name(),
            embedding = embedder.provider_name(),
            store = store.name(),
            "Memory system ready"
        );
        Ok(Self::new(config, Box::new(llm), embedder, store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// Record a new interaction as an episodic memory.
    pub async fn remember(
        &self,
        user_id: &str,
        chat_id: &str,
        text: &str,
    ) -> MnemoResult<EpisodicMemory> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MnemoError::Validation("memory text must not be empty".into()));
        }
        if user_id.trim().is_empty() || chat_id.trim().is_empty() {
            return Err(MnemoError::Validation(
                "user_id and chat_id must not be empty".into(),
            ));
        }

        let memory = EpisodicMemory {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            embedding: self.embedder.embed_one(text).await?,
            created_at: Utc::now(),
        };
        self.store
            .upsert(MemoryKind::Episodic, memory.to_record()?)
            .await?;
        tracing::debug!(user_id, chat_id, memory_id = memory.id.as_str(), "Stored episodic memory");
        Ok(memory)
    }

    pub async fn retrieve(&self, user_id: &str, query: &str) -> MnemoResult<MemoryContext> {
        Retriever::new(self.store.as_ref(), &self.embedder, &self.config.retrieval)
            .retrieve(user_id, query)
            .await
    }

    pub async fn should_consolidate(&self, user_id: &str) -> MnemoResult<bool> {
        self.scheduler
            .should_consolidate(self.store.as_ref(), user_id)
            .await
    }

    /// Run one consolidation batch if due (or unconditionally with `force`).
    pub async fn consolidate(&self, user_id: &str, force: bool) -> MnemoResult<SchedulerRun> {
        self.scheduler
            .run_once(
                self.llm.as_ref(),
                &self.embedder,
                self.store.as_ref(),
                user_id,
                force,
            )
            .await
    }
}
