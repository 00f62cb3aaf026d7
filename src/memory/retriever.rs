use crate::config::RetrievalConfig;
use crate::error::MnemoResult;
use crate::memory::embeddings::EmbeddingGateway;
use crate::memory::store::{RecordFilter, VectorStore};
use crate::memory::types::{
    EpisodicMemory, MemoryContext, MemoryKind, RecalledMemory, ScoredRecord, SemanticMemory,
};

/// Read-only composition of semantic and episodic recall.
pub struct Retriever<'a> {
    store: &'a dyn VectorStore,
    embedder: &'a EmbeddingGateway,
    config: &'a RetrievalConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(
        store: &'a dyn VectorStore,
        embedder: &'a EmbeddingGateway,
        config: &'a RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub async fn retrieve(&self, user_id: &str, query: &str) -> MnemoResult<MemoryContext> {
        let vector = self.embedder.embed_one(query).await?;
        let filter = RecordFilter::for_user(user_id);

        let semantic = if self.config.use_all_semantic {
            self.store
                .query(MemoryKind::Semantic, &filter, Some(self.config.max_all_semantic))
                .await?
                .into_iter()
                .map(|record| {
                    SemanticMemory::from_record(record).map(|m| RecalledMemory {
                        id: m.id,
                        text: m.text,
                        score: None,
                        created_at: m.created_at,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let hits = self
                .store
                .search(MemoryKind::Semantic, &vector, self.config.k_semantic, &filter)
                .await?;
            recall_semantic(hits)?
        };

        let hits = self
            .store
            .search(MemoryKind::Episodic, &vector, self.config.k_episodic, &filter)
            .await?;
        let episodic = recall_episodic(hits)?;

        tracing::debug!(
            user_id,
            semantic = semantic.len(),
            episodic = episodic.len(),
            "Retrieved memory context"
        );
        Ok(MemoryContext { semantic, episodic })
    }
}

fn recall_semantic(hits: Vec<ScoredRecord>) -> MnemoResult<Vec<RecalledMemory>> {
    hits.into_iter()
        .map(|hit| {
            let m = SemanticMemory::from_record(hit.record)?;
            Ok(RecalledMemory {
                id: m.id,
                text: m.text,
                score: Some(hit.score),
                created_at: m.created_at,
            })
        })
        .collect()
}

fn recall_episodic(hits: Vec<ScoredRecord>) -> MnemoResult<Vec<RecalledMemory>> {
    hits.into_iter()
        .map(|hit| {
            let m = EpisodicMemory::from_record(hit.record)?;
            Ok(RecalledMemory {
                id: m.id,
                text: m.text,
                score: Some(hit.score),
                created_at: m.created_at,
            })
        })
        .collect()
}
