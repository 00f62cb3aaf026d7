//! Vector store boundary: `(id, vector, payload)` records grouped by
//! namespace, with filtered similarity search.

pub mod in_memory;
pub mod milvus;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::memory::types::{MemoryKind, ScoredRecord, VectorRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use in_memory::InMemoryVectorStore;
pub use milvus::MilvusVectorStore;

/// Metadata filter applied to record payloads. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub user_id: Option<String>,
    /// Strictly later than this instant.
    pub created_after: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn after(mut self, ts: DateTime<Utc>) -> Self {
        self.created_after = Some(ts);
        self
    }

    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        let user_matches = self.user_id.as_ref().is_none_or(|want| {
            payload.get("user_id").and_then(|v| v.as_str()) == Some(want.as_str())
        });
        if !user_matches {
            return false;
        }
        match self.created_after {
            None => true,
            Some(after) => payload_created_at(payload).is_some_and(|ts| ts > after),
        }
    }
}

/// `created_at` of a payload, if present and well-formed.
pub fn payload_created_at(payload: &serde_json::Value) -> Option<DateTime<Utc>> {
    payload
        .get("created_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Sort records oldest first, ties broken by id.
pub fn sort_by_creation(records: &mut [VectorRecord]) {
    records.sort_by(|a, b| {
        payload_created_at(&a.payload)
            .cmp(&payload_created_at(&b.payload))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace the record with the same id in `namespace`.
    async fn upsert(&self, namespace: MemoryKind, record: VectorRecord) -> Result<(), StoreError>;

    /// Remove a record. Backends that can tell report a missing id as
    /// [`StoreError::NotFound`].
    async fn delete(&self, namespace: MemoryKind, id: &str) -> Result<(), StoreError>;

    /// Top-`k` records by cosine similarity, highest score first. Remote
    /// backends may leave `vector` empty on the returned records.
    async fn search(
        &self,
        namespace: MemoryKind,
        vector: &[f32],
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<ScoredRecord>, StoreError>;

    /// Filtered scan in creation order. `None` returns every match the
    /// backend allows in one call.
    async fn query(
        &self,
        namespace: MemoryKind,
        filter: &RecordFilter,
        limit: Option<usize>,
    ) -> Result<Vec<VectorRecord>, StoreError>;
}

/// Build the configured backend. Milvus collections are created on first use.
pub async fn create_vector_store(
    config: &StoreConfig,
    dims: usize,
) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-process vector store; memories are lost on exit");
            Ok(Arc::new(InMemoryVectorStore::new(dims)))
        }
        StoreBackend::Milvus => {
            let uri = config
                .milvus_uri
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    anyhow::anyhow!("Milvus backend selected but MILVUS_URL is not set")
                })?;
            let store = MilvusVectorStore::new(
                uri,
                config.milvus_token.as_deref(),
                &config.collection_name,
                dims,
            );
            store.ensure_collection().await?;
            Ok(Arc::new(store))
        }
    }
}
