use super::{RecordFilter, VectorStore, sort_by_creation};
use crate::error::StoreError;
use crate::memory::types::{MemoryKind, ScoredRecord, VectorRecord};
use crate::memory::vector::cosine_similarity;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Brute-force store held in process memory. Suitable for tests and
/// single-node use; search is a linear scan.
pub struct InMemoryVectorStore {
    dims: usize,
    namespaces: RwLock<HashMap<MemoryKind, HashMap<String, VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self, namespace: MemoryKind) -> usize {
        self.namespaces
            .read()
            .await
            .get(&namespace)
            .map_or(0, HashMap::len)
    }

    fn check_dims(&self, id: &str, actual: usize) -> Result<(), StoreError> {
        if actual == self.dims {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                id: id.to_string(),
                expected: self.dims,
                actual,
            })
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, namespace: MemoryKind, record: VectorRecord) -> Result<(), StoreError> {
        self.check_dims(&record.id, record.vector.len())?;
        self.namespaces
            .write()
            .await
            .entry(namespace)
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, namespace: MemoryKind, id: &str) -> Result<(), StoreError> {
        let removed = self
            .namespaces
            .write()
            .await
            .get_mut(&namespace)
            .and_then(|records| records.remove(id));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                namespace: namespace.to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn search(
        &self,
        namespace: MemoryKind,
        vector: &[f32],
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        self.check_dims("<query>", vector.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let guard = self.namespaces.read().await;
        let Some(records) = guard.get(&namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredRecord> = records
            .values()
            .filter(|r| filter.matches(&r.payload))
            .map(|r| ScoredRecord {
                score: cosine_similarity(vector, &r.vector),
                record: r.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn query(
        &self,
        namespace: MemoryKind,
        filter: &RecordFilter,
        limit: Option<usize>,
    ) -> Result<Vec<VectorRecord>, StoreError> {
        let guard = self.namespaces.read().await;
        let mut matched: Vec<VectorRecord> = guard
            .get(&namespace)
            .map(|records| {
                records
                    .values()
                    .filter(|r| filter.matches(&r.payload))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(guard);

        sort_by_creation(&mut matched);
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}
