use super::{RecordFilter, VectorStore, payload_created_at, sort_by_creation};
use crate::error::StoreError;
use crate::memory::types::{MemoryKind, ScoredRecord, VectorRecord};
use crate::providers::http_client::{STORE_TIMEOUT_SECS, build_http_client};
use crate::providers::sanitize_api_error;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

const BACKEND: &str = "milvus";

/// Largest page the Milvus query endpoint returns in one call.
pub const MAX_QUERY_LIMIT: usize = 16_384;

const OUTPUT_FIELDS: [&str; 2] = ["id", "payload"];

/// Milvus over its RESTful v2 API.
///
/// One collection holds both namespaces. Entities carry `namespace`,
/// `user_id` and `created_at` (epoch microseconds) as filterable scalar
/// fields. `chat_id` is stored alongside (empty for semantic records) and the
/// full record payload sits in a JSON field.
pub struct MilvusVectorStore {
    client: reqwest::Client,
    base_url: String,
    cached_auth_header: Option<String>,
    collection: String,
    dims: usize,
}

#[derive(Debug, Deserialize)]
struct MilvusResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct EntityRow {
    id: String,
    payload: Value,
    #[serde(default)]
    distance: Option<f32>,
}

/// Quote a string for a Milvus boolean expression.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Compile a namespace plus metadata filter into a Milvus expression.
pub fn filter_expression(namespace: MemoryKind, filter: &RecordFilter) -> String {
    let mut clauses = vec![format!("namespace == {}", quote(namespace.as_ref()))];
    if let Some(user_id) = &filter.user_id {
        clauses.push(format!("user_id == {}", quote(user_id)));
    }
    if let Some(after) = filter.created_after {
        clauses.push(format!("created_at > {}", after.timestamp_micros()));
    }
    clauses.join(" && ")
}

impl MilvusVectorStore {
    pub fn new(uri: &str, token: Option<&str>, collection: &str, dims: usize) -> Self {
        Self {
            client: build_http_client(STORE_TIMEOUT_SECS, 5),
            base_url: uri.trim_end_matches('/').to_string(),
            cached_auth_header: token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| format!("Bearer {t}")),
            collection: collection.to_string(),
            dims,
        }
    }

    async fn call(&self, endpoint: &str, body: Value) -> Result<Value, StoreError> {
        let url = format!("{}/v2/vectordb/{endpoint}", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(auth) = &self.cached_auth_header {
            request = request.header("Authorization", auth);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| StoreError::backend(BACKEND, format!("{endpoint} request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::backend(
                BACKEND,
                format!("{endpoint} returned {status}: {}", sanitize_api_error(&body)),
            ));
        }

        let parsed: MilvusResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::backend(BACKEND, format!("{endpoint} decode failed: {e}")))?;

        if parsed.code != 0 {
            return Err(StoreError::backend(
                BACKEND,
                format!(
                    "{endpoint} failed with code {}: {}",
                    parsed.code,
                    parsed.message.as_deref().unwrap_or("no message")
                ),
            ));
        }
        tracing::debug!(endpoint, "Milvus call ok");
        Ok(parsed.data)
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

    fn entity(namespace: MemoryKind, record: &VectorRecord) -> Result<Value, StoreError> {
        let str_field = |key: &str| {
            record
                .payload
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let created_at = payload_created_at(&record.payload).ok_or_else(|| {
            StoreError::InvalidPayload {
                id: record.id.clone(),
                message: "missing or malformed created_at".into(),
            }
        })?;

        Ok(json!({
            "id": record.id,
            "namespace": namespace.as_ref(),
            "user_id": str_field("user_id"),
            "chat_id": str_field("chat_id"),
            "created_at": created_at.timestamp_micros(),
            "vector": record.vector,
            "payload": record.payload,
        }))
    }

    fn rows(data: Value) -> Result<Vec<EntityRow>, StoreError> {
        if data.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(data)
            .map_err(|e| StoreError::backend(BACKEND, format!("unexpected entity rows: {e}")))
    }

    /// Create the collection with its schema and a cosine index if it does
    /// not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let has = self
            .call(
                "collections/has",
                json!({ "collectionName": self.collection }),
            )
            .await?;
        if has.get("has").and_then(Value::as_bool) == Some(true) {
            return Ok(());
        }

        tracing::info!(
            collection = self.collection.as_str(),
            dims = self.dims,
            "Creating Milvus collection"
        );
        self.call(
            "collections/create",
            json!({
                "collectionName": self.collection,
                "schema": {
                    "autoId": false,
                    "enableDynamicField": false,
                    "fields": [
                        {"fieldName": "id", "dataType": "VarChar", "isPrimary": true,
                         "elementTypeParams": {"max_length": 64}},
                        {"fieldName": "namespace", "dataType": "VarChar",
                         "elementTypeParams": {"max_length": 16}},
                        {"fieldName": "user_id", "dataType": "VarChar",
                         "elementTypeParams": {"max_length": 256}},
                        {"fieldName": "chat_id", "dataType": "VarChar",
                         "elementTypeParams": {"max_length": 256}},
                        {"fieldName": "created_at", "dataType": "Int64"},
                        {"fieldName": "vector", "dataType": "FloatVector",
                         "elementTypeParams": {"dim": self.dims}},
                        {"fieldName": "payload", "dataType": "JSON"}
                    ]
                },
                "indexParams": [
                    {"fieldName": "vector", "indexName": "vector", "metricType": "COSINE"}
                ]
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MilvusVectorStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn upsert(&self, namespace: MemoryKind, record: VectorRecord) -> Result<(), StoreError> {
        self.check_dims(&record.id, record.vector.len())?;
        let entity = Self::entity(namespace, &record)?;
        self.call(
            "entities/upsert",
            json!({ "collectionName": self.collection, "data": [entity] }),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, namespace: MemoryKind, id: &str) -> Result<(), StoreError> {
        let filter = format!(
            "namespace == {} && id in [{}]",
            quote(namespace.as_ref()),
            quote(id)
        );
        self.call(
            "entities/delete",
            json!({ "collectionName": self.collection, "filter": filter }),
        )
        .await?;
        Ok(())
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

        let data = self
            .call(
                "entities/search",
                json!({
                    "collectionName": self.collection,
                    "data": [vector],
                    "annsField": "vector",
                    "limit": k,
                    "filter": filter_expression(namespace, filter),
                    "outputFields": OUTPUT_FIELDS,
                    "searchParams": {"metricType": "COSINE"}
                }),
            )
            .await?;

        let mut scored: Vec<ScoredRecord> = Self::rows(data)?
            .into_iter()
            .map(|row| ScoredRecord {
                score: row.distance.unwrap_or(0.0).clamp(0.0, 1.0),
                record: VectorRecord {
                    id: row.id,
                    vector: Vec::new(),
                    payload: row.payload,
                },
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn query(
        &self,
        namespace: MemoryKind,
        filter: &RecordFilter,
        limit: Option<usize>,
    ) -> Result<Vec<VectorRecord>, StoreError> {
        let limit = limit.unwrap_or(MAX_QUERY_LIMIT).min(MAX_QUERY_LIMIT);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut output_fields = OUTPUT_FIELDS.to_vec();
        output_fields.push("vector");
        let data = self
            .call(
                "entities/query",
                json!({
                    "collectionName": self.collection,
                    "filter": filter_expression(namespace, filter),
                    "outputFields": output_fields,
                    "limit": limit
                }),
            )
            .await?;

        let rows: Vec<Value> = match data {
            Value::Null => Vec::new(),
            Value::Array(rows) => rows,
            other => {
                return Err(StoreError::backend(
                    BACKEND,
                    format!("unexpected query result: {other}"),
                ));
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            #[allow(clippy::cast_possible_truncation)]
            let vector: Vec<f32> = row
                .get("vector")
                .and_then(Value::as_array)
                .map(|v| v.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
                .unwrap_or_default();
            let EntityRow { id, payload, .. } = serde_json::from_value(row)
                .map_err(|e| StoreError::backend(BACKEND, format!("unexpected entity row: {e}")))?;
            records.push(VectorRecord {
                id,
                vector,
                payload,
            });
        }

        // Milvus does not order query results.
        sort_by_creation(&mut records);
        Ok(records)
    }
}
