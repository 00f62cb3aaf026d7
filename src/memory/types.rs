use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Which half of memory a record lives in. Also the store namespace.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MemoryKind {
    Semantic,
    Episodic,
}

/// A stored vector with its JSON payload. The payload is the memory record
/// minus its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    pub score: f32,
}

// ── Episodic ──────────────────────────────────────────────────────

/// One observed interaction. Reconsolidation may replace `text` and
/// `embedding`; the other fields never change after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodicMemory {
    pub id: String,
    pub user_id: String,
    pub chat_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EpisodicPayload {
    id: String,
    user_id: String,
    chat_id: String,
    text: String,
    created_at: DateTime<Utc>,
}

impl EpisodicMemory {
    pub fn to_record(&self) -> Result<VectorRecord, StoreError> {
        let payload = EpisodicPayload {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            chat_id: self.chat_id.clone(),
            text: self.text.clone(),
            created_at: self.created_at,
        };
        Ok(VectorRecord {
            id: self.id.clone(),
            vector: self.embedding.clone(),
            payload: encode_payload(&self.id, &payload)?,
        })
    }

    pub fn from_record(record: VectorRecord) -> Result<Self, StoreError> {
        let payload: EpisodicPayload = decode_payload(&record)?;
        check_payload_id(&record.id, &payload.id)?;
        Ok(Self {
            id: payload.id,
            user_id: payload.user_id,
            chat_id: payload.chat_id,
            text: payload.text,
            embedding: record.vector,
            created_at: payload.created_at,
        })
    }
}

// ── Semantic ──────────────────────────────────────────────────────

/// A durable fact about a user, distilled from episodes.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMemory {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SemanticPayload {
    id: String,
    user_id: String,
    text: String,
    created_at: DateTime<Utc>,
}

impl SemanticMemory {
    pub fn to_record(&self) -> Result<VectorRecord, StoreError> {
        let payload = SemanticPayload {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            text: self.text.clone(),
            created_at: self.created_at,
        };
        Ok(VectorRecord {
            id: self.id.clone(),
            vector: self.embedding.clone(),
            payload: encode_payload(&self.id, &payload)?,
        })
    }

    pub fn from_record(record: VectorRecord) -> Result<Self, StoreError> {
        let payload: SemanticPayload = decode_payload(&record)?;
        check_payload_id(&record.id, &payload.id)?;
        Ok(Self {
            id: payload.id,
            user_id: payload.user_id,
            text: payload.text,
            embedding: record.vector,
            created_at: payload.created_at,
        })
    }
}

fn encode_payload<T: Serialize>(id: &str, payload: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(payload).map_err(|e| StoreError::InvalidPayload {
        id: id.to_string(),
        message: e.to_string(),
    })
}

fn decode_payload<T: for<'de> Deserialize<'de>>(record: &VectorRecord) -> Result<T, StoreError> {
    T::deserialize(&record.payload).map_err(|e| StoreError::InvalidPayload {
        id: record.id.clone(),
        message: e.to_string(),
    })
}

fn check_payload_id(record_id: &str, payload_id: &str) -> Result<(), StoreError> {
    if record_id == payload_id {
        Ok(())
    } else {
        Err(StoreError::InvalidPayload {
            id: record_id.to_string(),
            message: format!("payload id {payload_id} does not match record id"),
        })
    }
}

// ── Consolidation inputs/outputs ──────────────────────────────────

/// What the semantic writer sees for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationBatch {
    pub episodic_texts: Vec<String>,
    pub existing_semantic_texts: Vec<String>,
}

/// Structured extraction result. `facts` is empty exactly when
/// `write_semantic` is false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub write_semantic: bool,
    #[serde(default)]
    pub facts: Vec<String>,
}

// ── Retrieval ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RecalledMemory {
    pub id: String,
    pub text: String,
    /// Similarity to the query; `None` when the memory was included without
    /// ranking (the "all semantic" mode).
    pub score: Option<f32>,
    pub created_at: DateTime<Utc>,
}

/// Retrieval output, semantic facts first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryContext {
    pub semantic: Vec<RecalledMemory>,
    pub episodic: Vec<RecalledMemory>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.semantic.is_empty() && self.episodic.is_empty()
    }

    /// All recalled memories in presentation order.
    pub fn iter(&self) -> impl Iterator<Item = &RecalledMemory> {
        self.semantic.iter().chain(self.episodic.iter())
    }

    /// Render as a prompt block. Empty context renders as an empty string.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.semantic.is_empty() {
            out.push_str("[Known facts]\n");
            for m in &self.semantic {
                let _ = writeln!(out, "- {}", m.text);
            }
        }
        if !self.episodic.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("[Related episodes]\n");
            for m in &self.episodic {
                let _ = writeln!(out, "- ({}) {}", m.created_at.format("%Y-%m-%d"), m.text);
            }
        }
        out
    }
}
