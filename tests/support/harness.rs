#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use mnemo::error::GatewayError;
use mnemo::llm::LanguageModel;
use mnemo::memory::{EmbeddingGateway, EmbeddingProvider, EpisodicMemory};

pub const DIMS: usize = 32;

/// Gives every distinct text its own axis, in order of first appearance:
/// equal texts embed identically and distinct texts are orthogonal (until
/// more than `DIMS` texts have been seen).
#[derive(Default)]
pub struct VocabularyEmbedding {
    axes: Mutex<HashMap<String, usize>>,
}

impl VocabularyEmbedding {
    fn vector(&self, text: &str) -> Vec<f32> {
        let mut axes = self.axes.lock().unwrap();
        let next = axes.len();
        let axis = *axes.entry(text.to_string()).or_insert(next) % DIMS;
        let mut v = vec![0.0; DIMS];
        v[axis] = 1.0;
        v
    }
}

#[async_trait]
impl EmbeddingProvider for VocabularyEmbedding {
    fn name(&self) -> &str {
        "vocabulary"
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

pub fn embedder() -> EmbeddingGateway {
    EmbeddingGateway::new(Arc::new(VocabularyEmbedding::default()), DIMS)
}

/// Language model driven by a closure over `(system, user)`. Records every
/// call.
pub struct ScriptedModel<F> {
    reply: F,
    calls: AtomicUsize,
    pub prompts: Mutex<Vec<(String, String)>>,
}

impl<F> ScriptedModel<F>
where
    F: Fn(&str, &str) -> Option<String> + Send + Sync,
{
    pub fn new(reply: F) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> LanguageModel for ScriptedModel<F>
where
    F: Fn(&str, &str) -> Option<String> + Send + Sync,
{
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        (self.reply)(system, user).ok_or_else(|| GatewayError::llm("scripted", "offline"))
    }
}

/// True when the system prompt asks for structured fact extraction.
pub fn is_extraction(system: &str) -> bool {
    system.contains("Respond with JSON")
}

pub fn at(mins: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 8, 0, 0).unwrap() + Duration::minutes(mins)
}

pub async fn episode(
    embedder: &EmbeddingGateway,
    id: &str,
    user_id: &str,
    chat_id: &str,
    text: &str,
    created_at: DateTime<Utc>,
) -> EpisodicMemory {
    EpisodicMemory {
        id: id.to_string(),
        user_id: user_id.to_string(),
        chat_id: chat_id.to_string(),
        text: text.to_string(),
        embedding: embedder.embed_one(text).await.unwrap(),
        created_at,
    }
}
