use crate::error::GatewayError;
use crate::llm::{LanguageModel, chat_json};
use crate::memory::embeddings::EmbeddingGateway;
use crate::memory::types::{ConsolidationBatch, ExtractionResult, SemanticMemory};
use crate::memory::vector::{best_match, cosine_similarity};
use chrono::Utc;
use std::collections::HashSet;
use std::fmt::Write as _;

const EXTRACT_SYSTEM_PROMPT: &str = r#"You distill durable facts about a user from their recent conversations.
You receive new episodic memories and the facts already known about the user.
Decide whether the episodes reveal stable facts (identity, preferences, relationships,
habits, plans, corrections to known facts) that are NOT already covered by the known facts.
Ignore small talk and one-off details.
If so, write each new or updated fact as one short standalone sentence about the user.
When a fact updates a known fact, write the complete updated fact.
Respond with JSON only:
{"write_semantic": true, "facts": ["..."]}
or, when nothing new should be stored:
{"write_semantic": false, "facts": []}"#;

fn build_extract_prompt(batch: &ConsolidationBatch) -> String {
    let mut prompt = String::from("New episodic memories:\n");
    for (i, text) in batch.episodic_texts.iter().enumerate() {
        let _ = writeln!(prompt, "{}. {text}", i + 1);
    }
    prompt.push_str("\nKnown facts:\n");
    if batch.existing_semantic_texts.is_empty() {
        prompt.push_str("(none)\n");
    }
    for text in &batch.existing_semantic_texts {
        let _ = writeln!(prompt, "- {text}");
    }
    prompt
}

/// Enforce the extraction contract on raw model output: trimmed, non-empty,
/// first-occurrence-unique facts, and `facts` empty exactly when
/// `write_semantic` is false.
pub fn normalize_extraction(raw: ExtractionResult) -> ExtractionResult {
    if !raw.write_semantic {
        return ExtractionResult::default();
    }

    let mut seen = HashSet::new();
    let facts: Vec<String> = raw
        .facts
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty() && seen.insert(*f))
        .map(str::to_string)
        .collect();

    ExtractionResult {
        write_semantic: !facts.is_empty(),
        facts,
    }
}

/// A staged change to a user's semantic memory.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticChange {
    Insert(SemanticMemory),
    /// Replace every live fact close to `new`: insert `new`, then delete
    /// each of `old_ids`.
    Supersede {
        old_ids: Vec<String>,
        new: SemanticMemory,
    },
}

impl SemanticChange {
    pub fn memory(&self) -> &SemanticMemory {
        match self {
            Self::Insert(new) | Self::Supersede { new, .. } => new,
        }
    }
}

/// Result of merging extracted facts into the live semantic set.
#[derive(Debug, Default)]
pub struct MergePlan {
    pub changes: Vec<SemanticChange>,
    /// Facts dropped as duplicates of a live fact or an earlier candidate.
    pub duplicates: Vec<String>,
    /// Facts that could not be embedded.
    pub failures: Vec<(String, GatewayError)>,
}

/// Decides whether a batch yields new facts and merges them without
/// duplicating existing knowledge.
pub struct SemanticWriter<'a> {
    llm: &'a dyn LanguageModel,
    embedder: &'a EmbeddingGateway,
    similarity_threshold: f32,
}

impl<'a> SemanticWriter<'a> {
    pub fn new(
        llm: &'a dyn LanguageModel,
        embedder: &'a EmbeddingGateway,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            llm,
            embedder,
            similarity_threshold,
        }
    }

    /// Never fails. Unusable model output yields "nothing to write".
    pub async fn extract(&self, batch: &ConsolidationBatch) -> ExtractionResult {
        if batch.episodic_texts.is_empty() {
            return ExtractionResult::default();
        }

        let raw = chat_json(
            self.llm,
            EXTRACT_SYSTEM_PROMPT,
            &build_extract_prompt(batch),
            ExtractionResult::default(),
        )
        .await;
        let result = normalize_extraction(raw);
        tracing::debug!(
            write_semantic = result.write_semantic,
            facts = result.facts.len(),
            "Semantic extraction finished"
        );
        result
    }

    /// Embed each fact and compare against the live set and against the
    /// facts accepted earlier in this call. A new fact supersedes every live
    /// fact at or above the threshold, and a live fact is superseded at most
    /// once per call.
    pub async fn merge(
        &self,
        user_id: &str,
        facts: &[String],
        existing: &[SemanticMemory],
    ) -> MergePlan {
        let mut plan = MergePlan::default();
        let live_texts: HashSet<&str> = existing.iter().map(|m| m.text.trim()).collect();
        let mut superseded: HashSet<&str> = HashSet::new();
        let mut accepted: Vec<Vec<f32>> = Vec::new();

        let embedded = self.embed_facts(facts).await;
        for (fact, embedding) in facts.iter().zip(embedded) {
            let embedding = match embedding {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Skipping fact that could not be embedded");
                    plan.failures.push((fact.clone(), e));
                    continue;
                }
            };

            if live_texts.contains(fact.trim()) {
                plan.duplicates.push(fact.clone());
                continue;
            }

            if best_match(&embedding, accepted.iter().map(Vec::as_slice))
                .is_some_and(|(_, score)| score >= self.similarity_threshold)
            {
                plan.duplicates.push(fact.clone());
                continue;
            }

            let close: Vec<&SemanticMemory> = existing
                .iter()
                .filter(|m| !superseded.contains(m.id.as_str()))
                .filter(|m| {
                    cosine_similarity(&embedding, &m.embedding) >= self.similarity_threshold
                })
                .collect();

            let new = SemanticMemory {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                text: fact.clone(),
                embedding: embedding.clone(),
                created_at: Utc::now(),
            };
            accepted.push(embedding);

            if close.is_empty() {
                plan.changes.push(SemanticChange::Insert(new));
                continue;
            }
            let old_ids: Vec<String> = close.iter().map(|m| m.id.clone()).collect();
            tracing::debug!(user_id, old_ids = ?old_ids, "Fact supersedes live facts");
            superseded.extend(close.iter().map(|m| m.id.as_str()));
            plan.changes.push(SemanticChange::Supersede { old_ids, new });
        }

        plan
    }

    /// One batch call; on failure, retry per fact so a single bad input only
    /// costs that fact.
    async fn embed_facts(&self, facts: &[String]) -> Vec<Result<Vec<f32>, GatewayError>> {
        let texts: Vec<&str> = facts.iter().map(String::as_str).collect();
        match self.embedder.embed(&texts).await {
            Ok(vectors) => vectors.into_iter().map(Ok).collect(),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    "Batch fact embedding failed, falling back to per-fact"
                );
                let mut out = Vec::with_capacity(facts.len());
                for text in texts {
                    out.push(self.embedder.embed_one(text).await);
                }
                out
            }
        }
    }
}
