use super::{CommitTarget, ConsolidationPhase, ConsolidationReport, EntryOutcome};
use crate::config::ConsolidationConfig;
use crate::error::{MnemoResult, StoreError};
use crate::llm::LanguageModel;
use crate::memory::embeddings::EmbeddingGateway;
use crate::memory::reconsolidator::{Reconsolidation, Reconsolidator};
use crate::memory::semantic_writer::{SemanticChange, SemanticWriter};
use crate::memory::store::{RecordFilter, VectorStore};
use crate::memory::types::{ConsolidationBatch, EpisodicMemory, MemoryKind, SemanticMemory};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// One staged write.
enum CommitOp {
    Episodic(EpisodicMemory),
    Semantic(SemanticChange),
}

impl CommitOp {
    fn target(&self) -> CommitTarget {
        match self {
            Self::Episodic(m) => CommitTarget::EpisodicUpdate { id: m.id.clone() },
            Self::Semantic(SemanticChange::Insert(m)) => {
                CommitTarget::SemanticInsert { id: m.id.clone() }
            }
            Self::Semantic(SemanticChange::Supersede { old_ids, new }) => {
                CommitTarget::SemanticSupersede {
                    old_ids: old_ids.clone(),
                    new_id: new.id.clone(),
                }
            }
        }
    }
}

/// Newer texts from the same chat, oldest first, joined by newlines and cut
/// to `max_chars` characters.
fn later_context(batch: &[EpisodicMemory], index: usize, max_chars: usize) -> Option<String> {
    let chat_id = &batch[index].chat_id;
    let joined = batch[index + 1..]
        .iter()
        .filter(|m| &m.chat_id == chat_id)
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if joined.is_empty() {
        return None;
    }
    Some(match joined.char_indices().nth(max_chars) {
        Some((cut, _)) => joined[..cut].to_string(),
        None => joined,
    })
}

/// Latest instant the next run may skip past, given `(id, created_at)`
/// pairs in batch order: every record at or before it was fully handled. A
/// failed record pins the watermark strictly before its own `created_at`, so
/// equal-timestamp siblings are retried with it.
pub(crate) fn consolidated_through<'r, I>(
    ordered: I,
    failed_ids: &HashSet<&str>,
) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = (&'r str, DateTime<Utc>)>,
{
    let ordered: Vec<(&str, DateTime<Utc>)> = ordered.into_iter().collect();
    match ordered.iter().position(|(id, _)| failed_ids.contains(id)) {
        None => ordered.last().map(|(_, ts)| *ts),
        Some(i) => {
            let failed_at = ordered[i].1;
            ordered[..i]
                .iter()
                .rev()
                .map(|(_, ts)| *ts)
                .find(|ts| *ts < failed_at)
        }
    }
}

/// Batch order: oldest first, ties broken by id.
pub(crate) fn sort_batch(batch: &mut [EpisodicMemory]) {
    batch.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Runs one consolidation batch for one user:
/// `Idle → Batching → Reconsolidating → Writing → Committing → Idle`.
///
/// Holds no state between runs beyond the current phase. Callers serialize
/// runs per user.
pub struct ConsolidationOrchestrator<'a> {
    llm: &'a dyn LanguageModel,
    embedder: &'a EmbeddingGateway,
    store: &'a dyn VectorStore,
    config: &'a ConsolidationConfig,
    settled: HashSet<String>,
    phase: ConsolidationPhase,
}

impl<'a> ConsolidationOrchestrator<'a> {
    pub fn new(
        llm: &'a dyn LanguageModel,
        embedder: &'a EmbeddingGateway,
        store: &'a dyn VectorStore,
        config: &'a ConsolidationConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            store,
            config,
            settled: HashSet::new(),
            phase: ConsolidationPhase::Idle,
        }
    }

    /// Records whose rewrite an earlier run already committed. They still
    /// feed extraction and context, but are not rewritten again.
    pub fn skip_reconsolidation(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.settled = ids.into_iter().collect();
        self
    }

    pub fn phase(&self) -> ConsolidationPhase {
        self.phase
    }

    fn enter(&mut self, phase: ConsolidationPhase, user_id: &str) {
        tracing::debug!(user_id, from = %self.phase, to = %phase, "Consolidation phase change");
        self.phase = phase;
    }

    /// Consolidate `records` for `user_id`. Only loading the user's semantic
    /// set can fail the run as a whole; everything after that is reported
    /// per entry.
    pub async fn consolidate(
        &mut self,
        user_id: &str,
        records: Vec<EpisodicMemory>,
    ) -> MnemoResult<ConsolidationReport> {
        let result = self.run(user_id, records).await;
        self.enter(ConsolidationPhase::Idle, user_id);
        result
    }

    async fn run(
        &mut self,
        user_id: &str,
        records: Vec<EpisodicMemory>,
    ) -> MnemoResult<ConsolidationReport> {
        // ── Batching ──
        self.enter(ConsolidationPhase::Batching, user_id);
        let mut batch: Vec<EpisodicMemory> = records
            .into_iter()
            .filter(|m| {
                let own = m.user_id == user_id;
                if !own {
                    tracing::warn!(
                        user_id,
                        memory_id = m.id.as_str(),
                        "Dropping record of another user from batch"
                    );
                }
                own
            })
            .collect();
        sort_batch(&mut batch);

        let mut report = ConsolidationReport {
            user_id: user_id.to_string(),
            batch_len: batch.len(),
            ..ConsolidationReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let existing = self.load_semantic(user_id).await?;

        // ── Reconsolidating ──
        self.enter(ConsolidationPhase::Reconsolidating, user_id);
        let mut staged = Vec::new();
        let contexts: Vec<Option<String>> = (0..batch.len())
            .map(|i| later_context(&batch, i, self.config.max_context_chars))
            .collect();
        let reconsolidator = Reconsolidator::new(self.llm);
        for (slot, context) in batch.iter_mut().zip(contexts) {
            let Some(context) = context else {
                continue;
            };
            if self.settled.contains(&slot.id) {
                report.reconsolidation_skipped += 1;
                continue;
            }
            report.reconsolidated.push(slot.id.clone());
            let Reconsolidation::Rewritten(mut updated) =
                reconsolidator.reconsolidate(slot, &context).await
            else {
                continue;
            };
            match self.embedder.embed_one(&updated.text).await {
                Ok(embedding) => {
                    updated.embedding = embedding;
                    *slot = updated.clone();
                    staged.push(CommitOp::Episodic(updated));
                    report.rewritten += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        memory_id = slot.id.as_str(),
                        error = %e,
                        "Re-embedding rewritten memory failed"
                    );
                    report.reembed_failures.push((slot.id.clone(), e));
                }
            }
        }

        // ── Writing ──
        self.enter(ConsolidationPhase::Writing, user_id);
        let writer = SemanticWriter::new(
            self.llm,
            self.embedder,
            self.config.narrative_similarity_threshold,
        );
        let extraction = writer
            .extract(&ConsolidationBatch {
                episodic_texts: batch.iter().map(|m| m.text.clone()).collect(),
                existing_semantic_texts: existing.iter().map(|m| m.text.clone()).collect(),
            })
            .await;
        if extraction.write_semantic {
            let plan = writer.merge(user_id, &extraction.facts, &existing).await;
            staged.extend(plan.changes.into_iter().map(CommitOp::Semantic));
            report.duplicate_facts = plan.duplicates;
            report.fact_failures = plan.failures;
        }
        report.extraction = extraction;

        // ── Committing ──
        self.enter(ConsolidationPhase::Committing, user_id);
        for op in staged {
            report.entries.push(self.commit(op).await);
        }

        let through = if report.semantic_blocked() {
            None
        } else {
            consolidated_through(
                batch.iter().map(|m| (m.id.as_str(), m.created_at)),
                &report.failed_record_ids(),
            )
        };
        report.consolidated_through = through;

        tracing::info!(
            user_id,
            batch = report.batch_len,
            rewritten = report.rewritten,
            facts = report.extraction.facts.len(),
            semantic_written = report.semantic_written(),
            failed = report.failed_entries().count(),
            "Consolidation batch finished"
        );
        Ok(report)
    }

    async fn load_semantic(&self, user_id: &str) -> MnemoResult<Vec<SemanticMemory>> {
        let records = self
            .store
            .query(MemoryKind::Semantic, &RecordFilter::for_user(user_id), None)
            .await?;
        let mut memories = Vec::with_capacity(records.len());
        for record in records {
            memories.push(SemanticMemory::from_record(record)?);
        }
        Ok(memories)
    }

    async fn apply(&self, op: &CommitOp) -> Result<(), StoreError> {
        match op {
            CommitOp::Episodic(m) => self.store.upsert(MemoryKind::Episodic, m.to_record()?).await,
            CommitOp::Semantic(SemanticChange::Insert(m)) => {
                self.store.upsert(MemoryKind::Semantic, m.to_record()?).await
            }
            CommitOp::Semantic(SemanticChange::Supersede { old_ids, new }) => {
                self.store
                    .upsert(MemoryKind::Semantic, new.to_record()?)
                    .await?;
                for old_id in old_ids {
                    match self.store.delete(MemoryKind::Semantic, old_id).await {
                        Ok(()) | Err(StoreError::NotFound { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            }
        }
    }

    /// One attempt plus up to `commit_retries` individual retries.
    async fn commit(&self, op: CommitOp) -> EntryOutcome {
        let target = op.target();
        let max_attempts = self.config.commit_retries.saturating_add(1);
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < max_attempts {
            attempts += 1;
            match self.apply(&op).await {
                Ok(()) => {
                    return EntryOutcome {
                        target,
                        attempts,
                        error: None,
                    };
                }
                Err(e) => {
                    tracing::warn!(?target, attempt = attempts, error = %e, "Commit entry failed");
                    last_error = Some(e);
                }
            }
        }

        EntryOutcome {
            target,
            attempts,
            error: last_error,
        }
    }
}
