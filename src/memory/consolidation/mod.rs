//! Episodic → semantic consolidation: the per-batch state machine and the
//! watermark scheduler that feeds it.

pub mod orchestrator;
pub mod scheduler;

use crate::error::{GatewayError, StoreError};
use crate::memory::types::ExtractionResult;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub use orchestrator::ConsolidationOrchestrator;
pub use scheduler::{ConsolidationScheduler, SchedulerRun};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConsolidationPhase {
    Idle,
    Batching,
    Reconsolidating,
    Writing,
    Committing,
}

/// What a commit entry writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitTarget {
    EpisodicUpdate { id: String },
    SemanticInsert { id: String },
    SemanticSupersede {
        old_ids: Vec<String>,
        new_id: String,
    },
}

#[derive(Debug)]
pub struct EntryOutcome {
    pub target: CommitTarget,
    pub attempts: u32,
    /// Last error when every attempt failed.
    pub error: Option<StoreError>,
}

impl EntryOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-run summary. Failures are reported per entry; nothing here aborts a
/// run.
#[derive(Debug, Default)]
pub struct ConsolidationReport {
    pub user_id: String,
    /// Episodic records considered, after dropping foreign ones.
    pub batch_len: usize,
    pub rewritten: usize,
    /// Records sent to the reconsolidator this run, rewritten or kept.
    pub reconsolidated: Vec<String>,
    /// Records whose episodic step was already committed by an earlier run.
    pub reconsolidation_skipped: usize,
    /// Rewritten records whose new text could not be embedded; their stored
    /// version is left untouched.
    pub reembed_failures: Vec<(String, GatewayError)>,
    pub extraction: ExtractionResult,
    pub duplicate_facts: Vec<String>,
    pub fact_failures: Vec<(String, GatewayError)>,
    pub entries: Vec<EntryOutcome>,
    /// Latest `created_at` such that every record up to it was fully
    /// consolidated. `None` when nothing in the batch may be skipped on the
    /// next run.
    pub consolidated_through: Option<DateTime<Utc>>,
}

impl ConsolidationReport {
    pub fn failed_entries(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.entries.iter().filter(|e| !e.succeeded())
    }

    pub fn is_clean(&self) -> bool {
        self.failed_entries().next().is_none()
            && self.reembed_failures.is_empty()
            && self.fact_failures.is_empty()
    }

    /// Episodic records whose rewrite could not be embedded or committed.
    pub fn failed_record_ids(&self) -> HashSet<&str> {
        self.reembed_failures
            .iter()
            .map(|(id, _)| id.as_str())
            .chain(self.failed_entries().filter_map(|e| match &e.target {
                CommitTarget::EpisodicUpdate { id } => Some(id.as_str()),
                _ => None,
            }))
            .collect()
    }

    /// A fact could not be embedded or a semantic write failed. Such
    /// failures belong to no single record, so they hold back the whole
    /// batch.
    pub fn semantic_blocked(&self) -> bool {
        !self.fact_failures.is_empty()
            || self
                .failed_entries()
                .any(|e| !matches!(e.target, CommitTarget::EpisodicUpdate { .. }))
    }

    pub fn semantic_written(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| {
                e.succeeded()
                    && matches!(
                        e.target,
                        CommitTarget::SemanticInsert { .. } | CommitTarget::SemanticSupersede { .. }
                    )
            })
            .count()
    }
}
