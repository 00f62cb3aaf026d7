use super::orchestrator::{consolidated_through, sort_batch};
use super::{ConsolidationOrchestrator, ConsolidationReport};
use crate::config::ConsolidationConfig;
use crate::error::{ConfigError, MnemoResult};
use crate::llm::LanguageModel;
use crate::memory::embeddings::EmbeddingGateway;
use crate::memory::store::{RecordFilter, VectorStore};
use crate::memory::types::{EpisodicMemory, MemoryKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

const STATE_FILE: &str = "consolidation_watermarks.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SchedulerState {
    /// Per user: `created_at` of the newest episodic record consolidated.
    watermarks: BTreeMap<String, DateTime<Utc>>,
    /// Per user: bookkeeping for records past the watermark.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    progress: BTreeMap<String, UserProgress>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
struct UserProgress {
    /// Records already through reconsolidation, rewritten or kept.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    settled: BTreeSet<String>,
    /// Failed runs per record.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    failures: BTreeMap<String, u32>,
    /// Consecutive runs held back by semantic write failures.
    #[serde(default)]
    semantic_failures: u32,
}

impl UserProgress {
    fn is_empty(&self) -> bool {
        self.settled.is_empty() && self.failures.is_empty() && self.semantic_failures == 0
    }
}

/// Outcome of one scheduler invocation.
#[derive(Debug)]
pub enum SchedulerRun {
    /// Fewer than `min_new_episodes` records past the watermark (or none at
    /// all when forced).
    Skipped { pending: usize },
    Consolidated {
        report: ConsolidationReport,
        previous_watermark: Option<DateTime<Utc>>,
        applied_watermark: Option<DateTime<Utc>>,
        /// Records that failed `max_record_attempts` runs in a row and were
        /// let past the watermark unconsolidated.
        abandoned: Vec<String>,
    },
}

fn state_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join("state").join(STATE_FILE)
}

fn state_file_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// A file that does not parse is an error, not an empty state: resetting
/// would re-consolidate every episode the user ever had.
fn load_state(workspace_dir: &Path) -> Result<SchedulerState, ConfigError> {
    let path = state_path(workspace_dir);
    if !path.exists() {
        return Ok(SchedulerState::default());
    }

    let raw = fs::read_to_string(&path)?;
    serde_json::from_str(&raw).map_err(|e| {
        ConfigError::Load(format!(
            "Corrupt scheduler state {}: {e}. Repair or remove the file to continue",
            path.display()
        ))
    })
}

fn save_state(workspace_dir: &Path, state: &SchedulerState) -> Result<(), ConfigError> {
    let path = state_path(workspace_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_vec_pretty(state)
        .map_err(|e| ConfigError::Load(format!("serialize scheduler state: {e}")))?;
    // Write-then-rename keeps a crash from leaving a truncated file.
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

type LockMap = BTreeMap<String, Arc<tokio::sync::Mutex<()>>>;

fn consolidation_locks() -> &'static Mutex<LockMap> {
    static LOCKS: OnceLock<Mutex<LockMap>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(BTreeMap::new()))
}

fn consolidation_lock(user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = consolidation_locks()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    locks
        .entry(user_id.to_owned())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

/// Drop the user's lock entry once no run holds or waits on it. Clones are
/// only taken under the map lock, so a count of one means the map is the
/// sole owner.
fn release_consolidation_lock(user_id: &str) {
    let mut locks = consolidation_locks()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if locks
        .get(user_id)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(user_id);
    }
}

/// What one run changed in the persisted state.
struct Settlement {
    applied_watermark: Option<DateTime<Utc>>,
    abandoned: Vec<String>,
}

/// Decides which episodic records are due and feeds them to the
/// orchestrator, one user at a time.
///
/// Eligible records are the user's episodic records created after the
/// persisted watermark, oldest first, capped at `batch_size` (extended to
/// keep equal timestamps together). The watermark only moves past records
/// the orchestrator reports as fully consolidated, so an interrupted or
/// partially failed run is picked up again by the next one. A record that
/// keeps failing is given up on after `max_record_attempts` runs, and
/// records whose rewrite already landed are not rewritten on retry.
pub struct ConsolidationScheduler {
    workspace_dir: PathBuf,
    config: ConsolidationConfig,
}

impl ConsolidationScheduler {
    pub fn new(workspace_dir: &Path, config: &ConsolidationConfig) -> Self {
        Self {
            workspace_dir: workspace_dir.to_path_buf(),
            config: config.clone(),
        }
    }

    pub fn watermark(&self, user_id: &str) -> MnemoResult<Option<DateTime<Utc>>> {
        let _file = state_file_lock()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(load_state(&self.workspace_dir)?
            .watermarks
            .get(user_id)
            .copied())
    }

    fn progress(&self, user_id: &str) -> MnemoResult<UserProgress> {
        let _file = state_file_lock()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(load_state(&self.workspace_dir)?
            .progress
            .remove(user_id)
            .unwrap_or_default())
    }

    /// Episodic records past the watermark, oldest first.
    pub async fn pending(
        &self,
        store: &dyn VectorStore,
        user_id: &str,
    ) -> MnemoResult<Vec<EpisodicMemory>> {
        let mut filter = RecordFilter::for_user(user_id);
        if let Some(watermark) = self.watermark(user_id)? {
            filter = filter.after(watermark);
        }

        let records = store.query(MemoryKind::Episodic, &filter, None).await?;
        let mut pending = Vec::with_capacity(records.len());
        for record in records {
            pending.push(EpisodicMemory::from_record(record)?);
        }
        sort_batch(&mut pending);
        Ok(pending)
    }

    /// Count-based trigger: enough new episodes have accumulated.
    pub async fn should_consolidate(
        &self,
        store: &dyn VectorStore,
        user_id: &str,
    ) -> MnemoResult<bool> {
        let pending = self.pending(store, user_id).await?.len();
        Ok(pending > 0 && pending >= self.config.min_new_episodes)
    }

    /// Take the oldest `batch_size` records, plus any that share the last
    /// one's timestamp.
    fn take_batch(&self, mut pending: Vec<EpisodicMemory>) -> Vec<EpisodicMemory> {
        let size = self.config.batch_size.max(1);
        if pending.len() > size {
            let cutoff = pending[size - 1].created_at;
            let end = pending[size..]
                .iter()
                .position(|m| m.created_at != cutoff)
                .map_or(pending.len(), |extra| size + extra);
            pending.truncate(end);
        }
        pending
    }

    /// Run one batch for `user_id` under the user's lock. `force` ignores the
    /// `min_new_episodes` trigger but still skips when nothing is pending.
    pub async fn run_once(
        &self,
        llm: &dyn LanguageModel,
        embedder: &EmbeddingGateway,
        store: &dyn VectorStore,
        user_id: &str,
        force: bool,
    ) -> MnemoResult<SchedulerRun> {
        let user_lock = consolidation_lock(user_id);
        let result = {
            let _guard = user_lock.lock().await;
            self.run_locked(llm, embedder, store, user_id, force).await
        };
        drop(user_lock);
        release_consolidation_lock(user_id);
        result
    }

    async fn run_locked(
        &self,
        llm: &dyn LanguageModel,
        embedder: &EmbeddingGateway,
        store: &dyn VectorStore,
        user_id: &str,
        force: bool,
    ) -> MnemoResult<SchedulerRun> {
        let previous_watermark = self.watermark(user_id)?;
        let pending = self.pending(store, user_id).await?;
        if pending.is_empty() || (!force && pending.len() < self.config.min_new_episodes) {
            tracing::debug!(user_id, pending = pending.len(), "Consolidation not due");
            return Ok(SchedulerRun::Skipped {
                pending: pending.len(),
            });
        }

        let batch = self.take_batch(pending);
        let order: Vec<(String, DateTime<Utc>)> =
            batch.iter().map(|m| (m.id.clone(), m.created_at)).collect();
        let progress = self.progress(user_id)?;
        tracing::info!(
            user_id,
            batch = batch.len(),
            settled = progress.settled.len(),
            "Starting consolidation batch"
        );

        let mut orchestrator = ConsolidationOrchestrator::new(llm, embedder, store, &self.config)
            .skip_reconsolidation(progress.settled);
        let report = orchestrator.consolidate(user_id, batch).await?;
        let settlement = self.settle(user_id, &order, &report)?;

        Ok(SchedulerRun::Consolidated {
            report,
            previous_watermark,
            applied_watermark: settlement.applied_watermark,
            abandoned: settlement.abandoned,
        })
    }

    /// Fold one run's outcome into the persisted state: count failures,
    /// remember committed rewrites, and advance the watermark past every
    /// record that is either done or given up on.
    fn settle(
        &self,
        user_id: &str,
        order: &[(String, DateTime<Utc>)],
        report: &ConsolidationReport,
    ) -> MnemoResult<Settlement> {
        let max_attempts = self.config.max_record_attempts.max(1);
        let failed = report.failed_record_ids();

        let _file = state_file_lock()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut state = load_state(&self.workspace_dir)?;
        let progress = state.progress.entry(user_id.to_string()).or_default();

        progress.settled.extend(
            report
                .reconsolidated
                .iter()
                .filter(|id| !failed.contains(id.as_str()))
                .cloned(),
        );

        let mut abandoned = Vec::new();
        for (id, _) in order {
            if !failed.contains(id.as_str()) {
                continue;
            }
            let attempts = progress.failures.entry(id.clone()).or_insert(0);
            *attempts += 1;
            if *attempts >= max_attempts {
                tracing::warn!(
                    user_id,
                    memory_id = id.as_str(),
                    attempts = *attempts,
                    "Giving up on episodic record after repeated failures"
                );
                abandoned.push(id.clone());
            }
        }

        let semantic_held = if report.semantic_blocked() {
            progress.semantic_failures += 1;
            if progress.semantic_failures >= max_attempts {
                tracing::warn!(
                    user_id,
                    attempts = progress.semantic_failures,
                    facts = report.fact_failures.len(),
                    "Giving up on semantic writes after repeated failures"
                );
                progress.semantic_failures = 0;
                false
            } else {
                true
            }
        } else {
            progress.semantic_failures = 0;
            false
        };

        let blocking: HashSet<&str> = failed
            .iter()
            .copied()
            .filter(|id| !abandoned.iter().any(|a| a == id))
            .collect();
        let through = if semantic_held {
            None
        } else {
            consolidated_through(order.iter().map(|(id, ts)| (id.as_str(), *ts)), &blocking)
        };

        let previous = state.watermarks.get(user_id).copied();
        let applied_watermark = match through {
            Some(to) if previous.is_none_or(|prev| to > prev) => {
                state.watermarks.insert(user_id.to_string(), to);
                Some(to)
            }
            _ => previous,
        };
        if let Some(watermark) = applied_watermark {
            for (id, _) in order.iter().filter(|(_, ts)| *ts <= watermark) {
                progress.settled.remove(id);
                progress.failures.remove(id);
            }
        }
        if progress.is_empty() {
            state.progress.remove(user_id);
        }

        save_state(&self.workspace_dir, &state)?;
        Ok(Settlement {
            applied_watermark,
            abandoned,
        })
    }
}
