use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Semantic matches returned per query
    #[serde(default = "default_k_semantic")]
    pub k_semantic: usize,
    /// Episodic matches returned per query
    #[serde(default = "default_k_episodic")]
    pub k_episodic: usize,
    /// Return every semantic memory of the user instead of the top-k.
    /// Works better than similarity filtering while the fact set is small.
    #[serde(default = "default_use_all_semantic")]
    pub use_all_semantic: bool,
    /// Upper bound on the exhaustive semantic listing
    #[serde(default = "default_max_all_semantic")]
    pub max_all_semantic: usize,
}

fn default_k_semantic() -> usize {
    5
}
fn default_k_episodic() -> usize {
    5
}
fn default_use_all_semantic() -> bool {
    true
}
fn default_max_all_semantic() -> usize {
    200
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_semantic: default_k_semantic(),
            k_episodic: default_k_episodic(),
            use_all_semantic: default_use_all_semantic(),
            max_all_semantic: default_max_all_semantic(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Cosine similarity at or above which two facts are the same fact
    #[serde(default = "default_narrative_similarity_threshold")]
    pub narrative_similarity_threshold: f32,
    /// Max episodic records handed to one orchestrator run
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// New episodic records past the watermark before a run is due
    #[serde(default = "default_min_new_episodes")]
    pub min_new_episodes: usize,
    /// Cap on the later-context text passed to the reconsolidator
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    /// Individual re-attempts for a failed commit entry
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,
    /// Failed runs a record (or the batch's semantic writes) may hold the
    /// watermark back before it is given up on
    #[serde(default = "default_max_record_attempts")]
    pub max_record_attempts: u32,
}

fn default_narrative_similarity_threshold() -> f32 {
    0.8
}
fn default_batch_size() -> usize {
    50
}
fn default_min_new_episodes() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    2_000
}
fn default_commit_retries() -> u32 {
    1
}
fn default_max_record_attempts() -> u32 {
    3
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            narrative_similarity_threshold: default_narrative_similarity_threshold(),
            batch_size: default_batch_size(),
            min_new_episodes: default_min_new_episodes(),
            max_context_chars: default_max_context_chars(),
            commit_retries: default_commit_retries(),
            max_record_attempts: default_max_record_attempts(),
        }
    }
}
