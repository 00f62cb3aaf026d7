use super::{Config, StoreBackend};
use std::path::PathBuf;

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn apply_env_overrides(&mut self) {
        // ── Vector store ──────────────────────────────────────────
        if let Some(uri) = non_empty_var("MILVUS_URL") {
            self.store.milvus_uri = Some(uri);
            self.store.backend = StoreBackend::Milvus;
        }

        if let Some(token) = non_empty_var("MILVUS_TOKEN") {
            self.store.milvus_token = Some(token);
        }

        // ── Embedding ─────────────────────────────────────────────
        if let Some(key) = non_empty_var("SILICONFLOW_API_KEY") {
            self.embedding.api_key = Some(key);
        }

        if let Some(base_url) = non_empty_var("SILICONFLOW_BASE_URL") {
            self.embedding.base_url = base_url;
        }

        if let Some(model) = non_empty_var("SILICONFLOW_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }

        // ── LLM endpoints ─────────────────────────────────────────
        for (name, key_var, url_var, model_var) in [
            (
                "deepseek",
                "DEEPSEEK_API_KEY",
                "DEEPSEEK_BASE_URL",
                Some("DEEPSEEK_MODEL"),
            ),
            ("openrouter", "OPENROUTER_API_KEY", "OPENROUTER_BASE_URL", None),
            ("glm", "GLM_API_KEY", "GLM_BASE_URL", Some("GLM_MODEL")),
        ] {
            let Some(endpoint) = self.llm.endpoint_mut(name) else {
                continue;
            };
            if let Some(key) = non_empty_var(key_var) {
                endpoint.api_key = Some(key);
            }
            if let Some(url) = non_empty_var(url_var) {
                endpoint.base_url = url;
            }
            if let Some(model) = model_var.and_then(non_empty_var) {
                endpoint.model = model;
            }
        }

        // ── Retrieval / consolidation ─────────────────────────────
        if let Some(k) = non_empty_var("K_SEMANTIC").and_then(|v| v.parse::<usize>().ok()) {
            self.retrieval.k_semantic = k;
        }

        if let Some(k) = non_empty_var("K_EPISODIC").and_then(|v| v.parse::<usize>().ok()) {
            self.retrieval.k_episodic = k;
        }

        if let Some(flag) = non_empty_var("USE_ALL_SEMANTIC") {
            self.retrieval.use_all_semantic = flag.trim().eq_ignore_ascii_case("true");
        }

        if let Some(threshold) = non_empty_var("NARRATIVE_SIMILARITY_THRESHOLD")
            .and_then(|v| v.parse::<f32>().ok())
        {
            self.consolidation.narrative_similarity_threshold = threshold;
        }

        if let Some(workspace) = non_empty_var("MNEMO_WORKSPACE") {
            self.workspace_dir = PathBuf::from(workspace);
        }
    }
}
