use crate::config::EmbeddingConfig;
use crate::error::GatewayError;
use crate::providers::api_error;
use crate::providers::http_client::{EMBEDDING_TIMEOUT_SECS, build_http_client};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Trait for embedding providers: convert text to vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Embedding dimensions
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts into vectors
    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed_one(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut results = self.embed(&[text]).await?;
        results
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding result"))
    }
}

// ── Gateway (dimension-checked boundary) ─────────────────────

/// Wraps a provider and guarantees every returned vector has the configured
/// dimension. All core components embed through this.
#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    dims: usize,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dims: usize) -> Self {
        Self { provider, dims }
    }

    pub fn dimensions(&self) -> usize {
        self.dims
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, GatewayError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self
            .provider
            .embed(texts)
            .await
            .map_err(|e| GatewayError::embedding(self.provider.name(), format!("{e:#}")))?;

        if vectors.len() != texts.len() {
            return Err(GatewayError::embedding(
                self.provider.name(),
                format!(
                    "returned {} vectors for {} inputs",
                    vectors.len(),
                    texts.len()
                ),
            ));
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(GatewayError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            });
        }

        Ok(vectors)
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let mut vectors = self.embed(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| GatewayError::embedding(self.provider.name(), "empty embedding result"))
    }
}

// ── Deterministic provider (tests) ───────────────────────────

#[cfg(test)]
pub(crate) struct DeterministicEmbedding {
    dims: usize,
    seed: u64,
}

#[cfg(test)]
impl DeterministicEmbedding {
    pub(crate) fn new(dims: usize) -> Self {
        Self { dims, seed: 0 }
    }

    fn fnv1a64(seed: u64, bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ seed;
        for &b in bytes {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }

    fn splitmix64(mut x: u64) -> u64 {
        x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = x;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    #[allow(clippy::cast_precision_loss)]
    fn u64_to_unit_f32(x: u64) -> f32 {
        const U24_MAX: f32 = ((1u32 << 24) - 1) as f32;
        let top_u24: u32 = (x >> 40) as u32;
        (top_u24 as f32 / U24_MAX) * 2.0 - 1.0
    }
}

#[cfg(test)]
#[async_trait]
impl EmbeddingProvider for DeterministicEmbedding {
    fn name(&self) -> &str {
        "deterministic_test"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for &t in texts {
            let base = Self::fnv1a64(self.seed, t.as_bytes());
            let v = (0..self.dims)
                .map(|i| Self::u64_to_unit_f32(Self::splitmix64(base ^ (i as u64))))
                .collect();
            out.push(v);
        }
        Ok(out)
    }
}

// ── Noop provider ────────────────────────────────────────────

/// Placeholder when no embedding backend is configured. Every embed through
/// the gateway fails, which keeps writes from landing without vectors.
pub struct NoopEmbedding;

#[async_trait]
impl EmbeddingProvider for NoopEmbedding {
    fn name(&self) -> &str {
        "none"
    }

    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(Vec::new())
    }
}

// ── OpenAI-compatible embedding provider ─────────────────────

pub struct OpenAiEmbedding {
    name: String,
    client: reqwest::Client,
    cached_embeddings_url: String,
    cached_auth_header: Option<String>,
    model: String,
    dims: usize,
}

#[derive(Copy, Clone, Debug)]
struct CustomBaseUrlPolicy {
    allow_http: bool,
}

fn is_ssrf_blocked_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_ssrf_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }

    let seg0 = ip.segments()[0];
    let is_link_local = (seg0 & 0xffc0) == 0xfe80;
    let is_unique_local = (seg0 & 0xfe00) == 0xfc00;

    is_link_local || is_unique_local
}

fn is_ssrf_blocked_host(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.eq_ignore_ascii_case("metadata.google.internal")
        || host.eq_ignore_ascii_case("localhost")
    {
        return true;
    }

    match host.to_ascii_lowercase().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_ssrf_blocked_ipv4(v4),
        Ok(IpAddr::V6(v6)) => is_ssrf_blocked_ipv6(v6),
        Err(_) => false,
    }
}

fn validate_custom_base_url(raw: &str, policy: CustomBaseUrlPolicy) -> anyhow::Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("custom embedding base URL is empty");
    }

    let url = reqwest::Url::parse(raw)
        .map_err(|_| anyhow::anyhow!("invalid custom embedding base URL"))?;

    match url.scheme() {
        "https" => {}
        "http" if policy.allow_http => {}
        "http" => anyhow::bail!("custom embedding base URL must use https"),
        _ => anyhow::bail!("custom embedding base URL must use http(s)"),
    }

    if !url.username().is_empty() || url.password().is_some() {
        anyhow::bail!("custom embedding base URL must not include userinfo");
    }

    if url.query().is_some() || url.fragment().is_some() {
        anyhow::bail!("custom embedding base URL must not include query or fragment");
    }

    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("custom embedding base URL missing host"))?;

    if is_ssrf_blocked_host(host) {
        anyhow::bail!("custom embedding base URL host is blocked");
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

impl OpenAiEmbedding {
    /// `base_url` includes the API version segment, e.g.
    /// `https://api.siliconflow.cn/v1`.
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        dims: usize,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            name: name.to_string(),
            client: build_http_client(EMBEDDING_TIMEOUT_SECS, 3),
            cached_embeddings_url: format!("{base}/embeddings"),
            cached_auth_header: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| format!("Bearer {k}")),
            model: model.to_string(),
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
        });

        let mut request = self.client.post(&self.cached_embeddings_url).json(&body);
        if let Some(auth) = &self.cached_auth_header {
            request = request.header("Authorization", auth);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Embedding HTTP request failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(api_error(&self.name, resp).await);
        }

        let json: serde_json::Value = resp.json().await?;
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing 'data'"))?;

        // Providers may return items out of order; `index` is authoritative when present.
        let mut indexed = Vec::with_capacity(data.len());
        for (pos, item) in data.iter().enumerate() {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow::anyhow!("Invalid embedding item"))?;

            #[allow(clippy::cast_possible_truncation)]
            let vec: Vec<f32> = embedding
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();

            let index = item
                .get("index")
                .and_then(serde_json::Value::as_u64)
                .and_then(|i| usize::try_from(i).ok())
                .unwrap_or(pos);
            indexed.push((index, vec));
        }
        indexed.sort_by_key(|(index, _)| *index);

        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }
}

// ── Factory ──────────────────────────────────────────────────

pub fn create_embedding_provider(config: &EmbeddingConfig) -> Box<dyn EmbeddingProvider> {
    let api_key = config.api_key.as_deref();
    match config.provider.as_str() {
        "siliconflow" => Box::new(OpenAiEmbedding::new(
            "siliconflow",
            &config.base_url,
            api_key,
            &config.model,
            config.dimensions,
        )),
        "openai" => Box::new(OpenAiEmbedding::new(
            "openai",
            OPENAI_BASE_URL,
            api_key,
            &config.model,
            config.dimensions,
        )),
        name if name.starts_with("custom:") => {
            let base_url = name.strip_prefix("custom:").unwrap_or("");
            let policy = CustomBaseUrlPolicy {
                allow_http: cfg!(test),
            };

            match validate_custom_base_url(base_url, policy) {
                Ok(valid_base_url) => Box::new(OpenAiEmbedding::new(
                    "custom",
                    &valid_base_url,
                    api_key,
                    &config.model,
                    config.dimensions,
                )),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Rejected custom embedding URL, embeddings disabled"
                    );
                    Box::new(NoopEmbedding)
                }
            }
        }
        "none" => Box::new(NoopEmbedding),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, embeddings disabled");
            Box::new(NoopEmbedding)
        }
    }
}
