use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `mnemo`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; provider plumbing keeps using
/// `anyhow::Result` for ad-hoc context chains and is mapped into
/// [`GatewayError`] at the gateway boundary.
#[derive(Debug, Error)]
pub enum MnemoError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Embedding / LLM gateways ────────────────────────────────────────
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    // ── Vector store ────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Input validation ────────────────────────────────────────────────
    #[error("validation failed: {0}")]
    Validation(String),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type MnemoResult<T> = Result<T, MnemoError>;

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Gateway errors ──────────────────────────────────────────────────────────

/// Provider-side failure (network, auth, rate limit). Callers treat these as
/// retryable; the core itself never retries.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("embedding provider {provider} failed: {message}")]
    Embedding { provider: String, message: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("llm provider {provider} failed: {message}")]
    Llm { provider: String, message: String },
}

impl GatewayError {
    pub fn embedding(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Embedding {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn llm(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Llm {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

// ─── Parse errors ────────────────────────────────────────────────────────────

/// Malformed structured model output. Absorbed by `chat_json` and surfaced to
/// callers only as the caller-supplied default.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON object found in model output")]
    NoJson,

    #[error("model output did not match schema: {0}")]
    Schema(#[from] serde_json::Error),
}

// ─── Store errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("invalid payload for record {id}: {message}")]
    InvalidPayload { id: String, message: String },

    #[error("record {id} has {actual} dimensions, store expects {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("record {id} not found in namespace {namespace}")]
    NotFound { namespace: String, id: String },
}

impl StoreError {
    pub fn backend(backend: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.to_string(),
        }
    }
}
