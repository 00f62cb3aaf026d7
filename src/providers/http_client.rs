use reqwest::Client;
use std::time::Duration;

/// Chat completions can take a while on long consolidation prompts.
pub const CHAT_TIMEOUT_SECS: u64 = 120;
pub const EMBEDDING_TIMEOUT_SECS: u64 = 10;
pub const STORE_TIMEOUT_SECS: u64 = 30;

/// Shared builder for every outbound HTTP client (LLM, embedding, store).
pub fn build_http_client(timeout_secs: u64, connect_timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| Client::new())
}

pub fn build_provider_client() -> Client {
    build_http_client(CHAT_TIMEOUT_SECS, 10)
}
