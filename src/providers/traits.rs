use async_trait::async_trait;

/// A chat-completion backend. Implementations are plain transport: they do
/// not interpret the model's output.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier (e.g. "deepseek", "glm").
    fn name(&self) -> &str;

    async fn chat_with_system(
        &self,
        system_prompt: Option<&str>,
        message: &str,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<String>;

    async fn chat(&self, message: &str, model: &str, temperature: f64) -> anyhow::Result<String> {
        self.chat_with_system(None, message, model, temperature)
            .await
    }

    /// Warm up the HTTP connection pool.
    async fn warmup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
