use async_trait::async_trait;

/// Text-generation adapter. The kernel calls it from exactly two places:
/// the advisory signal estimator and the synthesize reducer. Both treat any
/// error as recoverable.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier (e.g. "anthropic", "openai").
    fn name(&self) -> &str;

    async fn chat(&self, message: &str, model: &str, temperature: f64) -> anyhow::Result<String> {
        self.chat_with_system(None, message, model, temperature)
            .await
    }

    async fn chat_with_system(
        &self,
        system_prompt: Option<&str>,
        message: &str,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<String>;
}
