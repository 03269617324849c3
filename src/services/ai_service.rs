use anyhow::Result;

use crate::models::GenerationConfig;

/// Trait for text generation backends (Gemini, test stubs, etc.)
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier, used in logs.
    fn model_name(&self) -> &str;

    /// Send one prompt and return the raw reply text.
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;
}
