use async_trait::async_trait;

use crate::error::JudgeError;

/// The raw LLM call the judge worker wraps with caching, deadline, and
/// singleflight. Mirrors this codebase's `AIProvider` trait: one narrow
/// method, `Send + Sync` so it can sit behind an `Arc<dyn JudgeProvider>`.
#[async_trait]
pub trait JudgeProvider: Send + Sync {
    /// Sends `system_prompt` + `user_prompt` to the model and returns the
    /// raw response body for `prompt::parse_response` to interpret.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, JudgeError>;

    fn name(&self) -> &str;
}
