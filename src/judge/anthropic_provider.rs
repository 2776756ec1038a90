use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::provider::JudgeProvider;
use crate::error::JudgeError;

/// HTTP-backed `JudgeProvider`, built the same way as this codebase's
/// `ai::anthropic::AnthropicProvider`: a bare `reqwest::Client`, the same
/// request shape (`x-api-key` / `anthropic-version` headers, `system` +
/// `messages` body), and the same "first text block" response extraction.
pub struct AnthropicJudgeProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl AnthropicJudgeProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl JudgeProvider for AnthropicJudgeProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, JudgeError> {
        let payload = json!({
            "model": self.model,
            "max_tokens": 1024,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_prompt}],
        });

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| JudgeError::Provider(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(JudgeError::Provider(format!("anthropic returned {status}: {text}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| JudgeError::Provider(e.to_string()))?;

        body["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| JudgeError::Provider(format!("unexpected response shape: {body}")))
    }
}

/// Deterministic test double standing in for the network, used to exercise
/// the deadline/cache/singleflight machinery in `judge::mod` without a real
/// provider.
pub struct FixedJudgeProvider {
    response: String,
    delay: Option<std::time::Duration>,
}

impl FixedJudgeProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            delay: None,
        }
    }

    pub fn with_delay(response: impl Into<String>, delay: std::time::Duration) -> Self {
        Self {
            response: response.into(),
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl JudgeProvider for FixedJudgeProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, JudgeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.response.clone())
    }
}
