use async_trait::async_trait;
use pantrycore::{AdapterError, CompletionAdapter};
use serde_json::{json, Value};

const SYSTEM_PROMPT: &str = "You are a restaurant kitchen assistant. Suggest one short, practical \
recipe that uses the given ingredient before it spoils. Reply with the recipe only.";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Chat-completions client. The API key arrives per call, already decrypted.
pub struct OpenAiCompletionAdapter {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiCompletionAdapter {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn build_payload(&self, prompt: &str) -> Value {
        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.7,
            "max_tokens": 400,
        })
    }
}

/// First choice's message content, if any.
pub(crate) fn parse_completion(body: &Value) -> Option<String> {
    body.get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl CompletionAdapter for OpenAiCompletionAdapter {
    async fn complete_ai(&self, prompt: &str, api_key: &str) -> Result<String, AdapterError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        tracing::debug!(model = %self.config.model, "Requesting completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&self.build_payload(prompt))
            .send()
            .await
            .map_err(|e| AdapterError::Failed(format!("completion request failed: {}", e.without_url())))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::Failed(format!("invalid completion response: {}", e.without_url())))?;

        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("no error message");
            return Err(AdapterError::Failed(format!("HTTP {}: {}", status.as_u16(), message)));
        }

        parse_completion(&body).ok_or_else(|| AdapterError::Failed("completion had no content".into()))
    }
}
