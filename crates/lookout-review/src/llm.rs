use std::time::Duration;

use lookout_core::{LlmConfig, LookoutError};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use lookout_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "Review this code".into(),
/// };
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

/// Role in the chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider that exposes the `/v1/chat/completions` endpoint.
///
/// # Examples
///
/// ```
/// use lookout_core::LlmConfig;
/// use lookout_review::llm::LlmClient;
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// assert_eq!(client.model(), "gpt-4o-mini");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, LookoutError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LookoutError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Return the model name from the configuration.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a chat completion request and return the text content.
    ///
    /// `response_format` is passed through verbatim. A `null` content in
    /// the first choice is returned as an empty string.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Config`] when no API key is configured, and
    /// [`LookoutError::GenerationTransport`] on network errors, non-success
    /// statuses or an envelope without choices.
    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        response_format: serde_json::Value,
    ) -> Result<String, LookoutError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LookoutError::Config("Missing OPENAI_API_KEY".into()))?;

        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let url = format!("{base_url}/v1/chat/completions");

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "response_format": response_format,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LookoutError::GenerationTransport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(LookoutError::GenerationTransport(format!(
                "LLM API error {status}: {body_text}"
            )));
        }

        let response_body: serde_json::Value = response.json().await.map_err(|e| {
            LookoutError::GenerationTransport(format!("failed to parse response: {e}"))
        })?;

        let message = response_body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| {
                LookoutError::GenerationTransport(format!(
                    "unexpected response structure: {response_body}"
                ))
            })?;

        Ok(message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn config_for(server: &MockServer) -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test".into()),
            base_url: Some(server.base_url()),
            ..LlmConfig::default()
        }
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage {
            role: Role::User,
            content: "review".into(),
        }]
    }

    #[test]
    fn chat_message_serializes() {
        let msg = ChatMessage {
            role: Role::System,
            content: "hello".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "hello");
    }

    #[tokio::test]
    async fn missing_api_key_is_config_error() {
        let client = LlmClient::new(&LlmConfig::default()).unwrap();
        let err = client
            .chat(messages(), serde_json::json!({"type": "json_object"}))
            .await
            .unwrap_err();
        assert!(matches!(err, LookoutError::Config(_)));
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{"model": "gpt-4o-mini", "response_format": {"type": "json_object"}}"#);
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "{\"summary\":\"ok\"}"}}]
                }));
            })
            .await;

        let client = LlmClient::new(&config_for(&server)).unwrap();
        let content = client
            .chat(messages(), serde_json::json!({"type": "json_object"}))
            .await
            .unwrap();
        assert_eq!(content, "{\"summary\":\"ok\"}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_is_transport_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let client = LlmClient::new(&config_for(&server)).unwrap();
        let err = client
            .chat(messages(), serde_json::json!({"type": "json_object"}))
            .await
            .unwrap_err();
        assert!(matches!(err, LookoutError::GenerationTransport(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn null_content_is_empty_string() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": null}}]
                }));
            })
            .await;

        let client = LlmClient::new(&config_for(&server)).unwrap();
        let content = client
            .chat(messages(), serde_json::json!({"type": "json_object"}))
            .await
            .unwrap();
        assert_eq!(content, "");
    }
}
