//! Pure REST chat-completion client
//!
//! A minimal client for OpenAI-compatible chat completion APIs with no
//! domain-specific logic. Supports multi-part (text + image URL) messages,
//! function/tool calling, and token usage reporting.
//!
//! # Example
//!
//! ```rust,ignore
//! use completion_client::{ChatRequest, CompletionClient, ContentPart, Message};
//!
//! let client = CompletionClient::from_env()?;
//!
//! let response = client
//!     .chat(
//!         ChatRequest::new("gpt-4o")
//!             .message(Message::user_parts(vec![
//!                 ContentPart::text("Convert this screenshot to markdown"),
//!                 ContentPart::image("https://example.com/shot.png"),
//!             ])),
//!     )
//!     .await?;
//!
//! println!("{}", response.content);
//! ```

pub mod error;
pub mod types;

pub use error::{CompletionClientError, Result};
pub use types::*;

use reqwest::Client;
use tracing::{debug, warn};

/// Chat completion API client.
#[derive(Clone)]
pub struct CompletionClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl CompletionClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create from environment variable `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| CompletionClientError::Config("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL (for proxies or compatible providers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Chat completion.
    ///
    /// Sends the conversation (and any tool definitions) and returns the
    /// response text, the first tool call if one was made, and token usage.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let start = std::time::Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "completion request failed");
                CompletionClientError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "completion API error");
            return Err(CompletionClientError::Api(format!(
                "completion API error: {}",
                error_text
            )));
        }

        let raw: types::ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| CompletionClientError::Parse(e.to_string()))?;

        let message = raw
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| CompletionClientError::Api("No response choices".into()))?;

        let tool_call = message
            .tool_calls
            .into_iter()
            .next()
            .map(|t| -> Result<ToolCall> {
                let arguments = serde_json::from_str(&t.function.arguments).map_err(|e| {
                    CompletionClientError::Parse(format!(
                        "invalid tool call arguments for {}: {}",
                        t.function.name, e
                    ))
                })?;
                Ok(ToolCall {
                    name: t.function.name,
                    arguments,
                })
            })
            .transpose()?;

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis(),
            tool_call = tool_call.as_ref().map(|t| t.name.as_str()).unwrap_or(""),
            "chat completion"
        );

        Ok(ChatResponse {
            content: message.content.unwrap_or_default(),
            tool_call,
            usage: raw.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = CompletionClient::new("sk-test").with_base_url("https://custom.api.com");
        assert_eq!(client.api_key, "sk-test");
        assert_eq!(client.base_url, "https://custom.api.com");
    }
}
