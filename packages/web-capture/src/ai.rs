//! OpenAI-compatible completion provider.
//!
//! Bridges the [`Completion`] seam to the `completion-client` REST client.
//! Consecutive user/image prompt parts collapse into one multi-part user
//! message so screenshots travel with the text that references them.

use async_trait::async_trait;
use completion_client::{
    ChatRequest, CompletionClient, ContentPart, Message, ToolDefinition,
};

use crate::error::{CrawlerError, Result};
use crate::traits::completion::{
    Completion, CompletionRequest, CompletionResponse, FunctionCall, PromptPart,
};
use crate::types::usage::UsageDelta;

/// Default vision-capable model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// [`Completion`] provider backed by an OpenAI-compatible chat API.
pub struct OpenAiCompletion {
    client: CompletionClient,
    model: String,
}

impl OpenAiCompletion {
    /// Wrap an existing client with the default model.
    pub fn new(client: CompletionClient) -> Self {
        Self {
            client,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(CompletionClient::from_env().map_err(
            CrawlerError::completion,
        )?))
    }

    /// Use a different model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Per-token rates in micro-cents (1 USD = 100,000,000), `(input, output)`.
/// Unknown models price at zero rather than guessing.
fn token_rates(model: &str) -> (u64, u64) {
    if model.starts_with("gpt-4o-mini") {
        (15, 60)
    } else if model.starts_with("gpt-4o") {
        (250, 1000)
    } else {
        (0, 0)
    }
}

fn to_chat_request(model: &str, request: CompletionRequest) -> ChatRequest {
    let mut chat = ChatRequest::new(model);
    let mut pending: Vec<ContentPart> = Vec::new();

    for part in request.parts {
        match part {
            PromptPart::System(text) => {
                if !pending.is_empty() {
                    chat = chat.message(Message::user_parts(std::mem::take(&mut pending)));
                }
                chat = chat.message(Message::system(text));
            }
            PromptPart::User(text) => pending.push(ContentPart::text(text)),
            PromptPart::Image(url) => pending.push(ContentPart::image(url)),
        }
    }
    if !pending.is_empty() {
        chat = chat.message(Message::user_parts(pending));
    }

    for function in request.functions {
        chat = chat.tool(ToolDefinition::function(
            function.name,
            function.description,
            function.parameters,
        ));
    }
    chat
}

#[async_trait]
impl Completion for OpenAiCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let response = self
            .client
            .chat(to_chat_request(&self.model, request))
            .await
            .map_err(CrawlerError::completion)?;

        let (input_rate, output_rate) = token_rates(&self.model);
        let usage = response
            .usage
            .map(|usage| UsageDelta {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                price_micro_cents: usage.prompt_tokens * input_rate
                    + usage.completion_tokens * output_rate,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text: response.content,
            function_call: response.tool_call.map(|call| FunctionCall {
                name: call.name,
                arguments: call.arguments,
            }),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::completion::FunctionSpec;

    #[test]
    fn test_consecutive_user_parts_collapse() {
        let request = CompletionRequest::new()
            .system("be terse")
            .user("convert this")
            .user("use these links")
            .image("https://x/0.png");

        let chat = to_chat_request("gpt-4o", request);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, "system");
        assert_eq!(chat.messages[1].role, "user");
        assert_eq!(chat.messages[1].content.len(), 3);
    }

    #[test]
    fn test_system_part_splits_user_runs() {
        let request = CompletionRequest::new()
            .user("first")
            .system("mid-run instruction")
            .user("second");

        let chat = to_chat_request("gpt-4o", request);
        let roles: Vec<&str> = chat.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "system", "user"]);
    }

    #[test]
    fn test_functions_become_tools_with_auto_choice() {
        let request = CompletionRequest::new().user("classify").function(
            FunctionSpec::new("classifyWebsite", serde_json::json!({"type": "object"}))
                .with_description("Classify the page"),
        );

        let chat = to_chat_request("gpt-4o", request);
        assert_eq!(chat.tools.len(), 1);
        assert_eq!(chat.tools[0].function.name, "classifyWebsite");
        assert_eq!(chat.tool_choice.as_deref(), Some("auto"));
    }

    #[test]
    fn test_token_rates_price_a_call() {
        let (input, output) = token_rates(DEFAULT_MODEL);
        // 1000 prompt + 100 completion tokens of gpt-4o cost $0.0035.
        assert_eq!(1000 * input + 100 * output, 350_000);
        assert_eq!(token_rates("some-unknown-model"), (0, 0));
    }
}
