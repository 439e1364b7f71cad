//! Chat completion request and response types.

use serde::{Deserialize, Serialize};

// =============================================================================
// Messages
// =============================================================================

/// One part of a message body: plain text or an image reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Plain text content
    #[serde(rename = "text")]
    Text { text: String },

    /// Image by URL (vision models)
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image URL wrapper matching the wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentPart {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an image part from a URL.
    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

/// Chat message with multi-part content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user", "assistant"
    pub role: String,

    /// Message content parts
    pub content: Vec<ContentPart>,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: vec![ContentPart::text(content)],
        }
    }

    /// Create a user message with a single text part.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![ContentPart::text(content)],
        }
    }

    /// Create a user message from arbitrary content parts.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user".to_string(),
            content: parts,
        }
    }

    /// Append a part to this message.
    pub fn part(mut self, part: ContentPart) -> Self {
        self.content.push(part);
        self
    }
}

// =============================================================================
// Tools
// =============================================================================

/// A callable tool exposed to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Function signature for a tool.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-schema parameter object
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Define a function tool with a JSON-schema parameter object.
    pub fn function(
        name: impl Into<String>,
        description: Option<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description,
                parameters,
            },
        }
    }
}

// =============================================================================
// Request / Response
// =============================================================================

/// Chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model to use (e.g., "gpt-4o")
    pub model: String,

    /// Conversation messages
    pub messages: Vec<Message>,

    /// Sampling temperature (0.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens in completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tool definitions the model may call
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Tool choice strategy ("auto" when tools are present)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: None,
        }
    }
}

impl ChatRequest {
    /// Create a new chat request with the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Add a message to the conversation.
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Add a tool definition and enable auto tool choice.
    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self.tool_choice = Some("auto".to_string());
        self
    }
}

/// A tool call returned by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Name of the called function
    pub name: String,

    /// Parsed function arguments
    pub arguments: serde_json::Value,
}

/// Chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Response text (empty when the model called a tool)
    pub content: String,

    /// Tool call, if the model invoked one
    pub tool_call: Option<ToolCall>,

    /// Token usage statistics
    pub usage: Option<Usage>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: u64,

    /// Tokens in the completion
    pub completion_tokens: u64,

    /// Total tokens used
    pub total_tokens: u64,
}

// =============================================================================
// Raw wire types (internal parsing)
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponseRaw {
    pub choices: Vec<ChatChoiceRaw>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoiceRaw {
    pub message: ChatMessageRaw,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatMessageRaw {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRaw>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolCallRaw {
    pub function: FunctionCallRaw,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FunctionCallRaw {
    pub name: String,
    /// JSON-encoded argument string
    pub arguments: String,
}
