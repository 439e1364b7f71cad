//! Text/function completion seam.
//!
//! Abstracts the LLM provider behind one call shape: a prompt script made
//! of system/user/image parts plus optional declared functions, returning
//! text or a structured function call along with a token-usage delta that
//! the caller merges into its [`TokenUsage`](crate::types::usage::TokenUsage)
//! accumulator.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::types::usage::UsageDelta;

/// One part of a completion prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    /// System instruction
    System(String),

    /// User text
    User(String),

    /// Image reference by URL (vision input)
    Image(String),
}

/// A function the model may call instead of answering with text.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub description: Option<String>,

    /// JSON-schema parameter object
    pub parameters: serde_json::Value,
}

impl FunctionSpec {
    /// Declare a function with a JSON-schema parameter object.
    pub fn new(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters,
        }
    }

    /// Add a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A completion prompt script.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub parts: Vec<PromptPart>,
    pub functions: Vec<FunctionSpec>,
}

impl CompletionRequest {
    /// Empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a system part.
    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.parts.push(PromptPart::System(text.into()));
        self
    }

    /// Append a user text part.
    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.parts.push(PromptPart::User(text.into()));
        self
    }

    /// Append an image part.
    pub fn image(mut self, url: impl Into<String>) -> Self {
        self.parts.push(PromptPart::Image(url.into()));
        self
    }

    /// Declare a callable function.
    pub fn function(mut self, function: FunctionSpec) -> Self {
        self.functions.push(function);
        self
    }
}

/// A function call made by the model.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

impl FunctionCall {
    /// Deserialize the arguments into a typed value.
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.arguments.clone())?)
    }
}

/// A completion result.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Response text (empty when the model called a function)
    pub text: String,

    /// The function call, when the model made one
    pub function_call: Option<FunctionCall>,

    /// Token usage of this single call
    pub usage: UsageDelta,
}

/// Completion provider seam.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Run one completion call.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
