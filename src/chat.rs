//! The chat completion interface consumed by the core.
//!
//! A request carries the conversation, optional tool schemas the model may
//! call, and a response format. The response is either plain assistant
//! text, text holding a structured JSON object (when a JSON response format
//! was requested), or a list of tool calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExternalApiError;

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments. Unparseable argument strings arrive as
    /// `Value::String` so the caller can report them back to the model.
    pub arguments: Value,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String },
    ToolRequest { calls: Vec<ToolCall> },
    ToolResult { call_id: String, content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            content: content.into(),
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// How the model must shape its reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Any single JSON object.
    JsonObject,
    /// A JSON object conforming to `schema`.
    JsonSchema { name: String, schema: Value },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub response_format: ResponseFormat,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The text content, or an empty string.
    pub fn into_text(self) -> String {
        self.content.unwrap_or_default()
    }
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ExternalApiError>;
}
