//! Chat service client for OpenAI-compatible chat-completions APIs.
//!
//! Sends `POST {base_url}/chat/completions` with the conversation, the
//! registered actions as `function` tools, and the requested response
//! format. Completions have no side effects, so every call goes through
//! [`retry::read`].

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::chat::{ChatMessage, ChatRequest, ChatResponse, ChatService, ResponseFormat, ToolCall};
use crate::config::ChatConfig;
use crate::error::ExternalApiError;
use crate::retry::{self, RetryPolicy};

const SERVICE: &str = "chat";

pub struct OpenAiChat {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    policy: RetryPolicy,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2)))
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            policy: config.retry_policy(),
        })
    }

    async fn call(&self, body: &Value) -> Result<ChatResponse, ExternalApiError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExternalApiError::Timeout { service: SERVICE }
                } else {
                    ExternalApiError::Transport {
                        service: SERVICE,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ExternalApiError::RateLimited { service: SERVICE });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalApiError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ExternalApiError::malformed(SERVICE, e.to_string()))?;
        parse_completion(&text)
    }
}

#[async_trait]
impl ChatService for OpenAiChat {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ExternalApiError> {
        let body = request_body(&self.model, self.temperature, &request);
        retry::read(&self.policy, SERVICE, || self.call(&body)).await
    }
}

/// Build the chat-completions request body.
fn request_body(model: &str, temperature: f32, request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_json).collect();
    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
    });

    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }

    match &request.response_format {
        ResponseFormat::Text => {}
        ResponseFormat::JsonObject => {
            body["response_format"] = json!({ "type": "json_object" });
        }
        ResponseFormat::JsonSchema { name, schema } => {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": true }
            });
        }
    }

    body
}

fn message_json(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System { content } => json!({ "role": "system", "content": content }),
        ChatMessage::User { content } => json!({ "role": "user", "content": content }),
        ChatMessage::Assistant { content } => json!({ "role": "assistant", "content": content }),
        ChatMessage::ToolRequest { calls } => json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": calls.iter().map(|call| json!({
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": match &call.arguments {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    },
                }
            })).collect::<Vec<_>>(),
        }),
        ChatMessage::ToolResult { call_id, content } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": content,
        }),
    }
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    // Arguments arrive as a JSON-encoded string.
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

fn parse_completion(text: &str) -> Result<ChatResponse, ExternalApiError> {
    let response: ApiResponse = serde_json::from_str(text)
        .map_err(|e| ExternalApiError::malformed(SERVICE, format!("invalid completion: {}", e)))?;
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| ExternalApiError::malformed(SERVICE, "completion has no choices"))?;

    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments)),
        })
        .collect();

    Ok(ChatResponse {
        content: message.content,
        tool_calls,
    })
}
