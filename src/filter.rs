//! Filter builder: natural-language query + table schema → [`FilterSpec`].
//!
//! The chat service is asked for a single JSON object in the store's filter
//! grammar, guided by a static guide document and optional per-table
//! instructions. The reply is accepted in either shape:
//!
//! ```text
//! {"filter": {...}}   → the inner object
//! {...}               → the whole object (no "filter" key)
//! ```
//!
//! Anything else (not JSON, not an object, an empty object) is a
//! [`FilterGenerationError`]. There is no unfiltered fallback.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::chat::{ChatMessage, ChatRequest, ChatService, ResponseFormat};
use crate::config::SearchConfig;
use crate::error::{FilterFailure, FilterGenerationError};
use crate::models::{json_type_name, FilterSpec};
use crate::prompts;

pub struct FilterBuilder {
    chat: Arc<dyn ChatService>,
    guide: String,
    table_instructions: HashMap<String, String>,
}

impl FilterBuilder {
    pub fn new(chat: Arc<dyn ChatService>, guide: impl Into<String>) -> Self {
        Self {
            chat,
            guide: guide.into(),
            table_instructions: HashMap::new(),
        }
    }

    /// Read the guide file named in the config.
    pub fn from_config(chat: Arc<dyn ChatService>, config: &SearchConfig) -> Result<Self> {
        let guide = std::fs::read_to_string(&config.filter_guide).with_context(|| {
            format!("Failed to read filter guide: {}", config.filter_guide.display())
        })?;
        Ok(Self::new(chat, guide).with_table_instructions(config.table_instructions.clone()))
    }

    pub fn with_table_instructions(mut self, instructions: HashMap<String, String>) -> Self {
        self.table_instructions = instructions;
        self
    }

    /// Synthesize the filter for one table.
    pub async fn build(
        &self,
        query: &str,
        table_id: &str,
        schema_text: &str,
    ) -> Result<FilterSpec, FilterGenerationError> {
        let fail = |reason| FilterGenerationError {
            table_id: table_id.to_string(),
            reason,
        };

        let instructions = self.table_instructions.get(table_id).map(String::as_str);
        let system = prompts::filter_system(&self.guide, schema_text, instructions)
            .map_err(|e| fail(FilterFailure::Prompt(e.to_string())))?;
        let request = ChatRequest::new(vec![ChatMessage::system(system), ChatMessage::user(query)])
            .with_format(ResponseFormat::JsonObject);

        let text = self
            .chat
            .complete(request)
            .await
            .map_err(|e| fail(FilterFailure::Chat(e)))?
            .into_text();

        parse_filter_response(table_id, &text)
    }
}

/// Validate a filter reply for `table_id`.
pub fn parse_filter_response(table_id: &str, text: &str) -> Result<FilterSpec, FilterGenerationError> {
    let value: Value = serde_json::from_str(text.trim()).map_err(|e| FilterGenerationError {
        table_id: table_id.to_string(),
        reason: FilterFailure::NotJson(e.to_string()),
    })?;

    match value {
        Value::Object(mut map) => match map.remove("filter") {
            Some(inner) => FilterSpec::new(table_id, inner),
            None => FilterSpec::new(table_id, Value::Object(map)),
        },
        other => Err(FilterGenerationError {
            table_id: table_id.to_string(),
            reason: FilterFailure::NotObject(json_type_name(&other)),
        }),
    }
}
