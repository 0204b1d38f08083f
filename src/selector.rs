//! Search router: decide which snapshot items can answer a query.
//!
//! A [`Selector`] proposes page and table ids; its output is an untrusted
//! hint. [`route`] always validates it against the snapshot, so ids the
//! snapshot does not contain never reach the fetcher.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::chat::{ChatMessage, ChatRequest, ChatService, ResponseFormat};
use crate::error::{SelectorError, UnknownSelectionIdError};
use crate::models::{RawSelection, SearchSelection, Snapshot};
use crate::prompts;

#[async_trait]
pub trait Selector: Send + Sync {
    async fn select(&self, query: &str, snapshot: &Snapshot) -> Result<RawSelection, SelectorError>;
}

/// Select with `selector`, then drop every id the snapshot does not hold.
pub async fn route(
    selector: &dyn Selector,
    query: &str,
    snapshot: &Snapshot,
) -> Result<SearchSelection, SelectorError> {
    let raw = selector.select(query, snapshot).await?;
    let (selection, unknown) = SearchSelection::validate(raw, snapshot);

    for id in unknown {
        let error = UnknownSelectionIdError { id };
        tracing::warn!(id = %error.id, "{}", error);
    }
    tracing::debug!(
        pages = selection.page_ids().len(),
        tables = selection.table_ids().len(),
        "selection validated"
    );
    Ok(selection)
}

/// Selector backed by one structured-output chat call.
pub struct LlmSelector {
    chat: Arc<dyn ChatService>,
}

impl LlmSelector {
    pub fn new(chat: Arc<dyn ChatService>) -> Self {
        Self { chat }
    }

    fn response_format() -> ResponseFormat {
        let ids = json!({ "type": "array", "items": { "type": "string" } });
        ResponseFormat::JsonSchema {
            name: "search_selection".to_string(),
            schema: json!({
                "type": "object",
                "properties": { "pageIds": ids, "tableIds": ids },
                "required": ["pageIds", "tableIds"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl Selector for LlmSelector {
    async fn select(&self, query: &str, snapshot: &Snapshot) -> Result<RawSelection, SelectorError> {
        let system = prompts::selector_system(snapshot.items())
            .map_err(|e| SelectorError::Prompt(e.to_string()))?;
        let request = ChatRequest::new(vec![ChatMessage::system(system), ChatMessage::user(query)])
            .with_format(Self::response_format());

        let text = self.chat.complete(request).await?.into_text();
        serde_json::from_str(text.trim()).map_err(|e| SelectorError::Malformed(e.to_string()))
    }
}
