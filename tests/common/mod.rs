//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use notion_harness::chat::{ChatMessage, ChatRequest, ChatResponse, ChatService, ResponseFormat};
use notion_harness::error::ExternalApiError;
use notion_harness::models::{
    Block, ColumnDef, ItemKind, PageRef, Parent, Record, TableDef, ToolMetadataItem,
};
use notion_harness::workspace::{Paginated, QueryRequest, SearchHit, WorkspaceStore};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ─── Workspace stub ─────────────────────────────────────────────────

/// A store call, recorded in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Search(ItemKind),
    ListChildren(String),
    Query { table_id: String, filter: Option<Value> },
    Create { table_id: String, properties: Map<String, Value> },
    Append { page_id: String, text: String },
}

#[derive(Default)]
pub struct StubStore {
    pub tables: Vec<TableDef>,
    pub pages: Vec<PageRef>,
    pub blocks: HashMap<String, Vec<Block>>,
    pub records: HashMap<String, Vec<Record>>,
    /// Ids whose block listing or query fails.
    pub failing: HashSet<String>,
    /// Listing of this kind fails.
    pub failing_listing: Option<ItemKind>,
    /// Search results per listing page; 0 means one page.
    pub search_page_size: usize,
    /// Cancelled when the page listing starts.
    pub cancel_on_page_listing: Option<CancellationToken>,
    /// Each block listing and query takes this long.
    pub call_delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
    created: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TableDef, rows: Vec<Record>) -> Self {
        self.records.insert(table.id.clone(), rows);
        self.tables.push(table);
        self
    }

    pub fn with_page(mut self, page: PageRef, texts: &[&str]) -> Self {
        let blocks = texts
            .iter()
            .enumerate()
            .map(|(i, text)| block(&format!("{}-b{}", page.id, i), text))
            .collect();
        self.blocks.insert(page.id.clone(), blocks);
        self.pages.push(page);
        self
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn listed_children(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::ListChildren(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn queries(&self) -> Vec<(String, Option<Value>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Query { table_id, filter } => Some((table_id, filter)),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Create { .. } | Call::Append { .. }))
            .collect()
    }

    /// Most block listings and queries seen running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn occupy(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn fail(&self, id: &str) -> Result<(), ExternalApiError> {
        if self.failing.contains(id) {
            return Err(ExternalApiError::Status {
                service: "workspace",
                status: 404,
                body: format!("object_not_found: {}", id),
            });
        }
        Ok(())
    }
}

fn paginate<T: Clone>(items: &[T], cursor: Option<&str>, page_size: usize) -> Paginated<T> {
    let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
    let size = if page_size == 0 { items.len().max(1) } else { page_size };
    let end = (start + size).min(items.len());
    let has_more = end < items.len();
    Paginated {
        results: items[start.min(end)..end].to_vec(),
        has_more,
        next_cursor: has_more.then(|| end.to_string()),
    }
}

#[async_trait]
impl WorkspaceStore for StubStore {
    async fn search(
        &self,
        kind: ItemKind,
        cursor: Option<&str>,
    ) -> Result<Paginated<SearchHit>, ExternalApiError> {
        self.record(Call::Search(kind));
        if self.failing_listing == Some(kind) {
            return Err(ExternalApiError::Status {
                service: "workspace",
                status: 401,
                body: "unauthorized".to_string(),
            });
        }
        let hits: Vec<SearchHit> = match kind {
            ItemKind::Table => self.tables.iter().cloned().map(SearchHit::Table).collect(),
            ItemKind::Page => {
                if let Some(cancel) = &self.cancel_on_page_listing {
                    cancel.cancel();
                    // Give the canceller's select a chance to observe it.
                    tokio::task::yield_now().await;
                }
                self.pages.iter().cloned().map(SearchHit::Page).collect()
            }
        };
        Ok(paginate(&hits, cursor, self.search_page_size))
    }

    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Paginated<Block>, ExternalApiError> {
        self.record(Call::ListChildren(block_id.to_string()));
        self.occupy().await;
        self.fail(block_id)?;
        let blocks = self.blocks.get(block_id).cloned().unwrap_or_default();
        Ok(paginate(&blocks, cursor, page_size.unwrap_or(100)))
    }

    async fn query(
        &self,
        table_id: &str,
        request: &QueryRequest,
    ) -> Result<Paginated<Record>, ExternalApiError> {
        self.record(Call::Query {
            table_id: table_id.to_string(),
            filter: request.filter.clone(),
        });
        self.occupy().await;
        self.fail(table_id)?;
        let rows = self.records.get(table_id).cloned().unwrap_or_default();
        Ok(paginate(
            &rows,
            request.cursor.as_deref(),
            request.page_size.unwrap_or(100),
        ))
    }

    async fn create_record(
        &self,
        table_id: &str,
        properties: &Map<String, Value>,
    ) -> Result<String, ExternalApiError> {
        self.record(Call::Create {
            table_id: table_id.to_string(),
            properties: properties.clone(),
        });
        self.fail(table_id)?;
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("rec-{}", n))
    }

    async fn append_block(&self, page_id: &str, text: &str) -> Result<(), ExternalApiError> {
        self.record(Call::Append {
            page_id: page_id.to_string(),
            text: text.to_string(),
        });
        self.fail(page_id)
    }
}

// ─── Chat stub ──────────────────────────────────────────────────────

type Script = dyn Fn(&ChatRequest, usize) -> Result<ChatResponse, ExternalApiError> + Send + Sync;

/// A chat service answering from a closure of (request, call index).
pub struct ScriptedChat {
    script: Box<Script>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new(
        script: impl Fn(&ChatRequest, usize) -> Result<ChatResponse, ExternalApiError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text.
    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(ChatResponse::text(text.clone())))
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatService for ScriptedChat {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ExternalApiError> {
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        (self.script)(&request, n)
    }
}

/// Text of the first system message.
pub fn system_text(request: &ChatRequest) -> &str {
    request
        .messages
        .iter()
        .find_map(|m| match m {
            ChatMessage::System { content } => Some(content.as_str()),
            _ => None,
        })
        .unwrap_or("")
}

/// Text of the last user message.
pub fn user_text(request: &ChatRequest) -> &str {
    request
        .messages
        .iter()
        .rev()
        .find_map(|m| match m {
            ChatMessage::User { content } => Some(content.as_str()),
            _ => None,
        })
        .unwrap_or("")
}

pub fn is_selection(request: &ChatRequest) -> bool {
    matches!(request.response_format, ResponseFormat::JsonSchema { .. })
}

pub fn is_filter(request: &ChatRequest) -> bool {
    request.response_format == ResponseFormat::JsonObject
}

// ─── Fixtures ───────────────────────────────────────────────────────

/// A table whose schema carries `id` in its title column, so prompts can be
/// told apart by schema text.
pub fn table(id: &str, title: &str) -> TableDef {
    TableDef {
        id: id.to_string(),
        title: title.to_string(),
        columns: vec![
            ColumnDef {
                name: "Name".to_string(),
                kind: "title".to_string(),
            },
            ColumnDef {
                name: "Status".to_string(),
                kind: "status".to_string(),
            },
        ],
        schema: json!({
            "Name": { "id": format!("{}-title", id), "type": "title", "title": {} },
            "Status": { "id": format!("{}-status", id), "type": "status", "status": {} }
        }),
    }
}

pub fn page(id: &str, title: &str) -> PageRef {
    PageRef {
        id: id.to_string(),
        title: title.to_string(),
        parent: Parent::Workspace,
    }
}

pub fn row_page(id: &str, table_id: &str) -> PageRef {
    PageRef {
        id: id.to_string(),
        title: format!("row {}", id),
        parent: Parent::Table(table_id.to_string()),
    }
}

pub fn block(id: &str, text: &str) -> Block {
    Block {
        id: id.to_string(),
        block_type: "paragraph".to_string(),
        text: text.to_string(),
        has_children: false,
    }
}

pub fn record(id: &str, title: &str) -> Record {
    let mut properties = Map::new();
    properties.insert(
        "Name".to_string(),
        json!({ "type": "title", "title": [{ "plain_text": title }] }),
    );
    Record {
        id: id.to_string(),
        title: Some(title.to_string()),
        properties,
    }
}

pub fn page_item(id: &str, title: &str) -> ToolMetadataItem {
    ToolMetadataItem {
        id: id.to_string(),
        kind: ItemKind::Page,
        title: title.to_string(),
        summary: format!("Notes about {}", title),
        schema: None,
    }
}

pub fn table_item(id: &str, title: &str) -> ToolMetadataItem {
    ToolMetadataItem {
        id: id.to_string(),
        kind: ItemKind::Table,
        title: title.to_string(),
        summary: format!("Entries of {}", title),
        schema: Some(table(id, title).schema_text()),
    }
}
