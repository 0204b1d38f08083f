//! The workspace store interface consumed by the core.
//!
//! The store holds pages (free-form documents made of blocks) and tables
//! (collections of records with a typed property schema). The core only
//! needs five operations:
//!
//! | Method | Kind | Retried |
//! |--------|------|---------|
//! | [`search`](WorkspaceStore::search) | paginated listing of pages or tables | yes |
//! | [`list_children`](WorkspaceStore::list_children) | paginated block listing | yes |
//! | [`query`](WorkspaceStore::query) | paginated filtered record query | yes |
//! | [`create_record`](WorkspaceStore::create_record) | create one record in a table | no |
//! | [`append_block`](WorkspaceStore::append_block) | append one text block to a page | no |
//!
//! Implementations parse the store's payloads into the tagged records of
//! [`crate::models`] before returning. [`crate::notion::NotionClient`] is the
//! production implementation; tests use in-memory stubs.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ExternalApiError;
use crate::models::{Block, ItemKind, PageRef, Record, TableDef};

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Paginated<T> {
    pub results: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

impl<T> Paginated<T> {
    /// A single, final page.
    pub fn last(results: Vec<T>) -> Self {
        Self {
            results,
            has_more: false,
            next_cursor: None,
        }
    }

    /// The cursor to request next, or `None` when the listing is exhausted.
    ///
    /// A store that reports `has_more` without a cursor is treated as
    /// exhausted rather than looped on.
    pub fn continuation(&self) -> Option<&str> {
        if self.has_more {
            self.next_cursor.as_deref()
        } else {
            None
        }
    }
}

/// A search hit, already classified by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchHit {
    Page(PageRef),
    Table(TableDef),
}

impl SearchHit {
    pub fn id(&self) -> &str {
        match self {
            SearchHit::Page(page) => &page.id,
            SearchHit::Table(table) => &table.id,
        }
    }
}

/// Parameters of one record query call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    /// Structured predicate; `None` only for index-time row sampling.
    pub filter: Option<Value>,
    pub cursor: Option<String>,
    pub page_size: Option<usize>,
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// List items of one kind, one page at a time.
    async fn search(
        &self,
        kind: ItemKind,
        cursor: Option<&str>,
    ) -> Result<Paginated<SearchHit>, ExternalApiError>;

    /// List the child blocks of a page (or block), one page at a time.
    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Paginated<Block>, ExternalApiError>;

    /// Query the records of a table.
    async fn query(
        &self,
        table_id: &str,
        request: &QueryRequest,
    ) -> Result<Paginated<Record>, ExternalApiError>;

    /// Create one record in a table. Returns the new record's id.
    async fn create_record(
        &self,
        table_id: &str,
        properties: &Map<String, Value>,
    ) -> Result<String, ExternalApiError>;

    /// Append a paragraph block holding `text` to a page.
    async fn append_block(&self, page_id: &str, text: &str) -> Result<(), ExternalApiError>;
}
