//! Metadata indexer.
//!
//! Builds a [`Snapshot`] describing every table and standalone page in the
//! workspace:
//!
//! ```text
//!  search(table) ──▶ tables ─┐
//!                            ├─▶ dedupe by id ─▶ summarize (bounded pool) ─▶ Snapshot
//!  search(page)  ──▶ pages ──┘        (table rows excluded)
//! ```
//!
//! Tables are summarized from their column summary plus a few sample row
//! titles, and keep their full schema as canonical text. Pages are
//! summarized from the text of their first blocks.
//!
//! One item failing to summarize never aborts the run: the item is logged,
//! reported in [`IndexReport::failures`] and left out of the snapshot. A
//! failed listing or a cancellation aborts the whole run, and nothing is
//! returned that could be published.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatMessage, ChatRequest, ChatService};
use crate::config::IndexerConfig;
use crate::error::{IndexError, IndexingItemError, ItemFailure};
use crate::fetcher::{collect_blocks, join_bounded};
use crate::models::{ItemKind, PageRef, Snapshot, TableDef, ToolMetadataItem, WorkspaceItem};
use crate::progress::{IndexProgressEvent, IndexProgressReporter};
use crate::prompts;
use crate::workspace::{QueryRequest, SearchHit, WorkspaceStore};

/// Outcome of a completed indexing run.
#[derive(Debug)]
pub struct IndexReport {
    pub snapshot: Snapshot,
    pub failures: Vec<IndexingItemError>,
}

enum Work {
    Table(TableDef),
    Page(PageRef),
}

impl Work {
    fn id(&self) -> &str {
        match self {
            Work::Table(table) => &table.id,
            Work::Page(page) => &page.id,
        }
    }

    fn item(&self) -> WorkspaceItem {
        let (kind, title) = match self {
            Work::Table(table) => (ItemKind::Table, &table.title),
            Work::Page(page) => (ItemKind::Page, &page.title),
        };
        WorkspaceItem {
            id: self.id().to_string(),
            kind,
            title: title.clone(),
        }
    }
}

pub struct Indexer {
    store: Arc<dyn WorkspaceStore>,
    chat: Arc<dyn ChatService>,
    config: IndexerConfig,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn WorkspaceStore>,
        chat: Arc<dyn ChatService>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            chat,
            config,
        }
    }

    /// Run a full indexing pass.
    pub async fn index(
        &self,
        progress: &dyn IndexProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, IndexError> {
        let mut work = Vec::new();
        let mut seen = HashSet::new();

        for kind in [ItemKind::Table, ItemKind::Page] {
            let hits = self.list_all(kind, cancel).await?;
            let mut found = 0u64;
            for hit in hits {
                let next = match hit {
                    SearchHit::Table(table) => Work::Table(table),
                    SearchHit::Page(page) if page.is_table_row() => continue,
                    SearchHit::Page(page) => Work::Page(page),
                };
                if !seen.insert(next.id().to_string()) {
                    tracing::debug!(id = %next.id(), "duplicate listing entry skipped");
                    continue;
                }
                found += 1;
                work.push(next);
            }
            progress.report(IndexProgressEvent::Listing { kind, found });
        }

        let total = work.len() as u64;
        let done = AtomicU64::new(0);
        let done = &done;

        let permits = Semaphore::new(self.config.concurrency.max(1));
        let results = join_bounded(
            &permits,
            work.iter().map(|item| async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = self.summarize(item) => Some(result),
                };
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                progress.report(IndexProgressEvent::Summarizing { n, total });
                result
            }),
        )
        .await;

        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let mut items = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (item, result) in work.iter().zip(results) {
            match result {
                Some(Ok(metadata)) => items.push(metadata),
                Some(Err(reason)) => {
                    let error = IndexingItemError::new(item.item(), reason);
                    tracing::warn!(item_id = %error.item_id, kind = %error.kind, error = %error.reason, "skipping item");
                    failures.push(error);
                }
                None => return Err(IndexError::Cancelled),
            }
        }

        let snapshot = Snapshot::from_items(items);
        tracing::info!(
            tables = snapshot.count(ItemKind::Table),
            pages = snapshot.count(ItemKind::Page),
            failed = failures.len(),
            "indexing finished"
        );

        Ok(IndexReport { snapshot, failures })
    }

    /// Page through one kind of search listing until the store reports no more.
    async fn list_all(
        &self,
        kind: ItemKind,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let mut hits = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IndexError::Cancelled),
                page = self.store.search(kind, cursor.as_deref()) => {
                    page.map_err(|source| IndexError::Listing { kind, source })?
                }
            };
            let next = page.continuation().map(str::to_string);
            hits.extend(page.results);

            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(kind = %kind, count = hits.len(), "listing complete");
        Ok(hits)
    }

    async fn summarize(&self, work: &Work) -> Result<ToolMetadataItem, ItemFailure> {
        match work {
            Work::Table(table) => self.summarize_table(table).await,
            Work::Page(page) => self.summarize_page(page).await,
        }
    }

    async fn summarize_table(&self, table: &TableDef) -> Result<ToolMetadataItem, ItemFailure> {
        let mut examples = Vec::new();
        if self.config.sample_rows > 0 {
            let request = QueryRequest {
                filter: None,
                cursor: None,
                page_size: Some(self.config.sample_rows),
            };
            let rows = self.store.query(&table.id, &request).await?;
            examples = rows
                .results
                .into_iter()
                .filter_map(|row| row.title)
                .filter(|title| !title.trim().is_empty())
                .take(self.config.sample_rows)
                .collect();
        }

        let content = prompts::table_content(&table.title, &table.schema_summary(), &examples)
            .map_err(|e| ItemFailure::Prompt(e.to_string()))?;
        let summary = self
            .summarize_text(prompts::TABLE_SUMMARY_SYSTEM, content)
            .await?;

        Ok(ToolMetadataItem {
            id: table.id.clone(),
            kind: ItemKind::Table,
            title: table.title.clone(),
            summary,
            schema: Some(table.schema_text()),
        })
    }

    async fn summarize_page(&self, page: &PageRef) -> Result<ToolMetadataItem, ItemFailure> {
        let blocks =
            collect_blocks(self.store.as_ref(), &page.id, Some(self.config.max_blocks)).await?;
        let texts: Vec<String> = blocks
            .into_iter()
            .map(|block| block.text)
            .filter(|text| !text.trim().is_empty())
            .collect();

        let content = prompts::page_content(&page.title, &texts)
            .map_err(|e| ItemFailure::Prompt(e.to_string()))?;
        let summary = self
            .summarize_text(prompts::PAGE_SUMMARY_SYSTEM, content)
            .await?;

        Ok(ToolMetadataItem {
            id: page.id.clone(),
            kind: ItemKind::Page,
            title: page.title.clone(),
            summary,
            schema: None,
        })
    }

    async fn summarize_text(&self, system: &str, content: String) -> Result<String, ItemFailure> {
        let request = ChatRequest::new(vec![ChatMessage::system(system), ChatMessage::user(content)]);
        let summary = self.chat.complete(request).await?.into_text();
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(ItemFailure::EmptySummary);
        }
        Ok(summary.to_string())
    }
}
