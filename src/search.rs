//! Search pipeline: query → selection → filters → content.
//!
//! ```text
//!            ┌─▶ page ids ──────────────────────────▶ fetch_pages ───┐
//!  route ────┤                                                        ├─▶ SearchOutcome
//!            └─▶ table ids ─▶ FilterBuilder (bounded) ─▶ query_tables ┘
//! ```
//!
//! Results are partial: a page that fails to fetch, or a table
//! whose filter cannot be built or whose query fails, is listed in
//! [`SearchOutcome::failures`] while everything else is still returned.
//! Only a selector failure fails the whole request.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SelectorError;
use crate::fetcher::{join_bounded, ContentFetcher};
use crate::filter::FilterBuilder;
use crate::models::{Block, FilterSpec, ItemKind, Record, Snapshot};
use crate::selector::{route, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Fetch,
    Filter,
    Query,
}

/// One page or table that could not be answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchFailure {
    pub id: String,
    pub kind: ItemKind,
    pub stage: FailureStage,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub pages: BTreeMap<String, Vec<Block>>,
    pub tables: BTreeMap<String, Vec<Record>>,
    pub failures: Vec<SearchFailure>,
}

/// Filter building, page fetches and table queries all draw from the
/// fetcher's permit pool.
pub struct SearchPipeline {
    selector: Arc<dyn Selector>,
    filters: FilterBuilder,
    fetcher: ContentFetcher,
}

impl SearchPipeline {
    pub fn new(selector: Arc<dyn Selector>, filters: FilterBuilder, fetcher: ContentFetcher) -> Self {
        Self {
            selector,
            filters,
            fetcher,
        }
    }

    pub async fn search(&self, query: &str, snapshot: &Snapshot) -> Result<SearchOutcome, SelectorError> {
        if snapshot.is_empty() {
            tracing::info!("snapshot is empty, nothing to search");
            return Ok(SearchOutcome::default());
        }

        let selection = route(self.selector.as_ref(), query, snapshot).await?;
        let page_ids: Vec<String> = selection.page_ids().iter().cloned().collect();
        let table_ids: Vec<String> = selection.table_ids().iter().cloned().collect();

        let (pages, (tables, mut failures)) = tokio::join!(
            self.fetcher.fetch_pages(&page_ids),
            self.answer_tables(query, &table_ids, snapshot),
        );

        failures.extend(pages.failed.into_iter().map(|(id, e)| SearchFailure {
            id,
            kind: ItemKind::Page,
            stage: FailureStage::Fetch,
            error: e.to_string(),
        }));

        let outcome = SearchOutcome {
            pages: pages.found,
            tables,
            failures,
        };
        tracing::info!(
            pages = outcome.pages.len(),
            tables = outcome.tables.len(),
            failed = outcome.failures.len(),
            "search finished"
        );
        Ok(outcome)
    }

    /// Build a filter per table, then query the tables that got one.
    async fn answer_tables(
        &self,
        query: &str,
        table_ids: &[String],
        snapshot: &Snapshot,
    ) -> (BTreeMap<String, Vec<Record>>, Vec<SearchFailure>) {
        let permits = self.fetcher.permits();
        let built = join_bounded(
            &permits,
            table_ids.iter().map(|id| async move {
                let schema = snapshot
                    .get(id)
                    .and_then(|item| item.schema.as_deref())
                    .unwrap_or_default();
                self.filters.build(query, id, schema).await
            }),
        )
        .await;

        let mut specs: Vec<FilterSpec> = Vec::with_capacity(built.len());
        let mut failures = Vec::new();
        for result in built {
            match result {
                Ok(spec) => specs.push(spec),
                Err(e) => {
                    tracing::warn!(table_id = %e.table_id, error = %e.reason, "filter generation failed, omitting table");
                    failures.push(SearchFailure {
                        id: e.table_id.clone(),
                        kind: ItemKind::Table,
                        stage: FailureStage::Filter,
                        error: e.reason.to_string(),
                    });
                }
            }
        }

        let queried = self.fetcher.query_tables(&specs).await;
        failures.extend(queried.failed.into_iter().map(|(id, e)| SearchFailure {
            id,
            kind: ItemKind::Table,
            stage: FailureStage::Query,
            error: e.to_string(),
        }));

        (queried.found, failures)
    }
}
