//! Content fetcher and query executor.
//!
//! Turns a validated selection into content: page ids become ordered block
//! lists (cursor-paginated until exhausted) and table filters become record
//! lists (one filtered query per table). Each id is fetched independently;
//! a failing id is reported in [`Fetched::failed`] next to the ids that
//! succeeded.
//!
//! All calls made through one fetcher share a single pool of permits, so
//! page fetches and table queries running side by side stay within the
//! configured concurrency together.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::ExternalApiError;
use crate::models::{Block, FilterSpec, Record};
use crate::workspace::{QueryRequest, WorkspaceStore};

/// Per-id results of a fetch, with failures kept apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub found: BTreeMap<String, T>,
    pub failed: Vec<(String, ExternalApiError)>,
}

impl<T> Default for Fetched<T> {
    fn default() -> Self {
        Self {
            found: BTreeMap::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> FromIterator<(String, Result<T, ExternalApiError>)> for Fetched<T> {
    fn from_iter<I: IntoIterator<Item = (String, Result<T, ExternalApiError>)>>(iter: I) -> Self {
        let mut fetched = Self::default();
        for (id, result) in iter {
            match result {
                Ok(value) => {
                    fetched.found.insert(id, value);
                }
                Err(e) => fetched.failed.push((id, e)),
            }
        }
        fetched
    }
}

pub struct ContentFetcher {
    store: Arc<dyn WorkspaceStore>,
    permits: Arc<Semaphore>,
    max_rows: usize,
}

impl ContentFetcher {
    pub fn new(store: Arc<dyn WorkspaceStore>, concurrency: usize, max_rows: usize) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            max_rows,
        }
    }

    /// The permit pool shared by every call made through this fetcher.
    pub fn permits(&self) -> Arc<Semaphore> {
        self.permits.clone()
    }

    /// Fetch every block of each page, in page order.
    pub async fn fetch_pages(&self, ids: &[String]) -> Fetched<Vec<Block>> {
        let store = self.store.as_ref();
        join_bounded(
            &self.permits,
            ids.iter().map(|id| async move {
                let blocks = collect_blocks(store, id, None).await;
                if let Err(e) = &blocks {
                    tracing::warn!(page_id = %id, error = %e, "page fetch failed");
                }
                (id.clone(), blocks)
            }),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Run one filtered query per table, keyed by the filter's table id.
    pub async fn query_tables(&self, filters: &[FilterSpec]) -> Fetched<Vec<Record>> {
        join_bounded(
            &self.permits,
            filters.iter().map(|spec| async move {
                let rows = self.query_table(spec).await;
                if let Err(e) = &rows {
                    tracing::warn!(table_id = %spec.table_id(), error = %e, "table query failed");
                }
                (spec.table_id().to_string(), rows)
            }),
        )
        .await
        .into_iter()
        .collect()
    }

    async fn query_table(&self, spec: &FilterSpec) -> Result<Vec<Record>, ExternalApiError> {
        let mut rows = Vec::new();
        let mut request = QueryRequest {
            filter: Some(spec.to_value()),
            cursor: None,
            page_size: Some(self.max_rows.min(100)),
        };

        loop {
            let page = self.store.query(spec.table_id(), &request).await?;
            let next = page.continuation().map(str::to_string);
            rows.extend(page.results);

            if rows.len() >= self.max_rows {
                rows.truncate(self.max_rows);
                break;
            }
            match next {
                Some(cursor) => request.cursor = Some(cursor),
                None => break,
            }
        }

        Ok(rows)
    }
}

/// Page through a page's child blocks until the listing is exhausted or
/// `limit` blocks have been read.
pub async fn collect_blocks(
    store: &dyn WorkspaceStore,
    page_id: &str,
    limit: Option<usize>,
) -> Result<Vec<Block>, ExternalApiError> {
    let mut blocks = Vec::new();
    let mut cursor: Option<String> = None;
    if limit == Some(0) {
        return Ok(blocks);
    }

    loop {
        let remaining = limit.map(|limit| limit - blocks.len());
        let page = store
            .list_children(page_id, cursor.as_deref(), remaining)
            .await?;
        let next = page.continuation().map(str::to_string);
        blocks.extend(page.results);

        if let Some(limit) = limit {
            if blocks.len() >= limit {
                blocks.truncate(limit);
                break;
            }
        }
        match next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(blocks)
}

/// Await all futures, each holding a permit from `semaphore` while it runs,
/// returning outputs in input order.
pub(crate) async fn join_bounded<I, F>(semaphore: &Semaphore, futures: I) -> Vec<F::Output>
where
    I: IntoIterator<Item = F>,
    F: Future,
{
    join_all(futures.into_iter().map(|fut| async move {
        // Never closed.
        let _permit = semaphore.acquire().await.ok();
        fut.await
    }))
    .await
}
