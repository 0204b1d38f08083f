//! Error taxonomy for the indexing, routing and agent pipeline.
//!
//! | Error | Scope | Handling |
//! |-------|-------|----------|
//! | [`ExternalApiError`] | one call to the workspace store or chat service | reads retried with backoff, writes never retried |
//! | [`IndexingItemError`] | one workspace item during indexing | logged, item skipped, run continues |
//! | [`FilterGenerationError`] | one table during search | table omitted, pages and other tables still returned |
//! | [`UnknownSelectionIdError`] | one id returned by the selector | id dropped, warning logged |
//! | [`AgentLoopExceeded`] | one agent run | fatal for that run |
//!
//! Per-item and per-table failures are reported next to the successful
//! results; only request-level failures surface as a terminal error.

use thiserror::Error;

use crate::models::{ItemKind, WorkspaceItem};

/// A failed call to one of the external collaborators.
///
/// `service` is a short label (`"workspace"`, `"chat"`, `"s3"`) used in
/// messages and logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalApiError {
    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("{service} rate limited the request")]
    RateLimited { service: &'static str },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} transport error: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned a malformed response: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },
}

impl ExternalApiError {
    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, rate limits, server errors and transport failures are
    /// transient. Client errors (4xx other than 429) and malformed
    /// responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Malformed { .. } => false,
        }
    }

    pub fn service(&self) -> &'static str {
        match self {
            Self::Timeout { service }
            | Self::RateLimited { service }
            | Self::Status { service, .. }
            | Self::Transport { service, .. }
            | Self::Malformed { service, .. } => service,
        }
    }

    pub(crate) fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            service,
            message: message.into(),
        }
    }
}

/// Why a single item could not be summarized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ItemFailure {
    #[error(transparent)]
    External(#[from] ExternalApiError),

    #[error("chat service returned an empty summary")]
    EmptySummary,

    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

/// One item's summarization or fetch failed during an indexing run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to index {kind} '{title}' ({item_id}): {reason}")]
pub struct IndexingItemError {
    pub item_id: String,
    pub kind: ItemKind,
    pub title: String,
    pub reason: ItemFailure,
}

impl IndexingItemError {
    pub fn new(item: WorkspaceItem, reason: ItemFailure) -> Self {
        Self {
            item_id: item.id,
            kind: item.kind,
            title: item.title,
            reason,
        }
    }
}

/// An indexing run that produced no snapshot.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The run was cancelled; nothing may be published.
    #[error("indexing cancelled")]
    Cancelled,

    /// A listing call failed after retries, so the item set is incomplete.
    #[error("listing {kind}s failed: {source}")]
    Listing {
        kind: ItemKind,
        #[source]
        source: ExternalApiError,
    },
}

/// Why a filter could not be built for a table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterFailure {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("response is a JSON {0}, expected an object")]
    NotObject(&'static str),

    #[error("filter is empty")]
    EmptyFilter,

    #[error(transparent)]
    Chat(#[from] ExternalApiError),

    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

/// A table's filter could not be synthesized; the table is left out of the
/// answer rather than queried unfiltered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("filter generation failed for table {table_id}: {reason}")]
pub struct FilterGenerationError {
    pub table_id: String,
    pub reason: FilterFailure,
}

/// The selector could not produce a selection; fatal for the search request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error(transparent)]
    Chat(#[from] ExternalApiError),

    #[error("selection is not a valid {{pageIds, tableIds}} object: {0}")]
    Malformed(String),

    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

/// The selector returned an id that is not in the snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("selector returned unknown id '{id}'")]
pub struct UnknownSelectionIdError {
    pub id: String,
}

/// The reasoning/tool-execution loop hit its cycle cap.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("agent exceeded {max_cycles} reasoning/tool cycles")]
pub struct AgentLoopExceeded {
    pub max_cycles: usize,
}

/// Terminal failure of one agent run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    LoopExceeded(#[from] AgentLoopExceeded),

    #[error(transparent)]
    Chat(#[from] ExternalApiError),

    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

/// Failure executing a registered action.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    External(#[from] ExternalApiError),
}
