//! Process-wide wiring: one set of clients and one snapshot handle.
//!
//! [`Harness::open`] builds the workspace and chat clients once, loads the
//! published snapshot and hands the same `Arc`s to every component it
//! creates. Indexing publishes only after a complete run; the in-process
//! snapshot is swapped after a successful publish.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRun, TaskAgent};
use crate::chat::ChatService;
use crate::config::{secret_from_env, Config};
use crate::fetcher::ContentFetcher;
use crate::filter::FilterBuilder;
use crate::indexer::{IndexReport, Indexer};
use crate::models::Snapshot;
use crate::notion::NotionClient;
use crate::openai::OpenAiChat;
use crate::progress::IndexProgressReporter;
use crate::registry::ActionRegistry;
use crate::search::{SearchOutcome, SearchPipeline};
use crate::selector::LlmSelector;
use crate::snapshot::{PublishOutcome, SnapshotHandle, SnapshotStore};
use crate::workspace::WorkspaceStore;

/// Result of `index`: the run report and, unless dry-run, the publish outcome.
#[derive(Debug)]
pub struct IndexSummary {
    pub report: IndexReport,
    pub published: Option<PublishOutcome>,
}

pub struct Harness {
    config: Config,
    store: Arc<dyn WorkspaceStore>,
    chat: Arc<dyn ChatService>,
    snapshots: SnapshotStore,
    current: SnapshotHandle,
}

impl Harness {
    /// Connect to the workspace and chat service and load the snapshot.
    pub async fn open(config: Config) -> Result<Self> {
        let token = secret_from_env(&config.workspace.token_env)?;
        let api_key = secret_from_env(&config.chat.api_key_env)?;

        let store: Arc<dyn WorkspaceStore> = Arc::new(NotionClient::new(&config.workspace, token)?);
        let chat: Arc<dyn ChatService> = Arc::new(OpenAiChat::new(&config.chat, api_key)?);
        let snapshots = SnapshotStore::new(&config.snapshot)?;

        Self::with_clients(config, store, chat, snapshots).await
    }

    /// Build a harness around existing clients.
    pub async fn with_clients(
        config: Config,
        store: Arc<dyn WorkspaceStore>,
        chat: Arc<dyn ChatService>,
        snapshots: SnapshotStore,
    ) -> Result<Self> {
        let snapshot = snapshots
            .load()
            .await
            .with_context(|| format!("Failed to load snapshot from {}", snapshots.location()))?;
        tracing::debug!(items = snapshot.len(), location = %snapshots.location(), "snapshot loaded");

        Ok(Self {
            config,
            store,
            chat,
            snapshots,
            current: SnapshotHandle::new(snapshot),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.current()
    }

    pub fn registry(&self) -> ActionRegistry {
        ActionRegistry::build(&self.snapshot())
    }

    /// Index the workspace and publish the result unless `dry_run`.
    ///
    /// A cancelled or failed run returns an error and leaves the published
    /// snapshot untouched.
    pub async fn index(
        &self,
        progress: &dyn IndexProgressReporter,
        cancel: &CancellationToken,
        dry_run: bool,
    ) -> Result<IndexSummary> {
        let indexer = Indexer::new(
            self.store.clone(),
            self.chat.clone(),
            self.config.indexer.clone(),
        );
        let report = indexer.index(progress, cancel).await?;

        if dry_run {
            return Ok(IndexSummary {
                report,
                published: None,
            });
        }

        let outcome = self.snapshots.publish(&report.snapshot).await?;
        self.current.replace(report.snapshot.clone());
        Ok(IndexSummary {
            report,
            published: Some(outcome),
        })
    }

    /// Answer a query from the current snapshot.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome> {
        let search = &self.config.search;
        let pipeline = SearchPipeline::new(
            Arc::new(LlmSelector::new(self.chat.clone())),
            FilterBuilder::from_config(self.chat.clone(), search)?,
            ContentFetcher::new(self.store.clone(), search.concurrency, search.max_rows),
        );
        let snapshot = self.snapshot();
        Ok(pipeline.search(query, &snapshot).await?)
    }

    /// Turn a note into workspace entries with the task agent.
    pub async fn add(&self, text: &str) -> Result<AgentRun> {
        let agent = TaskAgent::new(
            self.chat.clone(),
            self.store.clone(),
            Arc::new(self.registry()),
            self.config.agent.clone(),
        )?;
        Ok(agent.run(text).await?)
    }
}
