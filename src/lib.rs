//! # Notion Harness
//!
//! Index a Notion workspace into a compact metadata snapshot, then use that
//! snapshot to answer natural-language searches and to turn short notes
//! into new records and page text through a tool-calling agent.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌─────────────┐    publish    ┌────────────┐
//!  Workspace ─────────▶│   Indexer   │──────────────▶│  Snapshot  │
//!  (store API)         └─────────────┘  (atomic)     │ file / S3  │
//!      ▲  ▲                                          └─────┬──────┘
//!      │  │                                                │ load
//!      │  │      ┌──────────┐   ┌────────┐   ┌─────────┐   │
//!      │  └──────│ Fetcher  │◀──│ Filter │◀──│Selector │◀──┤  nh search
//!      │         └──────────┘   └────────┘   └─────────┘   │
//!      │                                                   │
//!      │         ┌──────────┐   ┌──────────┐               │
//!      └─────────│  Agent   │◀──│ Registry │◀──────────────┘  nh add
//!                └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! nh index                      # summarize the workspace, publish the snapshot
//! nh tools                      # list the actions derived from the snapshot
//! nh search "open tasks for the garden"
//! nh add "remind me to call the plumber tomorrow, urgent"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`workspace`] | Workspace store interface |
//! | [`notion`] | Notion REST client |
//! | [`chat`] | Chat service interface |
//! | [`openai`] | OpenAI-compatible chat client |
//! | [`retry`] | Timeouts and backoff |
//! | [`prompts`] | Prompt templates |
//! | [`progress`] | Indexing progress on stderr |
//! | [`indexer`] | Metadata indexer |
//! | [`snapshot`] | Snapshot persistence and handle |
//! | [`s3`] | S3 object storage |
//! | [`registry`] | Actions derived from the snapshot |
//! | [`selector`] | Search routing |
//! | [`filter`] | Query filter synthesis |
//! | [`fetcher`] | Page and table content retrieval |
//! | [`search`] | Search pipeline |
//! | [`agent`] | Task agent loop |
//! | [`app`] | Process-wide wiring |

pub mod agent;
pub mod app;
pub mod chat;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod indexer;
pub mod models;
pub mod notion;
pub mod openai;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod retry;
pub mod s3;
pub mod search;
pub mod selector;
pub mod snapshot;
pub mod workspace;
