//! # wiki-ingest
//!
//! Repository acquisition and content ingestion for modded-game
//! documentation wikis.
//!
//! A deployment clones a project's documentation repository under a size
//! ceiling, then walks its working tree and records pages, item tags,
//! recipes and recipe types into the project database. Problems found along
//! the way become per-file issues instead of aborting the run, and progress
//! is streamed to anyone watching the project.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────┐
//! │ git acquirer │──▶│   Ingestor    │──▶│  SQLite   │
//! │ size watchdog│   │ sub-ingestors │   │ projects  │
//! └──────────────┘   └──────┬────────┘   └──────────┘
//!                           │ progress lines
//!                           ▼
//!                    ┌──────────────┐      ┌───────────┐
//!                    │ relay + issue│─────▶│ WebSocket │
//!                    │  callback    │      │ observers │
//!                    └──────────────┘      └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! wikictl init
//! wikictl deploy techmod https://github.com/example/techmod-wiki --root docs
//! wikictl serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database collaborator trait, SQLite and in-memory backends |
//! | [`deploy`] | Deployment supervisor |
//! | [`error`] | Issue taxonomy and acquisition failures |
//! | [`git`] | Repository cloning, branch checkout, revision lookup |
//! | [`ingest`] | Sub-ingestors and their orchestrator |
//! | [`issues`] | Deduplicating issue recorder |
//! | [`migrate`] | Schema creation |
//! | [`models`] | Staged records passed to the database |
//! | [`progress`] | Log sinks, including the realtime relay |
//! | [`project_meta`] | `wiki.json` parsing |
//! | [`realtime`] | Per-project observer fan-out |
//! | [`recipe`] | Built-in and custom recipe parsers |
//! | [`resource_location`] | `namespace:path` identifiers |
//! | [`schema`] | Bundled JSON schemas |
//! | [`server`] | HTTP and WebSocket endpoints |

pub mod config;
pub mod db;
pub mod deploy;
pub mod error;
pub mod git;
pub mod ingest;
pub mod issues;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod project_meta;
pub mod realtime;
pub mod recipe;
pub mod resource_location;
pub mod schema;
pub mod server;
