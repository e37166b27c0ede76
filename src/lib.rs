//! # chanlog
//!
//! Channel event logger. Every allow-listed channel event is appended to a
//! durable per-channel, per-day plaintext log and, in parallel, submitted in
//! batches to a search backend (SQLite FTS5 or Elasticsearch) so the history
//! can be searched and each hit traced back to its log file.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  Event feed │──▶│ Coordinator  │──▶│ ChannelLogWriter │──▶ <root>/<chan>/<chan>.<date>
//! │  (stdin)    │   │ allow-list + │   └──────────────────┘
//! └─────────────┘   │ presence     │   ┌──────────────────┐
//!                   └──────────────┘──▶│   BulkIndexer    │──▶ SQLite FTS5 / Elasticsearch
//! ┌─────────────┐                      └────────┬─────────┘
//! │  Importer   │──────────────────────────────▶│ failure
//! │ (old logs)  │                               ▼
//! └─────────────┘                        <failure_dir>/<ts>_<rand> ──▶ replay
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chanlog init                                   # create directories and index
//! irc-bridge | chanlog run                       # log events from stdin
//! chanlog search --actor alice --channel general
//! chanlog import --all                           # index existing log files
//! chanlog replay ./data/failed/*                 # resubmit failed batches
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`coordinator`] | Allow-list, presence, event dispatch |
//! | [`log_writer`] | Per-channel per-day plaintext logs |
//! | [`indexer`] | Batched bulk submission and failure persistence |
//! | [`sqlite_backend`] | SQLite FTS5 search backend |
//! | [`elasticsearch`] | Elasticsearch search backend |
//! | [`search`] | Search facade and grouped results |
//! | [`importer`] | Batch import of historical logs |
//! | [`replay`] | Resubmission of failed batches |
//! | [`feed`] | JSON-lines event feed |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod elasticsearch;
pub mod error;
pub mod feed;
pub mod importer;
pub mod indexer;
pub mod log_writer;
pub mod migrate;
pub mod replay;
pub mod search;
pub mod sqlite_backend;
pub mod stats;
