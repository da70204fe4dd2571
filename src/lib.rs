//! # Memora
//!
//! A local-first chat-archive importer with a cancellable streaming search.
//!
//! Memora reads exported chat archives (JSON conversation dumps, HTML
//! transcripts, feedback and user metadata), normalizes them into threads
//! and messages, stores them in SQLite, and answers keyword searches as a
//! stream of bounded result batches with live progress. A newer search
//! supersedes the one in flight.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Archive file │──▶│ Normalizer  │──▶│  SQLite  │
//! │ json / html  │   │ + Ingestor  │   │  Store   │
//! └──────────────┘   └─────────────┘   └────┬─────┘
//!                                           │ cursor
//!        Request ──▶ ┌──────────┐ ◀─────────┤
//!                    │  Worker  │     ┌─────┴──────┐
//!        Event   ◀── └──────────┘ ◀── │ SearchEngine│
//!                                     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! memora init
//! memora ingest conversations.json chat.html
//! memora search "ledger" --format md --output ledger.md
//! memora recall '$RECALL budget' --summarize
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Thread, message, feedback and user records |
//! | [`normalize`] | Archive format detection and normalization |
//! | [`store`] | Record collections over SQLite |
//! | [`db`] | Database connection |
//! | [`migrate`] | Versioned schema |
//! | [`ingest`] | Per-file ingest pipeline |
//! | [`search`] | Streaming, supersedable keyword search |
//! | [`protocol`] | Worker requests and events |
//! | [`worker`] | Background worker and its handle |
//! | [`export`] | Merged transcript / Markdown / JSON renderings |
//! | [`recall`] | `$RECALL` chunking and summarization |
//! | [`progress`] | Event sinks and terminal progress |
//! | [`stats`] | Archive statistics |
//! | [`cli`] | Command implementations for the binary |

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod protocol;
pub mod recall;
pub mod search;
pub mod stats;
pub mod store;
pub mod worker;
