//! Wire protocol between the background worker and its caller.
//!
//! Requests arrive as `{"type": "...", "payload": {...}}`; events leave as
//! flat `{"type": "...", ...}` objects. Every search event carries a
//! [`SearchId`] so callers with several searches in flight can discard
//! answers to superseded requests (see [`SearchTracker`]).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Message, ThreadSummary};

/// Monotonically increasing token identifying one logical search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchId(pub u64);

impl SearchId {
    pub fn next(self) -> Self {
        SearchId(self.0 + 1)
    }
}

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters of one streaming search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    /// Results per batch; config default when absent.
    #[serde(default)]
    pub batch: Option<usize>,
    #[serde(default)]
    pub max_matches: Option<usize>,
    pub search_id: SearchId,
    #[serde(default)]
    pub for_recall: bool,
}

/// Inbound operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Request {
    #[serde(rename = "INGEST_FILE")]
    IngestFile { name: String, text: String },
    #[serde(rename = "LIST_THREADS")]
    ListThreads,
    #[serde(rename = "FETCH_THREAD")]
    FetchThread { tid: String },
    #[serde(rename = "SEARCH_STREAM")]
    Search(SearchRequest),
    #[serde(rename = "CLEAR_DB")]
    ClearAll,
}

/// Outbound events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "status")]
    Status { msg: String },
    #[serde(rename = "error")]
    Error { msg: String },
    #[serde(rename = "THREADS")]
    Threads { threads: Vec<ThreadSummary> },
    #[serde(rename = "THREAD_MSGS")]
    ThreadMessages { tid: String, messages: Vec<Message> },
    #[serde(rename = "SEARCH_META", rename_all = "camelCase")]
    SearchMeta { total: u64, search_id: SearchId },
    #[serde(rename = "SEARCH_PROGRESS", rename_all = "camelCase")]
    SearchProgress {
        scanned: u64,
        matched: u64,
        total: u64,
        search_id: SearchId,
    },
    #[serde(rename = "SEARCH_BATCH", rename_all = "camelCase")]
    SearchBatch {
        batch: Vec<Message>,
        done: bool,
        search_id: SearchId,
    },
}

impl Event {
    pub fn status(msg: impl Into<String>) -> Self {
        Event::Status { msg: msg.into() }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Event::Error { msg: msg.into() }
    }

    /// The search this event answers, if it is a search event.
    pub fn search_id(&self) -> Option<SearchId> {
        match self {
            Event::SearchMeta { search_id, .. }
            | Event::SearchProgress { search_id, .. }
            | Event::SearchBatch { search_id, .. } => Some(*search_id),
            _ => None,
        }
    }

    /// True for the terminal batch of a search.
    pub fn is_search_done(&self) -> bool {
        matches!(self, Event::SearchBatch { done: true, .. })
    }
}

/// Caller-side bookkeeping for dropping stale search events.
#[derive(Debug, Default, Clone)]
pub struct SearchTracker {
    current: SearchId,
}

impl SearchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the id for a new search, superseding the previous one.
    pub fn next(&mut self) -> SearchId {
        self.current = self.current.next();
        self.current
    }

    pub fn current(&self) -> SearchId {
        self.current
    }

    /// Non-search events are always accepted.
    pub fn accepts(&self, event: &Event) -> bool {
        event.search_id().map_or(true, |id| id == self.current)
    }
}
