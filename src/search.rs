//! Streaming keyword search over the message archive.
//!
//! A search makes one forward pass over the `messages` collection,
//! matching the query as a case-insensitive substring of each message's
//! text. Matches are flushed in bounded batches, progress is reported every
//! `progress_every` scanned records, and the scan yields to the scheduler at
//! the same cadence.
//!
//! Only one search is active per engine. Starting a newer one supersedes
//! the in-flight scan: every event is emitted under the same lock that
//! records the active id, so once a newer search has started no further
//! event of the older one is sent, and the older scan stops at its next
//! yield point.
//!
//! ```text
//! Idle ─▶ MetaSent ─▶ Scanning ─▶ Done
//!                        │
//!                        └──────▶ Aborted   (superseded)
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use futures::TryStreamExt;

use crate::config::SearchConfig;
use crate::error::StoreResult;
use crate::models::Message;
use crate::progress::EventSink;
use crate::protocol::{Event, SearchId, SearchRequest};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    MetaSent,
    Scanning,
    Done,
    Aborted,
}

/// Final state of one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOutcome {
    pub search_id: SearchId,
    pub phase: SearchPhase,
    pub scanned: u64,
    pub matched: u64,
    pub total: u64,
}

/// Effective parameters after defaults and clamping.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScanPlan {
    needle: String,
    batch_size: usize,
    max_matches: u64,
    progress_every: u64,
}

impl ScanPlan {
    fn new(req: &SearchRequest, config: &SearchConfig) -> Self {
        let mut batch_size = req.batch.unwrap_or(config.batch_size).max(1);
        if req.for_recall {
            batch_size = batch_size.max(config.recall_min_batch);
        }
        Self {
            // Blank queries match nothing.
            needle: req.query.trim().to_lowercase(),
            batch_size,
            max_matches: req.max_matches.unwrap_or(config.max_matches).max(1) as u64,
            progress_every: config.progress_every.max(1) as u64,
        }
    }

    fn matches(&self, message: &Message) -> bool {
        !self.needle.is_empty() && message.text.to_lowercase().contains(&self.needle)
    }
}

#[derive(Clone)]
pub struct SearchEngine {
    active: Arc<Mutex<SearchId>>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            active: Arc::new(Mutex::new(SearchId::default())),
            config,
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, SearchId> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active(&self) -> SearchId {
        *self.lock_active()
    }

    /// Mark `id` as the active search, superseding any older one. Returns
    /// false when `id` is older than the active search; such a request is
    /// stale and must not run.
    pub fn begin(&self, id: SearchId) -> bool {
        let mut active = self.lock_active();
        if id < *active {
            return false;
        }
        *active = id;
        true
    }

    fn is_active(&self, id: SearchId) -> bool {
        *self.lock_active() == id
    }

    /// Emit `event` only if `id` is still the active search.
    fn emit(&self, id: SearchId, sink: &dyn EventSink, event: Event) -> bool {
        let active = self.lock_active();
        if *active != id {
            return false;
        }
        sink.emit(event);
        true
    }

    /// [`begin`](Self::begin) then [`run`](Self::run).
    pub async fn search(
        &self,
        store: &Store,
        req: &SearchRequest,
        sink: &dyn EventSink,
    ) -> StoreResult<SearchOutcome> {
        if !self.begin(req.search_id) {
            tracing::debug!(search_id = %req.search_id, "dropping stale search request");
            return Ok(SearchOutcome {
                search_id: req.search_id,
                phase: SearchPhase::Aborted,
                scanned: 0,
                matched: 0,
                total: 0,
            });
        }
        self.run(store, req, sink).await
    }

    /// Scan the archive for an already-begun search.
    pub async fn run(
        &self,
        store: &Store,
        req: &SearchRequest,
        sink: &dyn EventSink,
    ) -> StoreResult<SearchOutcome> {
        let id = req.search_id;
        let plan = ScanPlan::new(req, &self.config);
        let mut outcome = SearchOutcome {
            search_id: id,
            phase: SearchPhase::Idle,
            scanned: 0,
            matched: 0,
            total: 0,
        };

        // Point-in-time estimate; concurrent ingest may make it stale.
        outcome.total = store.count::<Message>().await?.max(0) as u64;
        if !self.emit(
            id,
            sink,
            Event::SearchMeta {
                total: outcome.total,
                search_id: id,
            },
        ) {
            return Ok(aborted(outcome));
        }
        outcome.phase = SearchPhase::MetaSent;

        let mut buffer: Vec<Message> = Vec::with_capacity(plan.batch_size);
        if !plan.needle.is_empty() {
            outcome.phase = SearchPhase::Scanning;
            let mut rows = store.scan_messages();
            while let Some(message) = rows.try_next().await? {
                outcome.scanned += 1;

                if plan.matches(&message) {
                    buffer.push(message);
                    outcome.matched += 1;
                    if buffer.len() >= plan.batch_size {
                        let batch = std::mem::take(&mut buffer);
                        if !self.emit(id, sink, batch_event(batch, false, id)) {
                            return Ok(aborted(outcome));
                        }
                    }
                    if outcome.matched >= plan.max_matches {
                        break;
                    }
                }

                if outcome.scanned % plan.progress_every == 0 {
                    if !self.emit(id, sink, progress_event(&outcome)) {
                        return Ok(aborted(outcome));
                    }
                    tokio::task::yield_now().await;
                    if !self.is_active(id) {
                        return Ok(aborted(outcome));
                    }
                }
            }
        }

        if !buffer.is_empty() && !self.emit(id, sink, batch_event(buffer, false, id)) {
            return Ok(aborted(outcome));
        }
        if !self.emit(id, sink, batch_event(Vec::new(), true, id)) {
            return Ok(aborted(outcome));
        }
        if !self.emit(id, sink, progress_event(&outcome)) {
            return Ok(aborted(outcome));
        }

        outcome.phase = SearchPhase::Done;
        tracing::debug!(
            search_id = %id,
            scanned = outcome.scanned,
            matched = outcome.matched,
            "search finished"
        );
        Ok(outcome)
    }
}

fn aborted(mut outcome: SearchOutcome) -> SearchOutcome {
    tracing::debug!(search_id = %outcome.search_id, scanned = outcome.scanned, "search superseded");
    outcome.phase = SearchPhase::Aborted;
    outcome
}

fn batch_event(batch: Vec<Message>, done: bool, search_id: SearchId) -> Event {
    Event::SearchBatch {
        batch,
        done,
        search_id,
    }
}

fn progress_event(outcome: &SearchOutcome) -> Event {
    Event::SearchProgress {
        scanned: outcome.scanned,
        matched: outcome.matched,
        total: outcome.total,
        search_id: outcome.search_id,
    }
}
