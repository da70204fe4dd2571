//! Background worker: owns the store and answers [`Request`]s with
//! [`Event`]s over unbounded channels.
//!
//! ```text
//!  requests ──▶ router ──┬──▶ ingest queue (one file at a time)
//!                        ├──▶ spawned search task (newest id wins)
//!                        └──▶ list / fetch / clear inline
//!                                   │
//!  events   ◀───────────────────────┘
//! ```
//!
//! Every operation reports its own failures as `error` events. Only opening
//! the store is fatal, and that surfaces from [`Worker::spawn`].

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::ingest::run_ingest;
use crate::models::{sort_by_timestamp, Message};
use crate::progress::EventSink;
use crate::protocol::{Event, Request, SearchRequest};
use crate::search::SearchEngine;
use crate::store::Store;

/// Caller side of a running worker.
pub struct WorkerHandle {
    requests: UnboundedSender<Request>,
    events: UnboundedReceiver<Event>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queue a request. Returns false once the worker has stopped.
    pub fn send(&self, request: Request) -> bool {
        self.requests.send(request).is_ok()
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Stop accepting requests, let queued work finish, then wait for the
    /// worker to exit. Events still buffered are returned in order.
    pub async fn shutdown(self) -> Vec<Event> {
        let WorkerHandle {
            requests,
            mut events,
            task,
        } = self;
        drop(requests);
        if let Err(e) = task.await {
            tracing::error!(error = %e, "worker task failed");
        }
        let mut rest = Vec::new();
        while let Ok(event) = events.try_recv() {
            rest.push(event);
        }
        rest
    }
}

pub struct Worker {
    store: Store,
    config: Config,
    engine: SearchEngine,
    events: UnboundedSender<Event>,
}

impl Worker {
    /// Open the store and start the worker on the current runtime.
    pub async fn spawn(config: Config) -> StoreResult<WorkerHandle> {
        let store = Store::open(&config).await?;
        Ok(Self::with_store(store, config))
    }

    pub fn with_store(store: Store, config: Config) -> WorkerHandle {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            store,
            engine: SearchEngine::new(config.search.clone()),
            config,
            events: event_tx,
        };
        let task = tokio::spawn(worker.run(request_rx));
        WorkerHandle {
            requests: request_tx,
            events: event_rx,
            task,
        }
    }

    async fn run(self, mut requests: UnboundedReceiver<Request>) {
        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel::<(String, String)>();
        let ingest_task = tokio::spawn(ingest_queue(
            self.store.clone(),
            self.config.clone(),
            ingest_rx,
            self.events.clone(),
        ));
        let mut searches = JoinSet::new();

        while let Some(request) = requests.recv().await {
            // Reap finished searches so the set does not grow unbounded.
            while searches.try_join_next().is_some() {}

            match request {
                Request::IngestFile { name, text } => {
                    tracing::debug!(file = %name, "queueing ingest");
                    if ingest_tx.send((name, text)).is_err() {
                        self.events.emit(Event::error("Ingest queue is closed"));
                    }
                }
                Request::Search(req) => {
                    if !self.engine.begin(req.search_id) {
                        tracing::debug!(search_id = %req.search_id, "dropping stale search request");
                        continue;
                    }
                    searches.spawn(run_search(
                        self.engine.clone(),
                        self.store.clone(),
                        req,
                        self.events.clone(),
                    ));
                }
                Request::ListThreads => {
                    if let Err(e) = self.list_threads().await {
                        self.report(e);
                    }
                }
                Request::FetchThread { tid } => {
                    if let Err(e) = self.fetch_thread(tid).await {
                        self.report(e);
                    }
                }
                Request::ClearAll => {
                    if let Err(e) = self.clear().await {
                        self.report(e);
                    }
                }
            }
        }

        drop(ingest_tx);
        if let Err(e) = ingest_task.await {
            tracing::error!(error = %e, "ingest queue failed");
        }
        while searches.join_next().await.is_some() {}
        tracing::debug!("worker stopped");
    }

    async fn list_threads(&self) -> StoreResult<()> {
        let threads = self.store.thread_summaries().await?;
        self.events.emit(Event::Threads { threads });
        Ok(())
    }

    async fn fetch_thread(&self, tid: String) -> StoreResult<()> {
        let mut messages: Vec<Message> = self.store.get_by_index("thread_id", &tid).await?;
        sort_by_timestamp(&mut messages);
        self.events.emit(Event::ThreadMessages { tid, messages });
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.store.clear().await?;
        tracing::info!("archive cleared");
        self.events.emit(Event::status("DB cleared"));
        self.list_threads().await
    }

    fn report(&self, e: StoreError) {
        tracing::warn!(error = %e, "request failed");
        self.events.emit(Event::error(e.to_string()));
    }
}

async fn ingest_queue(
    store: Store,
    config: Config,
    mut files: UnboundedReceiver<(String, String)>,
    events: UnboundedSender<Event>,
) {
    while let Some((name, text)) = files.recv().await {
        run_ingest(&store, &config.ingest, &name, &text, &events).await;
    }
}

async fn run_search(
    engine: SearchEngine,
    store: Store,
    req: SearchRequest,
    events: UnboundedSender<Event>,
) {
    if let Err(e) = engine.run(&store, &req, &events).await {
        tracing::warn!(search_id = %req.search_id, error = %e, "search failed");
        events.emit(Event::error(e.to_string()));
    }
}
