//! Ingestion pipeline orchestration.
//!
//! Coordinates the per-file flow: normalization → thread upsert → message
//! writes in bounded transactions → status events. Files are handled one
//! at a time in the order they are submitted; each write batch is followed
//! by a scheduler yield so searches running on the same runtime stay
//! responsive.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::normalize::{Normalizer, ParsedFile};
use crate::progress::EventSink;
use crate::protocol::Event;
use crate::store::{Record, Store};

/// Counts of records written for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub threads: usize,
    pub messages: usize,
    pub feedback: usize,
    pub users: usize,
}

pub struct Ingestor<'a> {
    store: &'a Store,
    normalizer: Normalizer,
    write_batch: usize,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a Store, config: &IngestConfig) -> Self {
        Self {
            store,
            normalizer: Normalizer::new(config.max_text_chars),
            write_batch: config.write_batch.max(1),
        }
    }

    /// Normalize and persist one file, reporting per-thread and per-file
    /// status. A parse or store failure aborts this file only.
    pub async fn ingest_file(
        &self,
        name: &str,
        text: &str,
        sink: &dyn EventSink,
    ) -> Result<IngestSummary, IngestError> {
        let mut summary = IngestSummary::default();

        match self.normalizer.parse(name, text)? {
            ParsedFile::Conversations(conversations) => {
                for conv in conversations {
                    if conv.messages.is_empty() {
                        tracing::debug!(thread = %conv.thread.id, "skipping conversation without messages");
                        continue;
                    }
                    self.store.put(&conv.thread).await?;
                    self.write_batched(&conv.messages).await?;

                    summary.threads += 1;
                    summary.messages += conv.messages.len();
                    sink.emit(Event::status(format!(
                        "Ingested thread: {} ({} msgs)",
                        conv.thread.title,
                        conv.messages.len()
                    )));
                }
                sink.emit(Event::status(format!(
                    "Done. Threads: {}, Messages: {}",
                    summary.threads, summary.messages
                )));
            }
            ParsedFile::Feedback(records) => {
                self.write_batched(&records).await?;
                summary.feedback = records.len();
                sink.emit(Event::status(format!(
                    "Done. Feedback records: {}",
                    records.len()
                )));
            }
            ParsedFile::User(profile) => {
                self.store.put(&profile).await?;
                summary.users = 1;
                sink.emit(Event::status(format!("Stored user profile {}", profile.id)));
            }
            ParsedFile::Skipped(note) => {
                tracing::info!(file = name, "{}", note);
                sink.emit(Event::status(note));
            }
        }

        tracing::info!(
            file = name,
            threads = summary.threads,
            messages = summary.messages,
            feedback = summary.feedback,
            "ingested file"
        );
        Ok(summary)
    }

    async fn write_batched<R: Record>(&self, records: &[R]) -> Result<(), IngestError> {
        for chunk in records.chunks(self.write_batch) {
            self.store.bulk_put(chunk).await?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// Ingest one file, convert any failure into an `error` event, then send a
/// fresh thread list so observers see the new threads without polling.
pub async fn run_ingest(
    store: &Store,
    config: &IngestConfig,
    name: &str,
    text: &str,
    sink: &dyn EventSink,
) -> Option<IngestSummary> {
    let result = Ingestor::new(store, config)
        .ingest_file(name, text, sink)
        .await;

    let summary = match result {
        Ok(summary) => Some(summary),
        Err(e) => {
            tracing::warn!(file = name, error = %e, "ingest failed");
            sink.emit(Event::error(e.to_string()));
            None
        }
    };

    match store.thread_summaries().await {
        Ok(threads) => sink.emit(Event::Threads { threads }),
        Err(e) => sink.emit(Event::error(e.to_string())),
    }

    summary
}
