//! Command implementations for the `memora` binary.
//!
//! Every command except `init` and `stats` talks to a [`Worker`] over its
//! event channel, the same way an embedding UI would: send a [`Request`],
//! then read events until the answer arrives. Progress goes to stderr via
//! the selected [`ProgressReporter`]; results go to stdout or `--output`.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::export::{self, ExportFormat};
use crate::models::{Message, ThreadSummary};
use crate::progress::{ProgressMode, ProgressReporter};
use crate::protocol::{Event, Request, SearchRequest, SearchTracker};
use crate::recall::{self, CommandSummarizer};
use crate::worker::{Worker, WorkerHandle};

/// A worker plus the caller-side state needed to read its answers.
pub struct Session {
    handle: WorkerHandle,
    reporter: Box<dyn ProgressReporter>,
    tracker: SearchTracker,
    errors: usize,
}

impl Session {
    pub async fn open(config: &Config, progress: ProgressMode) -> Result<Self> {
        let handle = Worker::spawn(config.clone())
            .await
            .with_context(|| format!("Failed to open archive at {}", config.db.path.display()))?;
        Ok(Self {
            handle,
            reporter: progress.reporter(),
            tracker: SearchTracker::new(),
            errors: 0,
        })
    }

    fn send(&self, request: Request) -> Result<()> {
        if !self.handle.send(request) {
            bail!("Worker stopped unexpectedly");
        }
        Ok(())
    }

    /// Next event for the current search (or any non-search event).
    async fn next_event(&mut self) -> Result<Event> {
        loop {
            let event = self
                .handle
                .recv()
                .await
                .context("Worker stopped unexpectedly")?;
            if !self.tracker.accepts(&event) {
                continue;
            }
            if matches!(event, Event::Error { .. }) {
                self.errors += 1;
            }
            self.reporter.report(&event);
            return Ok(event);
        }
    }

    async fn close(self) -> usize {
        let Session {
            handle,
            reporter,
            errors,
            ..
        } = self;
        let mut errors = errors;
        for event in handle.shutdown().await {
            if matches!(event, Event::Error { .. }) {
                errors += 1;
            }
            reporter.report(&event);
        }
        errors
    }

    async fn threads(&mut self) -> Result<Vec<ThreadSummary>> {
        self.send(Request::ListThreads)?;
        loop {
            if let Event::Threads { threads } = self.next_event().await? {
                return Ok(threads);
            }
        }
    }

    /// Run one search to completion and return its hits in found order.
    pub async fn search(
        &mut self,
        query: &str,
        batch: Option<usize>,
        max_matches: Option<usize>,
        for_recall: bool,
    ) -> Result<Vec<Message>> {
        let search_id = self.tracker.next();
        self.send(Request::Search(SearchRequest {
            query: query.to_string(),
            batch,
            max_matches,
            search_id,
            for_recall,
        }))?;

        let mut hits = Vec::new();
        loop {
            match self.next_event().await? {
                Event::SearchBatch { batch, done, .. } => {
                    hits.extend(batch);
                    if done {
                        break;
                    }
                }
                Event::Error { msg } => bail!("Search failed: {}", msg),
                _ => {}
            }
        }
        // Final progress follows the done batch.
        self.next_event().await?;
        Ok(hits)
    }
}

/// Queue every file, wait until each has been answered with a thread-list
/// refresh, then print a one-line summary.
pub async fn run_ingest(config: &Config, files: &[PathBuf], progress: ProgressMode) -> Result<()> {
    if files.is_empty() {
        bail!("No files given");
    }
    let mut session = Session::open(config, progress).await?;

    for path in files {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        session.send(Request::IngestFile {
            name,
            text: String::from_utf8_lossy(&bytes).into_owned(),
        })?;
    }

    let mut answered = 0;
    let mut thread_count = 0;
    while answered < files.len() {
        if let Event::Threads { threads } = session.next_event().await? {
            answered += 1;
            thread_count = threads.len();
        }
    }

    let errors = session.close().await;
    println!(
        "Processed {} file(s), {} failed. Archive holds {} threads.",
        files.len(),
        errors,
        thread_count
    );
    if errors > 0 {
        bail!("{} file(s) failed to ingest", errors);
    }
    Ok(())
}

pub async fn run_threads(config: &Config, json: bool) -> Result<()> {
    let mut session = Session::open(config, ProgressMode::Off).await?;
    let threads = session.threads().await?;
    session.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&threads)?);
        return Ok(());
    }
    if threads.is_empty() {
        println!("No threads.");
        return Ok(());
    }
    for (i, t) in threads.iter().enumerate() {
        let title = if t.title.is_empty() {
            "(untitled)"
        } else {
            t.title.as_str()
        };
        println!(
            "{:03}  {:<24}  {:>5} msgs  {}",
            i + 1,
            t.created_at,
            t.count,
            title
        );
        println!("     {}", t.id);
    }
    Ok(())
}

pub async fn run_thread(config: &Config, tid: &str, json: bool) -> Result<()> {
    let mut session = Session::open(config, ProgressMode::Off).await?;
    session.send(Request::FetchThread {
        tid: tid.to_string(),
    })?;
    let messages = loop {
        if let Event::ThreadMessages { messages, .. } = session.next_event().await? {
            break messages;
        }
    };
    session.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }
    if messages.is_empty() {
        bail!("thread not found: {}", tid);
    }
    println!("[{}] {} messages\n", tid, messages.len());
    for m in &messages {
        println!("[{}] {}: {}", m.timestamp, m.role, m.text);
    }
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    batch: Option<usize>,
    max_matches: Option<usize>,
    format: ExportFormat,
    output: Option<&Path>,
    progress: ProgressMode,
) -> Result<()> {
    let mut session = Session::open(config, progress).await?;
    let hits = session.search(query, batch, max_matches, false).await?;
    session.close().await;

    tracing::info!(query, hits = hits.len(), "search complete");
    if hits.is_empty() {
        eprintln!("No matches for '{}'.", query);
    }
    let rendered = export::render(&hits, format, query)?;
    let output = export::output_path(output, query, format);
    export::write_export(&rendered, output.as_deref())
}

/// Run a recall search for `command` (`$RECALL <kw>` or a bare keyword).
/// Without `summarize` the packed chunks are printed for piping elsewhere;
/// with it they go through the configured summarizer command.
pub async fn run_recall(
    config: &Config,
    command: &str,
    max_matches: Option<usize>,
    summarize: bool,
    json: bool,
    output: Option<&Path>,
    progress: ProgressMode,
) -> Result<()> {
    let Some(keyword) = recall::parse_recall(command) else {
        bail!("Nothing to recall: give a keyword, e.g. '$RECALL budget'");
    };

    let mut session = Session::open(config, progress).await?;
    let hits = session
        .search(&keyword, Some(config.search.batch_size), max_matches, true)
        .await?;
    session.close().await;

    if !summarize {
        let chunks = recall::pack_chunks(&hits, config.recall.max_chunk_chars);
        let total = chunks.len();
        let rendered = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| format!("--- CHUNK {}/{} ---\n{}", i + 1, total, c))
            .collect::<Vec<_>>()
            .join("\n");
        let output = export::output_path(output, &keyword, ExportFormat::Txt);
        return export::write_export(&rendered, output.as_deref());
    }

    let summarizer = CommandSummarizer::new(&config.recall.command)?;
    let digest = recall::summarize(
        &summarizer,
        &keyword,
        &hits,
        config.recall.max_chunk_chars,
        |i, n| {
            if progress != ProgressMode::Off {
                eprintln!("Summarizing chunk {}/{}…", i, n);
            }
        },
    )
    .await?;

    let (rendered, format) = if json {
        (serde_json::to_string_pretty(&digest)?, ExportFormat::Json)
    } else {
        (digest.markdown, ExportFormat::Md)
    };
    let output = export::output_path(output, &keyword, format);
    export::write_export(&rendered, output.as_deref())
}

pub async fn run_clear(config: &Config) -> Result<()> {
    let mut session = Session::open(config, ProgressMode::Off).await?;
    session.send(Request::ClearAll)?;
    loop {
        match session.next_event().await? {
            Event::Threads { .. } => break,
            Event::Error { msg } => {
                session.close().await;
                bail!("Clear failed: {}", msg);
            }
            _ => {}
        }
    }
    session.close().await;
    println!("Archive cleared.");
    Ok(())
}
