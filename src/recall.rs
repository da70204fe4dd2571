//! `$RECALL` support: turn a recall search's hits into bounded plain-text
//! chunks and fold them into one digest through a [`Summarizer`].
//!
//! The summarizer itself is external. [`CommandSummarizer`] pipes each
//! prompt through a configured program; tests and embedders can supply
//! their own implementation.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

use crate::models::Message;

const RECALL_PREFIX: &str = "$RECALL";

/// Extract the keyword from a recall command. `$RECALL foo` and `foo` both
/// yield `foo`; blank input yields `None`.
pub fn parse_recall(command: &str) -> Option<String> {
    let command = command.trim();
    let keyword = command.strip_prefix(RECALL_PREFIX).unwrap_or(command).trim();
    if keyword.is_empty() {
        None
    } else {
        Some(keyword.to_string())
    }
}

/// One hit as a chunk line: `[thread_id] role: text`.
fn chunk_line(m: &Message) -> String {
    let role = if m.role.is_empty() { "role" } else { m.role.as_str() };
    format!("[{}] {}: {}\n", m.thread_id, role, m.text)
}

/// Pack hits into chunks of at most `max_chars` characters. A line longer
/// than the limit becomes a chunk of its own.
pub fn pack_chunks(hits: &[Message], max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;
    for m in hits {
        let line = chunk_line(m);
        let line_chars = line.chars().count();
        if !buf.is_empty() && buf_chars + line_chars > max_chars {
            chunks.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }
        buf.push_str(&line);
        buf_chars += line_chars;
    }
    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

/// External summarization capability.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize one chunk of excerpts about `topic`.
    async fn summarize_chunk(&self, topic: &str, chunk: &str) -> Result<String>;

    /// Merge partial summaries into the final digest.
    async fn synthesize(&self, topic: &str, partials: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Digest {
    pub topic: String,
    pub total_messages: usize,
    pub chunks: usize,
    pub partials: Vec<String>,
    pub markdown: String,
}

/// Summarize every chunk, then synthesize the partials. `on_chunk` is
/// called before each chunk with its 1-based index and the chunk count.
pub async fn summarize(
    summarizer: &dyn Summarizer,
    topic: &str,
    hits: &[Message],
    max_chars: usize,
    mut on_chunk: impl FnMut(usize, usize),
) -> Result<Digest> {
    if hits.is_empty() {
        bail!("No results to summarize for '{}'", topic);
    }
    let chunks = pack_chunks(hits, max_chars.max(1));

    let mut partials = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        on_chunk(i + 1, chunks.len());
        let partial = summarizer
            .summarize_chunk(topic, chunk)
            .await
            .with_context(|| format!("Summarizing chunk {}/{} failed", i + 1, chunks.len()))?;
        partials.push(partial);
    }

    let combined = partials
        .iter()
        .enumerate()
        .map(|(i, p)| format!("--- PART {} ---\n{}", i + 1, p))
        .collect::<Vec<_>>()
        .join("\n\n");
    let markdown = summarizer
        .synthesize(topic, &combined)
        .await
        .context("Synthesizing the final digest failed")?;

    Ok(Digest {
        topic: topic.to_string(),
        total_messages: hits.len(),
        chunks: chunks.len(),
        partials,
        markdown,
    })
}

/// Runs an external program once per prompt: the prompt goes to stdin and
/// the program's stdout is the answer.
pub struct CommandSummarizer {
    program: String,
    args: Vec<String>,
}

impl CommandSummarizer {
    /// `argv[0]` is the program. Fails on an empty command.
    pub fn new(argv: &[String]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("recall.command is empty; set it to the summarizer program and its arguments");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    async fn run(&self, prompt: String) -> Result<String> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute '{}'", self.program))?;

        // stdin is written while stdout drains; a child that answers as it
        // reads would otherwise fill its pipe and stall.
        let stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(prompt.as_bytes()).await,
                None => Ok(()),
            }
        });
        let (written, output) = tokio::join!(writer, child.wait_with_output());
        let output = output?;
        written.context("stdin writer task failed")?.or_else(|e| {
            // A program that exits without reading all of its input is judged by its status.
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                Ok(())
            } else {
                Err(e)
            }
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} failed: {}", self.program, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Summarizer for CommandSummarizer {
    async fn summarize_chunk(&self, topic: &str, chunk: &str) -> Result<String> {
        self.run(format!(
            "Summarize the following chat excerpts about \"{}\" as concise bullet points. \
             Reference thread ids when helpful.\n\n{}",
            topic, chunk
        ))
        .await
    }

    async fn synthesize(&self, topic: &str, partials: &str) -> Result<String> {
        self.run(format!(
            "Combine and deduplicate these partial summaries into one Markdown digest for \"{}\".\n\n{}",
            topic, partials
        ))
        .await
    }
}
