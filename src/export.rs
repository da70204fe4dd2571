//! Render search hits as a merged document.
//!
//! Hits are regrouped by thread (threads in first-hit order, messages by
//! timestamp within each thread) for the `txt`, `md` and `html` renderings.
//! `json` and `jsonl` keep the hits in the order they were found.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::models::{sort_by_timestamp, Message};

const NO_THREAD: &str = "(no thread)";

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ExportFormat {
    /// Plain transcript with `=== THREAD ===` headers.
    Txt,
    /// Markdown grouped by thread.
    Md,
    /// One JSON array.
    Json,
    /// One JSON object per line.
    Jsonl,
    /// Printable HTML page with the Markdown grouping.
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Txt => "txt",
            ExportFormat::Md => "md",
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Html => "html",
        }
    }
}

/// Group hits by thread id, keeping threads in the order they first appear.
pub fn group_by_thread(hits: &[Message]) -> Vec<(String, Vec<Message>)> {
    let mut groups: Vec<(String, Vec<Message>)> = Vec::new();
    for hit in hits {
        let key = if hit.thread_id.is_empty() {
            NO_THREAD
        } else {
            hit.thread_id.as_str()
        };
        match groups.iter_mut().find(|(tid, _)| tid == key) {
            Some((_, messages)) => messages.push(hit.clone()),
            None => groups.push((key.to_string(), vec![hit.clone()])),
        }
    }
    for (_, messages) in &mut groups {
        sort_by_timestamp(messages);
    }
    groups
}

/// Render `hits` in `format`. `title` heads the Markdown rendering.
pub fn render(hits: &[Message], format: ExportFormat, title: &str) -> Result<String> {
    let out = match format {
        ExportFormat::Txt => {
            let mut lines = Vec::new();
            for (tid, messages) in group_by_thread(hits) {
                lines.push(format!("=== THREAD: {} ===", tid));
                for m in &messages {
                    lines.push(format!("[{}] {}: {}", m.timestamp, m.role, m.text));
                }
                lines.push(String::new());
            }
            lines.join("\n")
        }
        ExportFormat::Md => {
            let mut lines = vec![format!("# Merge: {}", title), String::new()];
            for (tid, messages) in group_by_thread(hits) {
                lines.push(format!("## Thread {}", tid));
                lines.push(String::new());
                for m in &messages {
                    lines.push(format!("- **{}** [{}]: {}", m.role, m.timestamp, m.text));
                }
                lines.push(String::new());
            }
            lines.join("\n")
        }
        ExportFormat::Json => serde_json::to_string(hits)?,
        ExportFormat::Jsonl => hits
            .iter()
            .map(serde_json::to_string)
            .collect::<serde_json::Result<Vec<_>>>()?
            .join("\n"),
        ExportFormat::Html => render_html(hits, title),
    };
    Ok(out)
}

const HTML_STYLE: &str = "body{font-family:system-ui,sans-serif;padding:20px;background:#fff;color:#111} \
h1,h2{margin:0 0 .5em} p{margin:.3em 0}";

fn render_html(hits: &[Message], title: &str) -> String {
    let title = escape_html(title);
    let mut body = vec![format!("<h1>Merge: {}</h1>", title), String::new()];
    for (tid, messages) in group_by_thread(hits) {
        body.push(format!("<h2>Thread {}</h2>", escape_html(&tid)));
        body.push(String::new());
        for m in &messages {
            body.push(format!(
                "<p><b>{}</b> <small>[{}]</small>: {}</p>",
                escape_html(&m.role),
                escape_html(&m.timestamp),
                escape_html(&m.text)
            ));
        }
        body.push(String::new());
    }
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{}</title>\n\
         <style>{}</style>\n</head><body>{}</body></html>",
        title,
        HTML_STYLE,
        body.join("\n")
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// File stem for a merged export: `merge_<query>` with runs of
/// non-alphanumerics collapsed to `_`.
pub fn file_stem(title: &str) -> String {
    let mut safe = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            safe.push(c);
        } else if !safe.ends_with('_') {
            safe.push('_');
        }
    }
    let safe = safe.trim_matches('_');
    if safe.is_empty() {
        "merge_merged".to_string()
    } else {
        format!("merge_{}", safe)
    }
}

/// Resolve `--output`. A directory (existing, or spelled with a trailing
/// separator) receives `<file_stem(title)>.<extension>`; any other path is
/// used as given.
pub fn output_path(output: Option<&Path>, title: &str, format: ExportFormat) -> Option<PathBuf> {
    let path = output?;
    let spelled = path.as_os_str().to_string_lossy();
    let names_dir = spelled.ends_with('/') || spelled.ends_with(std::path::MAIN_SEPARATOR);
    if names_dir || path.is_dir() {
        Some(path.join(format!("{}.{}", file_stem(title), format.extension())))
    } else {
        Some(path.to_path_buf())
    }
}

/// Write a rendering to `output`, or to stdout when `None`.
pub fn write_export(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, content)?;
            tracing::info!(path = %path.display(), bytes = content.len(), "export written");
        }
        None => println!("{}", content),
    }
    Ok(())
}
