//! Archive format detection and normalization.
//!
//! Turns one uploaded file into uniform records. Detection runs once per
//! file and yields an [`ArchiveFormat`]; conversation-bearing formats are
//! then walked lazily, one [`ParsedConversation`] at a time.
//!
//! Message text is capped, and messages whose text is empty after trimming
//! never leave this module.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::IngestError;
use crate::models::{Feedback, Message, Thread, UserProfile};

/// Keys under which exports nest their conversation list.
const NESTED_CONVERSATION_KEYS: &[&str] = &[
    "conversations",
    "items",
    "threads",
    "data",
    "conversation_data",
    "archived_conversations",
    "shared_conversations",
];

const DERIVED_TITLE_CHARS: usize = 80;

/// Separator used when flattening array-of-parts content.
pub const PART_SEPARATOR: &str = "\n";

/// What a file turned out to contain.
#[derive(Debug)]
pub enum ArchiveFormat {
    Conversations(Vec<Value>),
    HtmlTranscript,
    Feedback(Vec<Value>),
    UserProfile(Value),
    Unrecognized(String),
}

/// How a single conversation stores its messages.
#[derive(Debug)]
pub enum ConversationShape<'a> {
    /// Node id → `{message, parent, children}`.
    MappingGraph(&'a Map<String, Value>),
    MessageList(&'a [Value]),
    Empty,
}

impl<'a> ConversationShape<'a> {
    pub fn of(conv: &'a Map<String, Value>) -> Self {
        if let Some(mapping) = conv.get("mapping").and_then(Value::as_object) {
            return ConversationShape::MappingGraph(mapping);
        }
        if let Some(list) = conv.get("messages").and_then(Value::as_array) {
            return ConversationShape::MessageList(list);
        }
        ConversationShape::Empty
    }
}

/// One thread and its normalized messages.
#[derive(Debug, Clone)]
pub struct ParsedConversation {
    pub thread: Thread,
    pub messages: Vec<Message>,
}

/// Result of normalizing one file.
pub enum ParsedFile {
    Conversations(Conversations),
    Feedback(Vec<Feedback>),
    User(UserProfile),
    /// Nothing to store; the note is surfaced as a status message.
    Skipped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameKind {
    Feedback,
    User,
    Html,
    Json,
    Other,
}

fn classify_name(name: &str) -> NameKind {
    let lower = name.to_lowercase();
    let base = lower.rsplit(['/', '\\']).next().unwrap_or(lower.as_str());

    if base.ends_with(".html") || base.ends_with(".htm") {
        NameKind::Html
    } else if base == "user.json" {
        NameKind::User
    } else if base.ends_with(".json") && base.contains("feedback") {
        NameKind::Feedback
    } else if base.ends_with(".json") || base.ends_with(".jsonl") || base.ends_with(".ndjson") {
        NameKind::Json
    } else {
        NameKind::Other
    }
}

/// Parse a whole JSON document, falling back to one value per line.
fn parse_json_document(text: &str) -> Result<Value, serde_json::Error> {
    let text = text.trim_start_matches('\u{feff}');
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Ok(value),
        Err(err) => parse_json_lines(text).ok_or(err),
    }
}

fn parse_json_lines(text: &str) -> Option<Value> {
    let mut items = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        items.push(serde_json::from_str::<Value>(line).ok()?);
    }
    if items.is_empty() {
        None
    } else {
        Some(Value::Array(items))
    }
}

fn nested_conversations(obj: &mut Map<String, Value>) -> Option<Vec<Value>> {
    for key in NESTED_CONVERSATION_KEYS {
        if matches!(obj.get(*key), Some(Value::Array(_))) {
            if let Some(Value::Array(items)) = obj.remove(*key) {
                return Some(items);
            }
        }
    }
    None
}

fn feedback_items(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut obj) => match obj.remove("message_feedback") {
            Some(Value::Array(items)) => Some(items),
            _ => match obj.remove("feedback") {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            },
        },
        _ => None,
    }
}

/// Decide what `name`/`text` contains. Malformed JSON in a file we would
/// otherwise accept is an error; anything we do not understand is
/// [`ArchiveFormat::Unrecognized`].
pub fn detect(name: &str, text: &str) -> Result<ArchiveFormat, serde_json::Error> {
    let kind = classify_name(name);
    let value = match kind {
        NameKind::Html => return Ok(ArchiveFormat::HtmlTranscript),
        NameKind::Other => {
            return Ok(ArchiveFormat::Unrecognized(format!(
                "Unsupported file type: {}",
                name
            )))
        }
        NameKind::Feedback | NameKind::User | NameKind::Json => parse_json_document(text)?,
    };

    let unrecognized = || {
        ArchiveFormat::Unrecognized(format!(
            "Unrecognized JSON structure in {}; skipping.",
            name
        ))
    };

    Ok(match (kind, value) {
        (NameKind::Feedback, value) => match feedback_items(value) {
            Some(items) => ArchiveFormat::Feedback(items),
            None => unrecognized(),
        },
        (NameKind::User, value @ Value::Object(_)) => ArchiveFormat::UserProfile(value),
        (NameKind::User, _) => unrecognized(),
        (_, Value::Array(items)) => ArchiveFormat::Conversations(items),
        (_, Value::Object(mut obj)) => {
            if let Some(items) = nested_conversations(&mut obj) {
                ArchiveFormat::Conversations(items)
            } else if matches!(obj.get("message_feedback"), Some(Value::Array(_))) {
                match feedback_items(Value::Object(obj)) {
                    Some(items) => ArchiveFormat::Feedback(items),
                    None => unrecognized(),
                }
            } else if obj.contains_key("mapping") || obj.contains_key("messages") {
                ArchiveFormat::Conversations(vec![Value::Object(obj)])
            } else {
                unrecognized()
            }
        }
        _ => unrecognized(),
    })
}

/// Converts raw files into records.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    max_text_chars: usize,
}

impl Normalizer {
    pub fn new(max_text_chars: usize) -> Self {
        Self { max_text_chars }
    }

    pub fn parse(&self, name: &str, text: &str) -> Result<ParsedFile, IngestError> {
        let format = detect(name, text).map_err(|source| IngestError::Parse {
            file: name.to_string(),
            source,
        })?;
        tracing::debug!(file = name, format = format_label(&format), "detected format");

        Ok(match format {
            ArchiveFormat::Conversations(items) => ParsedFile::Conversations(Conversations {
                source: Source::Json(items.into_iter()),
                max_text_chars: self.max_text_chars,
            }),
            ArchiveFormat::HtmlTranscript => {
                let conv = parse_html_transcript(name, text, self.max_text_chars);
                if conv.messages.is_empty() {
                    ParsedFile::Skipped(format!(
                        "Parsed 0 messages from {} (HTML parsing is best-effort).",
                        name
                    ))
                } else {
                    ParsedFile::Conversations(Conversations {
                        source: Source::Ready(Some(conv).into_iter()),
                        max_text_chars: self.max_text_chars,
                    })
                }
            }
            ArchiveFormat::Feedback(items) => ParsedFile::Feedback(parse_feedback(items)),
            ArchiveFormat::UserProfile(value) => ParsedFile::User(parse_user(&value)),
            ArchiveFormat::Unrecognized(note) => ParsedFile::Skipped(note),
        })
    }
}

fn format_label(format: &ArchiveFormat) -> &'static str {
    match format {
        ArchiveFormat::Conversations(_) => "conversations",
        ArchiveFormat::HtmlTranscript => "html",
        ArchiveFormat::Feedback(_) => "feedback",
        ArchiveFormat::UserProfile(_) => "user",
        ArchiveFormat::Unrecognized(_) => "unrecognized",
    }
}

enum Source {
    Json(std::vec::IntoIter<Value>),
    Ready(std::option::IntoIter<ParsedConversation>),
}

/// Lazily normalizes conversations one at a time.
pub struct Conversations {
    source: Source,
    max_text_chars: usize,
}

impl Iterator for Conversations {
    type Item = ParsedConversation;

    fn next(&mut self) -> Option<ParsedConversation> {
        match &mut self.source {
            Source::Ready(iter) => iter.next(),
            Source::Json(iter) => {
                for value in iter.by_ref() {
                    if let Value::Object(conv) = value {
                        return Some(parse_conversation(&conv, self.max_text_chars));
                    }
                }
                None
            }
        }
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn thread_id_for(conv: &Map<String, Value>) -> String {
    if let Some(id) = str_field(conv, "id").or_else(|| str_field(conv, "conversation_id")) {
        return id.to_string();
    }
    if let Some(title) = str_field(conv, "title") {
        return format!("title:{}", title);
    }
    let serialized = serde_json::to_string(conv).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    format!("conv-{}", hex::encode(&digest[..6]))
}

fn parse_conversation(conv: &Map<String, Value>, max_text_chars: usize) -> ParsedConversation {
    let thread_id = thread_id_for(conv);
    let conv_time = first_timestamp(&[conv.get("create_time"), conv.get("update_time")]);

    let mut messages = Vec::new();
    match ConversationShape::of(conv) {
        ConversationShape::MappingGraph(mapping) => {
            for (key, node) in mapping {
                let Some(m) = node.get("message").filter(|m| m.is_object()) else {
                    continue;
                };
                messages.extend(normalize_message(
                    &thread_id,
                    key,
                    m,
                    &conv_time,
                    max_text_chars,
                ));
            }
        }
        ConversationShape::MessageList(list) => {
            for (i, m) in list.iter().enumerate() {
                messages.extend(normalize_message(
                    &thread_id,
                    &i.to_string(),
                    m,
                    &conv_time,
                    max_text_chars,
                ));
            }
        }
        ConversationShape::Empty => {}
    }

    let title = str_field(conv, "title")
        .map(str::to_string)
        .unwrap_or_else(|| title_from_messages(&messages));

    ParsedConversation {
        thread: Thread {
            id: thread_id,
            title,
            created_at: conv_time,
        },
        messages,
    }
}

fn normalize_message(
    thread_id: &str,
    local_key: &str,
    m: &Value,
    fallback_time: &str,
    max_text_chars: usize,
) -> Option<Message> {
    let mut text = text_of(m);
    cap_chars(&mut text, max_text_chars);
    if text.trim().is_empty() {
        return None;
    }

    let mut timestamp = first_timestamp(&[
        m.get("create_time"),
        m.get("timestamp"),
        m.get("update_time"),
    ]);
    if timestamp.is_empty() {
        timestamp = fallback_time.to_string();
    }

    Some(Message {
        id: format!("{}_{}", thread_id, local_key),
        thread_id: thread_id.to_string(),
        role: role_of(m),
        text,
        timestamp,
    })
}

/// `author.role`, then `role`, then a string `author`, else `unknown`.
pub fn role_of(m: &Value) -> String {
    m.pointer("/author/role")
        .and_then(Value::as_str)
        .or_else(|| m.get("role").and_then(Value::as_str))
        .or_else(|| m.get("author").and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Flatten a message's content into plain text.
pub fn text_of(m: &Value) -> String {
    let from_content = match m.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => join_parts(parts),
        Some(Value::Object(c)) => match c.get("parts") {
            Some(Value::Array(parts)) => join_parts(parts),
            _ => c
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        _ => String::new(),
    };
    if !from_content.trim().is_empty() {
        return from_content;
    }
    m.get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn join_parts(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            Value::String(s) => Some(s.as_str()),
            Value::Object(o) => o.get("text").and_then(Value::as_str),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(PART_SEPARATOR)
}

fn cap_chars(text: &mut String, max_chars: usize) {
    if let Some((byte_index, _)) = text.char_indices().nth(max_chars) {
        text.truncate(byte_index);
    }
}

fn title_from_messages(messages: &[Message]) -> String {
    let pick = messages
        .iter()
        .find(|m| m.role.eq_ignore_ascii_case("user"))
        .or_else(|| messages.first());
    match pick {
        Some(m) => m.text.trim().chars().take(DERIVED_TITLE_CHARS).collect(),
        None => "(untitled)".to_string(),
    }
}

fn first_timestamp(candidates: &[Option<&Value>]) -> String {
    candidates
        .iter()
        .flatten()
        .map(|v| normalize_timestamp(v))
        .find(|ts| !ts.is_empty())
        .unwrap_or_default()
}

fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_epoch(value: f64) -> String {
    if !value.is_finite() || value == 0.0 {
        return String::new();
    }
    let millis = if value.abs() <= 1e12 {
        value * 1000.0
    } else {
        value
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
        .map(iso)
        .unwrap_or_default()
}

/// Normalize an epoch number or date string to ISO-8601 UTC. Anything
/// unparseable becomes an empty string.
pub fn normalize_timestamp(value: &Value) -> String {
    match value {
        Value::Number(n) => n.as_f64().map(from_epoch).unwrap_or_default(),
        Value::String(s) => normalize_timestamp_str(s),
        _ => String::new(),
    }
}

fn normalize_timestamp_str(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() {
        return String::new();
    }
    if let Ok(n) = s.parse::<f64>() {
        return from_epoch(n);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return iso(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return iso(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return iso(naive.and_utc());
        }
    }
    String::new()
}

// ============ HTML transcript ============

fn parse_html_transcript(name: &str, html: &str, max_text_chars: usize) -> ParsedConversation {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).to_lowercase();
    let thread_id = format!("html:{}", base);

    let messages: Vec<Message> = content_blocks(html)
        .into_iter()
        .enumerate()
        .filter_map(|(i, mut text)| {
            cap_chars(&mut text, max_text_chars);
            if text.trim().is_empty() {
                return None;
            }
            Some(Message {
                id: format!("{}_{}", thread_id, i),
                thread_id: thread_id.clone(),
                role: "unknown".to_string(),
                text,
                timestamp: String::new(),
            })
        })
        .collect();

    let title = title_from_messages(&messages);
    ParsedConversation {
        thread: Thread {
            id: thread_id,
            title,
            created_at: String::new(),
        },
        messages,
    }
}

/// Inner text of every element whose class list contains `content`.
fn content_blocks(html: &str) -> Vec<String> {
    // ASCII lowercasing keeps byte offsets aligned with `html`.
    let lower = html.to_ascii_lowercase();
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find("class=") {
        let attr = cursor + found;
        cursor = attr + "class=".len();

        let Some(quote) = lower[cursor..].chars().next() else {
            break;
        };
        if quote != '"' && quote != '\'' {
            continue;
        }
        let value_start = cursor + 1;
        let Some(value_len) = lower[value_start..].find(quote) else {
            break;
        };
        let classes = &lower[value_start..value_start + value_len];
        if !classes
            .split_whitespace()
            .any(|c| c == "content" || c.ends_with("-content"))
        {
            continue;
        }

        let Some(tag_open) = lower[..attr].rfind('<') else {
            continue;
        };
        let tag_name: String = lower[tag_open + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        let Some(gt) = lower[value_start + value_len..].find('>') else {
            break;
        };
        let inner_start = value_start + value_len + gt + 1;
        let inner_end = closing_tag(&lower, inner_start, &tag_name).unwrap_or(lower.len());

        blocks.push(strip_html(&html[inner_start..inner_end]));
        cursor = inner_end.max(cursor);
    }

    blocks
}

/// Byte offset of the `</tag` matching an element whose body starts at
/// `from`, honoring nesting of the same tag.
fn closing_tag(lower: &str, from: usize, tag: &str) -> Option<usize> {
    if tag.is_empty() {
        return lower[from..].find('<').map(|i| from + i);
    }
    let open = format!("<{}", tag);
    let close = format!("</{}", tag);
    let mut depth = 0usize;
    let mut pos = from;
    loop {
        let next_close = lower[pos..].find(&close)? + pos;
        let next_open = lower[pos..]
            .find(&open)
            .map(|i| i + pos)
            .filter(|&i| i < next_close && is_tag_boundary(lower, i + open.len()));
        match next_open {
            Some(i) => {
                depth += 1;
                pos = i + open.len();
            }
            None if depth == 0 => return Some(next_close),
            None => {
                depth -= 1;
                pos = next_close + close.len();
            }
        }
    }
}

fn is_tag_boundary(s: &str, at: usize) -> bool {
    matches!(
        s.as_bytes().get(at),
        Some(b'>' | b' ' | b'\t' | b'\n' | b'\r' | b'/')
    )
}

fn strip_html(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut chars = fragment.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }
        let end = fragment[i..].find('>').map(|e| i + e);
        let Some(end) = end else {
            out.push(c);
            continue;
        };
        let tag = fragment[i + 1..end].trim().to_ascii_lowercase();
        let name = tag.trim_start_matches('/');
        if name.starts_with("br") || (tag.starts_with('/') && (name == "p" || name == "div")) {
            out.push('\n');
        }
        while let Some(&(j, _)) = chars.peek() {
            if j > end {
                break;
            }
            chars.next();
        }
    }

    decode_entities(&out)
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

// ============ Feedback & user ============

fn value_to_text(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn parse_feedback(items: Vec<Value>) -> Vec<Feedback> {
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let obj = item.as_object()?;
            let message_id = str_field(obj, "message_id").unwrap_or_default().to_string();
            let id = match (str_field(obj, "id"), str_field(obj, "conversation_id")) {
                (Some(id), _) => id.to_string(),
                (None, Some(conv)) if !message_id.is_empty() => format!("{}_{}", conv, message_id),
                _ => format!("feedback-{}", i),
            };
            let comment = ["content", "comment", "text"]
                .iter()
                .map(|k| value_to_text(obj.get(*k)))
                .find(|s| !s.is_empty())
                .unwrap_or_default();
            Some(Feedback {
                id,
                message_id,
                rating: value_to_text(obj.get("rating")),
                comment,
                timestamp: first_timestamp(&[obj.get("create_time"), obj.get("timestamp")]),
            })
        })
        .collect()
}

fn parse_user(value: &Value) -> UserProfile {
    let id = value
        .as_object()
        .and_then(|o| str_field(o, "id"))
        .unwrap_or("user")
        .to_string();
    UserProfile {
        id,
        raw_json: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversations(file: ParsedFile) -> Vec<ParsedConversation> {
        match file {
            ParsedFile::Conversations(iter) => iter.collect(),
            ParsedFile::Skipped(note) => panic!("skipped: {note}"),
            _ => panic!("expected conversations"),
        }
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(20_000)
    }

    #[test]
    fn mapping_graph_emits_only_nodes_with_messages_in_key_order() {
        let doc = json!([{
            "id": "c1",
            "title": "Budget",
            "create_time": 1_700_000_000,
            "mapping": {
                "root": {"message": null, "parent": null, "children": ["n2"]},
                "n2": {"message": {"author": {"role": "user"},
                                   "content": {"parts": ["Where is the", "ledger?"]},
                                   "create_time": 1_700_000_100.5},
                       "parent": "root", "children": ["n1"]},
                "n1": {"message": {"author": {"role": "assistant"},
                                   "content": {"content_type": "text", "parts": ["In the drawer."]}},
                       "parent": "n2", "children": []}
            }
        }]);
        let convs = conversations(
            normalizer()
                .parse("conversations.json", &doc.to_string())
                .unwrap(),
        );
        assert_eq!(convs.len(), 1);
        let conv = &convs[0];
        assert_eq!(conv.thread.id, "c1");
        assert_eq!(conv.thread.title, "Budget");
        assert_eq!(conv.thread.created_at, "2023-11-14T22:13:20.000Z");

        let ids: Vec<&str> = conv.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c1_n2", "c1_n1"]);
        assert_eq!(conv.messages[0].text, "Where is the\nledger?");
        assert_eq!(conv.messages[0].role, "user");
        assert_eq!(conv.messages[0].timestamp, "2023-11-14T22:15:00.500Z");
        // Falls back to the conversation's create_time.
        assert_eq!(conv.messages[1].timestamp, "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn flat_message_lists_and_nested_keys() {
        let doc = json!({"threads": [{
            "conversation_id": "flat",
            "messages": [
                {"role": "user", "content": "hello there", "timestamp": "2024-03-01 10:00:00"},
                {"author": "assistant", "text": "hi"},
                {"role": "user", "content": "   "}
            ]
        }]});
        let convs = conversations(normalizer().parse("export.json", &doc.to_string()).unwrap());
        let conv = &convs[0];
        assert_eq!(conv.thread.id, "flat");
        assert_eq!(conv.thread.title, "hello there");
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].id, "flat_0");
        assert_eq!(conv.messages[0].timestamp, "2024-03-01T10:00:00.000Z");
        assert_eq!(conv.messages[1].role, "assistant");
        assert_eq!(conv.messages[1].text, "hi");
        assert_eq!(conv.messages[1].timestamp, "");
    }

    #[test]
    fn every_message_has_non_empty_trimmed_text() {
        let doc = json!([{
            "id": "c",
            "messages": [
                {"role": "user", "content": ""},
                {"role": "user", "content": {"parts": ["", "  "]}},
                {"role": "user", "content": {"parts": [{"asset": "img"}]}},
                {"role": "user", "content": "\n\t"},
                {"role": "user", "content": "kept"}
            ]
        }]);
        let convs = conversations(normalizer().parse("conversations.json", &doc.to_string()).unwrap());
        assert_eq!(convs[0].messages.len(), 1);
        assert!(convs[0].messages.iter().all(|m| !m.text.trim().is_empty()));
    }

    #[test]
    fn thread_ids_fall_back_to_title_then_content_hash() {
        let doc = json!([
            {"title": "Named", "messages": [{"role": "user", "content": "a"}]},
            {"messages": [{"role": "user", "content": "b"}]}
        ]);
        let text = doc.to_string();
        let first = conversations(normalizer().parse("conversations.json", &text).unwrap());
        let second = conversations(normalizer().parse("conversations.json", &text).unwrap());
        assert_eq!(first[0].thread.id, "title:Named");
        assert!(first[1].thread.id.starts_with("conv-"));
        assert_eq!(first[1].thread.id.len(), "conv-".len() + 12);
        assert_eq!(first[1].thread.id, second[1].thread.id);
    }

    #[test]
    fn untitled_conversation_without_messages() {
        let doc = json!([{"id": "empty", "mapping": {}}]);
        let convs = conversations(normalizer().parse("conversations.json", &doc.to_string()).unwrap());
        assert_eq!(convs[0].thread.title, "(untitled)");
        assert!(convs[0].messages.is_empty());
    }

    #[test]
    fn text_is_capped_by_characters() {
        let doc = json!([{"id": "c", "messages": [{"role": "user", "content": "é".repeat(50)}]}]);
        let convs = conversations(Normalizer::new(10).parse("conversations.json", &doc.to_string()).unwrap());
        assert_eq!(convs[0].messages[0].text.chars().count(), 10);
    }

    #[test]
    fn json_lines_fallback() {
        let text = format!(
            "{}\n\n{}\n",
            json!({"id": "a", "messages": [{"role": "user", "content": "one"}]}),
            json!({"id": "b", "messages": [{"role": "user", "content": "two"}]})
        );
        let convs = conversations(normalizer().parse("conversations.jsonl", &text).unwrap());
        let ids: Vec<&str> = convs.iter().map(|c| c.thread.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn malformed_json_is_a_parse_error_for_that_file() {
        let err = normalizer()
            .parse("conversations.json", "[{\"id\": ")
            .err()
            .expect("parse error");
        assert!(err.to_string().starts_with("Failed to parse conversations.json"));
    }

    #[test]
    fn unknown_names_and_shapes_are_skipped() {
        match normalizer().parse("notes.txt", "whatever").unwrap() {
            ParsedFile::Skipped(note) => assert_eq!(note, "Unsupported file type: notes.txt"),
            _ => panic!("expected skip"),
        }
        match normalizer().parse("other.json", "{\"hello\": 1}").unwrap() {
            ParsedFile::Skipped(note) => assert!(note.contains("Unrecognized JSON structure")),
            _ => panic!("expected skip"),
        }
    }

    #[test]
    fn filenames_match_case_insensitively() {
        assert_eq!(classify_name("Conversations.JSON"), NameKind::Json);
        assert_eq!(classify_name("export/Chat.HTML"), NameKind::Html);
        assert_eq!(classify_name("USER.json"), NameKind::User);
        assert_eq!(classify_name("Message_Feedback.json"), NameKind::Feedback);
    }

    #[test]
    fn timestamps_normalize_or_become_empty() {
        assert_eq!(normalize_timestamp(&json!(1_700_000_000)), "2023-11-14T22:13:20.000Z");
        assert_eq!(
            normalize_timestamp(&json!(1_700_000_000_123i64)),
            "2023-11-14T22:13:20.123Z"
        );
        assert_eq!(normalize_timestamp(&json!("1700000000")), "2023-11-14T22:13:20.000Z");
        assert_eq!(
            normalize_timestamp(&json!("2024-05-06T07:08:09+02:00")),
            "2024-05-06T05:08:09.000Z"
        );
        assert_eq!(normalize_timestamp(&json!("2024-05-06")), "2024-05-06T00:00:00.000Z");
        assert_eq!(normalize_timestamp(&json!("yesterday")), "");
        assert_eq!(normalize_timestamp(&json!(null)), "");
        assert_eq!(normalize_timestamp(&json!({"t": 1})), "");
        assert_eq!(normalize_timestamp(&json!(1e300)), "");
    }

    #[test]
    fn html_content_blocks_become_messages() {
        let html = r#"<html><body>
            <div class="message user"><div class="content">Hello <b>there</b><br>second&nbsp;line</div></div>
            <div class="message assistant"><div class='content'><p>Nested <div>inner</div> &amp; done</p></div></div>
            <span class="meta">ignored</span>
        </body></html>"#;
        let convs = conversations(normalizer().parse("chat.html", html).unwrap());
        let conv = &convs[0];
        assert_eq!(conv.thread.id, "html:chat.html");
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].text, "Hello there\nsecond line");
        assert!(conv.messages[1].text.contains("Nested"));
        assert!(conv.messages[1].text.contains("inner"));
        assert!(conv.messages[1].text.contains("& done"));
    }

    #[test]
    fn html_without_blocks_is_skipped_with_note() {
        match normalizer().parse("chat.html", "<html><p>nothing here</p></html>").unwrap() {
            ParsedFile::Skipped(note) => {
                assert!(note.contains("Parsed 0 messages from chat.html"))
            }
            _ => panic!("expected skip"),
        }
    }

    #[test]
    fn feedback_and_user_records() {
        let feedback = json!([
            {"id": "f1", "conversation_id": "c", "message_id": "m1", "rating": "thumbsUp",
             "content": "{\"tags\":[]}", "create_time": "2024-01-01T00:00:00Z"},
            {"conversation_id": "c", "message_id": "m2", "rating": 1},
            {"rating": "thumbsDown"}
        ]);
        match normalizer().parse("message_feedback.json", &feedback.to_string()).unwrap() {
            ParsedFile::Feedback(records) => {
                assert_eq!(records.len(), 3);
                assert_eq!(records[0].id, "f1");
                assert_eq!(records[0].timestamp, "2024-01-01T00:00:00.000Z");
                assert_eq!(records[1].id, "c_m2");
                assert_eq!(records[1].rating, "1");
                assert_eq!(records[2].id, "feedback-2");
            }
            _ => panic!("expected feedback"),
        }

        match normalizer()
            .parse("user.json", r#"{"id": "user-42", "email": "a@b.c"}"#)
            .unwrap()
        {
            ParsedFile::User(user) => {
                assert_eq!(user.id, "user-42");
                assert!(user.raw_json.contains("a@b.c"));
            }
            _ => panic!("expected user"),
        }
    }
}
