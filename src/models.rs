//! Core data models used throughout Memora.
//!
//! These are the normalized records that flow from the normalizer into the
//! store and back out through thread listing, search, and export.

use serde::{Deserialize, Serialize};

/// One imported conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub title: String,
    /// ISO-8601, or empty when the source carried no usable time.
    pub created_at: String,
}

/// One normalized utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// `<thread_id>_<local index or node key>`.
    pub id: String,
    pub thread_id: String,
    pub role: String,
    pub text: String,
    pub timestamp: String,
}

/// A rating left on a message. Stored, never searched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub message_id: String,
    pub rating: String,
    pub comment: String,
    pub timestamp: String,
}

/// The exporting account's profile, kept as opaque JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub raw_json: String,
}

/// Thread row plus its message count, as listed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub count: i64,
}

/// Sort messages by timestamp. Empty timestamps sort first; ties keep
/// their incoming order.
pub fn sort_by_timestamp(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, ts: &str) -> Message {
        Message {
            id: id.to_string(),
            thread_id: "t".to_string(),
            role: "user".to_string(),
            text: "x".to_string(),
            timestamp: ts.to_string(),
        }
    }

    #[test]
    fn sort_puts_missing_timestamps_first_and_is_stable() {
        let mut msgs = vec![
            msg("a", "2024-02-01T00:00:00.000Z"),
            msg("b", ""),
            msg("c", "2024-01-01T00:00:00.000Z"),
            msg("d", ""),
        ];
        sort_by_timestamp(&mut msgs);
        let ids: Vec<&str> = msgs.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "c", "a"]);
    }
}
