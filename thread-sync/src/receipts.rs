//! Read-receipt views over a thread's message list.

use std::sync::Arc;

use crate::models::Message;

/// Messages from the peer that `self_id` has not read yet
pub fn unread_incoming<'a>(messages: &'a [Arc<Message>], self_id: &str) -> Vec<&'a Arc<Message>> {
    messages
        .iter()
        .filter(|m| m.recipient_id == self_id && m.sender_id != self_id && m.read_at.is_none())
        .collect()
}

pub fn unread_count(messages: &[Arc<Message>], self_id: &str) -> usize {
    unread_incoming(messages, self_id).len()
}

/// Newest confirmed message from `self_id` that the peer has read.
/// The "Seen" marker is drawn under it.
pub fn last_read_outgoing<'a>(messages: &'a [Arc<Message>], self_id: &str) -> Option<&'a Arc<Message>> {
    messages
        .iter()
        .filter(|m| m.sender_id == self_id && !m.is_optimistic() && m.read_at.is_some())
        .max_by(|a, b| crate::grouping::compare_chronologically(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeliveryState;
    use chrono::{Duration, TimeZone, Utc};

    fn msg(id: &str, from: &str, to: &str, minute: i64, read: bool) -> Arc<Message> {
        let created_at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minute);
        Arc::new(Message {
            id: id.to_string(),
            temp_id: None,
            content: String::new(),
            sender_id: from.to_string(),
            recipient_id: to.to_string(),
            created_at,
            attachments: Vec::new(),
            read_at: read.then(|| created_at + Duration::minutes(1)),
            delivery: DeliveryState::Confirmed,
        })
    }

    #[test]
    fn test_unread_incoming() {
        let messages = vec![
            msg("1", "bob", "alice", 0, true),
            msg("2", "bob", "alice", 1, false),
            msg("3", "alice", "bob", 2, false),
            msg("4", "bob", "alice", 3, false),
        ];

        let unread: Vec<&str> = unread_incoming(&messages, "alice")
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(unread, vec!["2", "4"]);
        assert_eq!(unread_count(&messages, "bob"), 1);
    }

    #[test]
    fn test_last_read_outgoing() {
        let messages = vec![
            msg("1", "alice", "bob", 0, true),
            msg("2", "alice", "bob", 5, true),
            msg("3", "bob", "alice", 6, true),
            msg("4", "alice", "bob", 7, false),
        ];

        assert_eq!(last_read_outgoing(&messages, "alice").unwrap().id, "2");
        assert_eq!(last_read_outgoing(&messages, "bob").unwrap().id, "3");
        assert!(last_read_outgoing(&messages[3..], "alice").is_none());
    }
}
