//! Construction and state transitions of optimistic messages.
//!
//! Lists are `Vec<Arc<Message>>`: a transition clones the vector but only
//! allocates a new `Arc` for the entry it touches, so every other entry keeps
//! its pointer identity and memoized views can skip it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::{Attachment, DeliveryState, Message};
use crate::utils::new_temp_id;

/// Build a message to show before the backend has seen it.
///
/// Never fails, even for empty content with no attachments; callers validate.
pub fn create_optimistic(
    content: impl Into<String>,
    sender_id: impl Into<String>,
    recipient_id: impl Into<String>,
    attachments: Vec<Attachment>,
) -> Message {
    create_optimistic_at(content, sender_id, recipient_id, attachments, Utc::now())
}

pub fn create_optimistic_at(
    content: impl Into<String>,
    sender_id: impl Into<String>,
    recipient_id: impl Into<String>,
    attachments: Vec<Attachment>,
    created_at: DateTime<Utc>,
) -> Message {
    let temp_id = new_temp_id(created_at);
    Message {
        id: temp_id.clone(),
        temp_id: Some(temp_id),
        content: content.into(),
        sender_id: sender_id.into(),
        recipient_id: recipient_id.into(),
        created_at,
        attachments,
        read_at: None,
        delivery: DeliveryState::Sending,
    }
}

/// Index of the outstanding optimistic entry created with `temp_id`
pub fn find_optimistic(list: &[Arc<Message>], temp_id: &str) -> Option<usize> {
    list.iter()
        .position(|m| m.is_optimistic() && m.temp_id.as_deref() == Some(temp_id))
}

/// Replace the optimistic entry `temp_id` with the server's version of it.
///
/// Server fields win; local attachments and `read_at` survive only where the
/// server row has none. The temp id is kept for tracing. Returns `None` when
/// no outstanding entry matches, leaving the caller's list as it was.
pub fn promote(list: &[Arc<Message>], temp_id: &str, real: Message) -> Option<Vec<Arc<Message>>> {
    let index = find_optimistic(list, temp_id)?;
    let local = &list[index];

    let attachments = if real.attachments.is_empty() {
        local.attachments.clone()
    } else {
        real.attachments
    };
    let promoted = Message {
        id: real.id,
        temp_id: local.temp_id.clone(),
        content: real.content,
        sender_id: real.sender_id,
        recipient_id: real.recipient_id,
        created_at: real.created_at,
        attachments,
        read_at: real.read_at.or(local.read_at),
        delivery: DeliveryState::Confirmed,
    };

    Some(replace_at(list, index, promoted))
}

/// Mark the optimistic entry `temp_id` as failed. It stays optimistic until
/// the user retries or discards it.
pub fn fail(list: &[Arc<Message>], temp_id: &str, error: impl Into<String>) -> Option<Vec<Arc<Message>>> {
    let index = find_optimistic(list, temp_id)?;
    let mut failed = Message::clone(&list[index]);
    failed.delivery = DeliveryState::Failed {
        error: error.into(),
    };
    Some(replace_at(list, index, failed))
}

/// Drop the optimistic entry `temp_id`, returning the list and the removed entry
pub fn remove(list: &[Arc<Message>], temp_id: &str) -> Option<(Vec<Arc<Message>>, Arc<Message>)> {
    let index = find_optimistic(list, temp_id)?;
    let mut next = list.to_vec();
    let removed = next.remove(index);
    Some((next, removed))
}

pub fn is_optimistic(msg: &Message) -> bool {
    msg.is_optimistic()
}

pub fn is_sending(msg: &Message) -> bool {
    msg.is_sending()
}

pub fn is_failed(msg: &Message) -> bool {
    msg.is_failed()
}

fn replace_at(list: &[Arc<Message>], index: usize, msg: Message) -> Vec<Arc<Message>> {
    let mut next = list.to_vec();
    next[index] = Arc::new(msg);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttachmentKind;
    use chrono::TimeZone;

    fn confirmed(id: &str, content: &str) -> Arc<Message> {
        Arc::new(Message {
            id: id.to_string(),
            temp_id: None,
            content: content.to_string(),
            sender_id: "bob".to_string(),
            recipient_id: "alice".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            attachments: Vec::new(),
            read_at: None,
            delivery: DeliveryState::Confirmed,
        })
    }

    fn server_copy(local: &Message, id: &str) -> Message {
        Message {
            id: id.to_string(),
            temp_id: None,
            delivery: DeliveryState::Confirmed,
            created_at: local.created_at + chrono::Duration::milliseconds(400),
            ..local.clone()
        }
    }

    #[test]
    fn test_create_optimistic() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let msg = create_optimistic_at("hi", "alice", "bob", Vec::new(), at);

        assert_eq!(Some(msg.id.as_str()), msg.temp_id.as_deref());
        assert!(is_optimistic(&msg));
        assert!(is_sending(&msg));
        assert!(!is_failed(&msg));
        assert_eq!(msg.created_at, at);
    }

    #[test]
    fn test_factory_is_permissive() {
        let msg = create_optimistic("", "alice", "bob", Vec::new());
        assert!(msg.content.is_empty());
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn test_promote_preserves_other_entries() {
        let local = Arc::new(create_optimistic("hi", "alice", "bob", Vec::new()));
        let temp_id = local.temp_id.clone().unwrap();
        let list = vec![confirmed("a", "first"), local.clone(), confirmed("b", "last")];

        let next = promote(&list, &temp_id, server_copy(&local, "srv1")).unwrap();

        assert_eq!(next.len(), 3);
        assert!(Arc::ptr_eq(&list[0], &next[0]));
        assert!(Arc::ptr_eq(&list[2], &next[2]));
        assert_eq!(next[1].id, "srv1");
        assert_eq!(next[1].delivery, DeliveryState::Confirmed);
        assert_eq!(next[1].temp_id.as_deref(), Some(temp_id.as_str()));
    }

    #[test]
    fn test_promote_keeps_local_attachments_when_server_has_none() {
        let attachment = Attachment::new("file:///tmp/cat.jpg", AttachmentKind::Image);
        let local = Arc::new(create_optimistic("", "alice", "bob", vec![attachment]));
        let temp_id = local.temp_id.clone().unwrap();
        let mut real = server_copy(&local, "srv1");
        real.attachments.clear();

        let next = promote(&[local], &temp_id, real).unwrap();
        assert_eq!(next[0].attachments.len(), 1);
    }

    #[test]
    fn test_promote_unknown_temp_id_is_noop() {
        let list = vec![confirmed("a", "first")];
        let real = Message::clone(&list[0]);
        assert!(promote(&list, "tmp-1-missing", real).is_none());
    }

    #[test]
    fn test_promote_ignores_already_confirmed_entry() {
        let local = Arc::new(create_optimistic("hi", "alice", "bob", Vec::new()));
        let temp_id = local.temp_id.clone().unwrap();
        let once = promote(&[local.clone()], &temp_id, server_copy(&local, "srv1")).unwrap();

        assert!(promote(&once, &temp_id, server_copy(&local, "srv1")).is_none());
    }

    #[test]
    fn test_fail_keeps_message_optimistic() {
        let local = Arc::new(create_optimistic("hi", "alice", "bob", Vec::new()));
        let temp_id = local.temp_id.clone().unwrap();
        let other = confirmed("a", "first");
        let list = vec![other.clone(), local];

        let next = fail(&list, &temp_id, "network error").unwrap();

        assert!(Arc::ptr_eq(&other, &next[0]));
        assert!(is_optimistic(&next[1]));
        assert!(!is_sending(&next[1]));
        assert_eq!(next[1].send_error(), Some("network error"));
    }

    #[test]
    fn test_remove_returns_removed_entry() {
        let local = Arc::new(create_optimistic("hi", "alice", "bob", Vec::new()));
        let temp_id = local.temp_id.clone().unwrap();
        let list = vec![confirmed("a", "first"), local];

        let (next, removed) = remove(&list, &temp_id).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(removed.content, "hi");
        assert!(remove(&next, &temp_id).is_none());
    }
}
