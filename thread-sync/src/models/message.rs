use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of media carried by an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Server id, absent until the attachment row is persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(url: impl Into<String>, kind: AttachmentKind) -> Self {
        Self {
            id: None,
            url: url.into(),
            kind,
            created_at: Utc::now(),
        }
    }
}

/// Client-side lifecycle of a message.
///
/// `Sending` and `Failed` are the two optimistic states; a message can never
/// be sending and failed at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    Sending,
    Failed { error: String },
    #[default]
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Set on client-originated messages; kept after confirmation for tracing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default)]
    pub content: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery: DeliveryState,
}

impl Message {
    pub fn is_optimistic(&self) -> bool {
        matches!(
            self.delivery,
            DeliveryState::Sending | DeliveryState::Failed { .. }
        )
    }

    pub fn is_sending(&self) -> bool {
        matches!(self.delivery, DeliveryState::Sending)
    }

    pub fn send_error(&self) -> Option<&str> {
        match &self.delivery {
            DeliveryState::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.send_error().is_some()
    }

    /// True if the message was sent by `user_id`
    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }

    /// True if the message travels between `a` and `b`, in either direction
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }
}
