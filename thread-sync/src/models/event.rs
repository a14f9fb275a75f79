//! Realtime wire payloads.
//!
//! Everything the realtime feed pushes arrives as a JSON string. Payloads are
//! decoded into [`FeedEvent`], validated with garde, and only then turned into
//! a [`RealtimeEvent`] the engine is allowed to see.

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use super::message::{Attachment, AttachmentKind, DeliveryState, Message};
use crate::error::SyncError;

/// Validation constants
const MAX_ID_LENGTH: usize = 128;
const MAX_CHANNEL_LENGTH: usize = 300;
pub(crate) const MAX_CONTENT_LENGTH: usize = 10000;
const MAX_URL_LENGTH: usize = 2048;

/// Attachment as stored by the backend
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[garde(context(()))]
pub struct AttachmentRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1, max = MAX_ID_LENGTH))]
    pub id: Option<String>,
    #[garde(length(min = 1, max = MAX_URL_LENGTH))]
    pub url: String,
    #[serde(rename = "type")]
    #[garde(skip)]
    pub kind: AttachmentKind,
    #[garde(skip)]
    pub created_at: DateTime<Utc>,
}

/// Message row as pushed by the realtime feed
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[garde(context(()))]
pub struct MessageRow {
    #[garde(length(min = 1, max = MAX_ID_LENGTH))]
    pub id: String,
    #[serde(default)]
    #[garde(length(max = MAX_CONTENT_LENGTH))]
    pub content: String,
    #[garde(length(min = 1, max = MAX_ID_LENGTH))]
    pub sender_id: String,
    #[garde(length(min = 1, max = MAX_ID_LENGTH))]
    pub recipient_id: String,
    #[garde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    #[garde(dive)]
    pub attachments: Vec<AttachmentRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub read_at: Option<DateTime<Utc>>,
}

/// Typing ping broadcast on a thread's typing channel
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[garde(context(()))]
pub struct TypingRow {
    #[garde(length(min = 1, max = MAX_CHANNEL_LENGTH))]
    pub channel: String,
    #[garde(length(min = 1, max = MAX_ID_LENGTH))]
    pub user_id: String,
}

/// Raw realtime payloads (shared between the feed and its subscribers)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeedEvent {
    #[serde(rename = "insert")]
    Insert(MessageRow),
    #[serde(rename = "update")]
    Update(MessageRow),
    #[serde(rename = "typing")]
    Typing(TypingRow),
}

/// A feed event that passed boundary validation
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// A new message row now exists
    Insert(Message),
    /// An existing row changed (read receipts, edits)
    Update(Message),
    Typing { channel: String, from_user_id: String },
}

impl From<AttachmentRow> for Attachment {
    fn from(row: AttachmentRow) -> Self {
        Attachment {
            id: row.id,
            url: row.url,
            kind: row.kind,
            created_at: row.created_at,
        }
    }
}

impl From<&Attachment> for AttachmentRow {
    fn from(attachment: &Attachment) -> Self {
        AttachmentRow {
            id: attachment.id.clone(),
            url: attachment.url.clone(),
            kind: attachment.kind,
            created_at: attachment.created_at,
        }
    }
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            temp_id: None,
            content: row.content,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            created_at: row.created_at,
            attachments: row.attachments.into_iter().map(Attachment::from).collect(),
            read_at: row.read_at,
            delivery: DeliveryState::Confirmed,
        }
    }
}

impl From<&Message> for MessageRow {
    fn from(msg: &Message) -> Self {
        MessageRow {
            id: msg.id.clone(),
            content: msg.content.clone(),
            sender_id: msg.sender_id.clone(),
            recipient_id: msg.recipient_id.clone(),
            created_at: msg.created_at,
            attachments: msg.attachments.iter().map(AttachmentRow::from).collect(),
            read_at: msg.read_at,
        }
    }
}

impl FeedEvent {
    /// Decode and validate a raw payload
    pub fn parse(text: &str) -> Result<RealtimeEvent, SyncError> {
        let event: FeedEvent =
            serde_json::from_str(text).map_err(|e| SyncError::InvalidEvent(e.to_string()))?;
        event.into_validated()
    }

    pub fn into_validated(self) -> Result<RealtimeEvent, SyncError> {
        match self {
            FeedEvent::Insert(row) => {
                row.validate()
                    .map_err(|e| SyncError::InvalidEvent(e.to_string()))?;
                Ok(RealtimeEvent::Insert(row.into()))
            }
            FeedEvent::Update(row) => {
                row.validate()
                    .map_err(|e| SyncError::InvalidEvent(e.to_string()))?;
                Ok(RealtimeEvent::Update(row.into()))
            }
            FeedEvent::Typing(row) => {
                row.validate()
                    .map_err(|e| SyncError::InvalidEvent(e.to_string()))?;
                Ok(RealtimeEvent::Typing {
                    channel: row.channel,
                    from_user_id: row.user_id,
                })
            }
        }
    }

    pub fn insert(msg: &Message) -> Self {
        FeedEvent::Insert(msg.into())
    }

    pub fn update(msg: &Message) -> Self {
        FeedEvent::Update(msg.into())
    }

    pub fn typing(channel: impl Into<String>, user_id: impl Into<String>) -> Self {
        FeedEvent::Typing(TypingRow {
            channel: channel.into(),
            user_id: user_id.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(|e| SyncError::InvalidEvent(e.to_string()))
    }
}
