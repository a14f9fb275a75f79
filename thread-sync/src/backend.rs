//! Contracts of the external collaborators the engine relies on.
//!
//! Implementations live outside this crate (the BaaS client, the upload
//! service). [`crate::realtime::LocalHub`] implements [`RealtimeFeed`] in
//! memory.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::models::{Attachment, Message};

/// Payload of a persist call
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    /// Remote attachments only; local files are uploaded first
    pub attachments: Vec<Attachment>,
}

/// Persistent message store
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Full history between two users, ascending by `created_at`
    async fn fetch_messages(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>, BackendError>;

    /// Insert a message; returns the row with its server id and canonical `created_at`
    async fn persist_message(&self, message: NewMessage) -> Result<Message, BackendError>;

    /// Mark everything `other_user_id` sent to `user_id` as read. Idempotent.
    async fn mark_incoming_as_read(&self, user_id: &str, other_user_id: &str) -> Result<(), BackendError>;
}

#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    /// Upload a local file on behalf of the optimistic message `owner_temp_id`
    async fn upload_attachment(&self, local_uri: &str, owner_temp_id: &str) -> Result<Attachment, BackendError>;
}

/// Public profile of a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn fetch_profile(&self, user_id: &str) -> Result<Profile, BackendError>;
}

/// Realtime publish/subscribe transport.
///
/// Payloads are raw JSON strings in the [`crate::models::FeedEvent`] format;
/// subscribers validate them. Dropping a receiver ends the subscription.
pub trait RealtimeFeed: Send + Sync {
    /// Row events for every message `user_id` sends or receives
    fn subscribe_rows(&self, user_id: &str) -> mpsc::UnboundedReceiver<String>;

    /// Payloads published on a typing channel
    fn subscribe_typing(&self, channel: &str) -> mpsc::UnboundedReceiver<String>;

    fn publish_typing(&self, channel: &str, payload: String) -> Result<(), BackendError>;
}
