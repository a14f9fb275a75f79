//! Input DTOs with garde validation for the session API.
//!
//! These structs validate presentation-layer data before it reaches the engine.

use garde::Validate;
use serde::Deserialize;

use super::event::MAX_CONTENT_LENGTH;
use crate::error::SyncError;
use crate::utils::KEY_SEPARATOR;

/// Validation constants
const MAX_USER_ID_LENGTH: usize = 128;
const MAX_ATTACHMENTS_PER_MESSAGE: usize = 10;
const MAX_ATTACHMENT_URI_LENGTH: usize = 2048;

/// Custom validation for user ids: no whitespace, control characters or
/// `:`, which separates the ids in thread and typing channel keys
fn validate_user_id(value: &str, _ctx: &()) -> garde::Result {
    if value
        .chars()
        .any(|c| c.is_control() || c.is_whitespace() || c == KEY_SEPARATOR)
    {
        return Err(garde::Error::new("User id contains invalid characters"));
    }
    Ok(())
}

/// Input for opening a thread session
#[derive(Debug, Deserialize, Validate)]
#[garde(context(()))]
pub struct ThreadInput {
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH), custom(validate_user_id))]
    pub self_id: String,
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH), custom(validate_user_id))]
    pub peer_id: String,
}

/// Input for sending a message
#[derive(Debug, Deserialize, Validate)]
#[garde(context(()))]
pub struct SendInput {
    #[garde(length(max = MAX_CONTENT_LENGTH))]
    pub content: String,
    #[garde(length(max = MAX_ATTACHMENTS_PER_MESSAGE), inner(length(min = 1, max = MAX_ATTACHMENT_URI_LENGTH)))]
    pub attachment_urls: Vec<String>,
}

impl ThreadInput {
    pub fn validate_thread(&self) -> Result<(), SyncError> {
        self.validate_input()?;
        if self.self_id == self.peer_id {
            return Err(SyncError::Validation(
                "A thread needs two distinct participants".to_string(),
            ));
        }
        Ok(())
    }
}

impl SendInput {
    /// Content may be empty only when attachments are present
    pub fn validate_send(&self) -> Result<(), SyncError> {
        self.validate_input()?;
        if self.content.trim().is_empty() && self.attachment_urls.is_empty() {
            return Err(SyncError::Validation(
                "Message needs content or at least one attachment".to_string(),
            ));
        }
        Ok(())
    }
}

/// Helper trait to convert garde validation errors to SyncError
pub trait ValidateExt {
    fn validate_input(&self) -> Result<(), SyncError>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<(), SyncError> {
        self.validate()
            .map_err(|e| SyncError::Validation(e.to_string()))
    }
}
