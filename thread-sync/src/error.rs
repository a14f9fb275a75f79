use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Failure reported by one of the external collaborators (store, uploader,
/// profile lookup, realtime feed).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for BackendError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for BackendError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("invalid realtime payload: {0}")]
    InvalidEvent(String),

    #[error("failed to load messages: {0}")]
    Fetch(#[source] BackendError),

    #[error("failed to send message: {0}")]
    Persist(#[source] BackendError),

    #[error("failed to upload attachment: {0}")]
    Upload(#[source] BackendError),

    #[error("failed to mark messages as read: {0}")]
    MarkRead(#[source] BackendError),

    #[error("realtime feed error: {0}")]
    Realtime(#[source] BackendError),

    #[error("message not found: {0}")]
    NotFound(String),

    #[error("message {0} has not failed and cannot be retried")]
    NotRetryable(String),

    #[error("thread session is closed")]
    Closed,
}

impl SyncError {
    /// Text shown next to a failed message
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Persist(e) | SyncError::Upload(e) => e.message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_unwraps_backend_text() {
        let err = SyncError::Persist(BackendError::new("network error"));
        assert_eq!(err.user_message(), "network error");
        assert_eq!(err.to_string(), "failed to send message: network error");

        let err = SyncError::Upload("bucket full".into());
        assert_eq!(err.user_message(), "bucket full");
    }

    #[test]
    fn test_other_errors_use_display() {
        assert_eq!(SyncError::Closed.user_message(), "thread session is closed");
    }
}
