//! In-memory backend shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thread_sync::{
    Attachment, AttachmentKind, AttachmentUploader, BackendError, DeliveryState, FeedEvent,
    LocalHub, Message, MessageStore, NewMessage, Profile, ProfileLookup, SessionDeps,
};

/// How a successful persist reaches the realtime feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Published before the persist call returns
    BeforeAck,
    /// Published this long after the persist call returned
    AfterAck(Duration),
    /// Never published; tests publish rows themselves
    Off,
}

pub struct FakeStore {
    hub: Arc<LocalHub>,
    rows: Mutex<Vec<Message>>,
    next_id: AtomicUsize,
    persist_errors: Mutex<VecDeque<String>>,
    fetch_error: Mutex<Option<String>>,
    pub echo: Mutex<Echo>,
    /// Delay between publishing the echo and returning from persist
    pub persist_delay: Mutex<Duration>,
    pub persist_calls: AtomicUsize,
    pub mark_read_calls: AtomicUsize,
}

impl FakeStore {
    pub fn new(hub: Arc<LocalHub>) -> Self {
        Self {
            hub,
            rows: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            persist_errors: Mutex::new(VecDeque::new()),
            fetch_error: Mutex::new(None),
            echo: Mutex::new(Echo::BeforeAck),
            persist_delay: Mutex::new(Duration::ZERO),
            persist_calls: AtomicUsize::new(0),
            mark_read_calls: AtomicUsize::new(0),
        }
    }

    pub fn seed(&self, rows: Vec<Message>) {
        self.rows.lock().unwrap().extend(rows);
    }

    pub fn fail_next_persist(&self, error: &str) {
        self.persist_errors.lock().unwrap().push_back(error.to_string());
    }

    pub fn fail_fetch(&self, error: &str) {
        *self.fetch_error.lock().unwrap() = Some(error.to_string());
    }

    pub fn set_echo(&self, echo: Echo) {
        *self.echo.lock().unwrap() = echo;
    }

    pub fn set_persist_delay(&self, delay: Duration) {
        *self.persist_delay.lock().unwrap() = delay;
    }

    pub fn stored(&self) -> Vec<Message> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn fetch_messages(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>, BackendError> {
        if let Some(error) = self.fetch_error.lock().unwrap().clone() {
            return Err(BackendError::new(error));
        }
        let mut rows: Vec<Message> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.is_between(user_a, user_b))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn persist_message(&self, message: NewMessage) -> Result<Message, BackendError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.persist_errors.lock().unwrap().pop_front();
        let delay = *self.persist_delay.lock().unwrap();

        if let Some(error) = failure {
            tokio::time::sleep(delay).await;
            return Err(BackendError::new(error));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let row = Message {
            id: format!("srv{}", n),
            temp_id: None,
            content: message.content.trim().to_string(),
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            created_at: Utc::now() + chrono::Duration::milliseconds(120),
            attachments: message.attachments,
            read_at: None,
            delivery: DeliveryState::Confirmed,
        };
        self.rows.lock().unwrap().push(row.clone());

        let echo = *self.echo.lock().unwrap();
        if echo == Echo::BeforeAck {
            self.hub.publish_row(&FeedEvent::insert(&row))?;
        }
        tokio::time::sleep(delay).await;

        if let Echo::AfterAck(lag) = echo {
            let hub = self.hub.clone();
            let event = FeedEvent::insert(&row);
            tokio::spawn(async move {
                tokio::time::sleep(lag).await;
                let _ = hub.publish_row(&event);
            });
        }
        Ok(row)
    }

    async fn mark_incoming_as_read(&self, user_id: &str, other_user_id: &str) -> Result<(), BackendError> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let updated: Vec<Message> = {
            let mut rows = self.rows.lock().unwrap();
            rows.iter_mut()
                .filter(|m| m.sender_id == other_user_id && m.recipient_id == user_id && m.read_at.is_none())
                .map(|m| {
                    m.read_at = Some(now);
                    m.clone()
                })
                .collect()
        };
        for row in &updated {
            self.hub.publish_row(&FeedEvent::update(row))?;
        }
        Ok(())
    }
}

pub struct FakeUploader {
    next_id: AtomicUsize,
    fail_with: Mutex<Option<String>>,
    pub uploads: Mutex<Vec<(String, String)>>,
}

impl FakeUploader {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            fail_with: Mutex::new(None),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_with(&self, error: &str) {
        *self.fail_with.lock().unwrap() = Some(error.to_string());
    }
}

#[async_trait]
impl AttachmentUploader for FakeUploader {
    async fn upload_attachment(&self, local_uri: &str, owner_temp_id: &str) -> Result<Attachment, BackendError> {
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(BackendError::new(error));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((local_uri.to_string(), owner_temp_id.to_string()));
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Attachment {
            id: Some(format!("att{}", n)),
            url: format!("https://cdn.example.com/{}/{}.jpg", owner_temp_id, n),
            kind: AttachmentKind::Image,
            created_at: Utc::now(),
        })
    }
}

pub struct FakeProfiles;

#[async_trait]
impl ProfileLookup for FakeProfiles {
    async fn fetch_profile(&self, user_id: &str) -> Result<Profile, BackendError> {
        let mut chars = user_id.chars();
        let display_name = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => return Err(BackendError::new("empty user id")),
        };
        Ok(Profile {
            user_id: user_id.to_string(),
            display_name,
            avatar_url: None,
        })
    }
}

pub struct Backend {
    pub hub: Arc<LocalHub>,
    pub store: Arc<FakeStore>,
    pub uploader: Arc<FakeUploader>,
}

impl Backend {
    pub fn new() -> Self {
        let hub = Arc::new(LocalHub::new());
        Self {
            store: Arc::new(FakeStore::new(hub.clone())),
            uploader: Arc::new(FakeUploader::new()),
            hub,
        }
    }

    pub fn deps(&self) -> SessionDeps {
        SessionDeps {
            store: self.store.clone(),
            uploader: self.uploader.clone(),
            profiles: Arc::new(FakeProfiles),
            feed: self.hub.clone(),
        }
    }
}

pub fn row(id: &str, from: &str, to: &str, content: &str, at: DateTime<Utc>) -> Message {
    Message {
        id: id.to_string(),
        temp_id: None,
        content: content.to_string(),
        sender_id: from.to_string(),
        recipient_id: to.to_string(),
        created_at: at,
        attachments: Vec::new(),
        read_at: None,
        delivery: DeliveryState::Confirmed,
    }
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
}

/// Let spawned tasks run until the runtime goes idle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
