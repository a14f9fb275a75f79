//! In-app banners for messages that arrive outside the open thread.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{ProfileLookup, RealtimeFeed};
use crate::models::{FeedEvent, Message, RealtimeEvent};
use crate::profiles::ProfileCache;
use crate::utils::lock_or_recover;

const PREVIEW_CHARS: usize = 80;
const SEEN_CAPACITY: usize = 256;

/// A new-message banner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub message_id: String,
    pub from_user_id: String,
    pub display_name: String,
    pub preview: String,
}

/// Watches everything sent to the current user and emits a [`Banner`] for
/// each incoming message, except from the peer whose thread is on screen.
pub struct NewMessageNotifier {
    active_peer: Arc<StdMutex<Option<String>>>,
    shutdown_tx: broadcast::Sender<()>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl NewMessageNotifier {
    /// Start listening. Must be called from within a tokio runtime.
    pub fn start(
        self_id: &str,
        feed: &dyn RealtimeFeed,
        profiles: Arc<dyn ProfileLookup>,
    ) -> (Self, mpsc::UnboundedReceiver<Banner>) {
        let rows = feed.subscribe_rows(self_id);
        let (banner_tx, banner_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let active_peer = Arc::new(StdMutex::new(None));

        let task = tokio::spawn(run_notifier(
            self_id.to_string(),
            rows,
            banner_tx,
            shutdown_rx,
            active_peer.clone(),
            ProfileCache::new(profiles),
        ));
        info!(self_id, "New message notifier started");

        let notifier = Self {
            active_peer,
            shutdown_tx,
            task: StdMutex::new(Some(task)),
        };
        (notifier, banner_rx)
    }

    /// Suppress banners from `peer_id` while their thread is open
    pub fn set_active_peer(&self, peer_id: &str) {
        *lock_or_recover(&self.active_peer) = Some(peer_id.to_string());
    }

    pub fn clear_active_peer(&self) {
        *lock_or_recover(&self.active_peer) = None;
    }

    pub fn active_peer(&self) -> Option<String> {
        lock_or_recover(&self.active_peer).clone()
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = lock_or_recover(&self.task).take() {
            task.abort();
        }
    }
}

impl Drop for NewMessageNotifier {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bounded set of message ids already announced
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenIds {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(SEEN_CAPACITY),
            ids: HashSet::with_capacity(SEEN_CAPACITY),
        }
    }

    /// Returns false if `id` was already recorded
    fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

async fn run_notifier(
    self_id: String,
    mut rows: mpsc::UnboundedReceiver<String>,
    banner_tx: mpsc::UnboundedSender<Banner>,
    mut shutdown_rx: broadcast::Receiver<()>,
    active_peer: Arc<StdMutex<Option<String>>>,
    profiles: ProfileCache,
) {
    let mut seen = SeenIds::new();

    loop {
        let text = tokio::select! {
            _ = shutdown_rx.recv() => break,
            text = rows.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        let msg = match FeedEvent::parse(&text) {
            Ok(RealtimeEvent::Insert(msg)) => msg,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Dropping malformed payload in notifier");
                continue;
            }
        };

        if msg.recipient_id != self_id || msg.sender_id == self_id {
            continue;
        }
        let suppressed = lock_or_recover(&active_peer).as_deref() == Some(msg.sender_id.as_str());
        if suppressed {
            debug!(from = %msg.sender_id, "Thread is open, skipping banner");
            continue;
        }
        if !seen.insert(&msg.id) {
            continue;
        }

        let banner = Banner {
            display_name: profiles.display_name(&msg.sender_id).await,
            preview: preview(&msg),
            message_id: msg.id,
            from_user_id: msg.sender_id,
        };
        if banner_tx.send(banner).is_err() {
            debug!("Banner receiver dropped, stopping notifier");
            break;
        }
    }
}

fn preview(msg: &Message) -> String {
    let text = msg.content.trim();
    if text.is_empty() {
        return match msg.attachments.len() {
            0 => String::new(),
            1 => "Sent an image".to_string(),
            n => format!("Sent {} images", n),
        };
    }
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, AttachmentKind, DeliveryState};
    use chrono::Utc;

    fn message(content: &str, attachments: usize) -> Message {
        Message {
            id: "m1".to_string(),
            temp_id: None,
            content: content.to_string(),
            sender_id: "alice".to_string(),
            recipient_id: "bob".to_string(),
            created_at: Utc::now(),
            attachments: (0..attachments)
                .map(|i| Attachment::new(format!("https://cdn/{}.png", i), AttachmentKind::Image))
                .collect(),
            read_at: None,
            delivery: DeliveryState::Confirmed,
        }
    }

    #[test]
    fn test_preview_text() {
        assert_eq!(preview(&message("  hello  ", 0)), "hello");
        let long = "x".repeat(100);
        let cut = preview(&message(&long, 0));
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 1);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_preview_attachments_only() {
        assert_eq!(preview(&message("", 1)), "Sent an image");
        assert_eq!(preview(&message("", 3)), "Sent 3 images");
    }

    #[test]
    fn test_seen_ids_are_bounded() {
        let mut seen = SeenIds::new();
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        for i in 0..SEEN_CAPACITY {
            seen.insert(&i.to_string());
        }
        assert_eq!(seen.ids.len(), SEEN_CAPACITY);
        assert!(seen.insert("a"));
    }
}
