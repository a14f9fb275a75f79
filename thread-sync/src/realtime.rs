use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::backend::RealtimeFeed;
use crate::error::BackendError;
use crate::models::FeedEvent;

/// In-process realtime feed.
///
/// Fans row events out to the sender's and the recipient's subscribers and
/// typing payloads to everyone on the channel. Several independent
/// listeners may subscribe for the same user; each gets its own copy.
pub struct LocalHub {
    /// user_id -> row subscribers
    rows: DashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    /// channel -> typing subscribers
    typing: DashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            typing: DashMap::new(),
        }
    }

    /// Publish an insert/update row event to both participants.
    /// Returns how many subscribers received it.
    pub fn publish_row(&self, event: &FeedEvent) -> Result<usize, BackendError> {
        let row = match event {
            FeedEvent::Insert(row) | FeedEvent::Update(row) => row,
            FeedEvent::Typing(_) => {
                return Err(BackendError::new("typing payloads go to a typing channel"))
            }
        };
        let payload = serde_json::to_string(event).map_err(|e| BackendError::new(e.to_string()))?;

        let mut delivered = send_all(&self.rows, &row.recipient_id, &payload);
        if row.sender_id != row.recipient_id {
            delivered += send_all(&self.rows, &row.sender_id, &payload);
        }
        debug!(id = %row.id, delivered, "Published row event");
        Ok(delivered)
    }

    /// Push an arbitrary payload to one user's row subscribers
    pub fn publish_raw(&self, user_id: &str, payload: &str) -> usize {
        send_all(&self.rows, user_id, payload)
    }

    /// Number of live row subscriptions for a user
    pub fn row_subscribers(&self, user_id: &str) -> usize {
        live_count(&self.rows, user_id)
    }

    pub fn typing_subscribers(&self, channel: &str) -> usize {
        live_count(&self.typing, channel)
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeFeed for LocalHub {
    fn subscribe_rows(&self, user_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.rows.entry(user_id.to_string()).or_default().push(tx);
        rx
    }

    fn subscribe_typing(&self, channel: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.typing.entry(channel.to_string()).or_default().push(tx);
        rx
    }

    fn publish_typing(&self, channel: &str, payload: String) -> Result<(), BackendError> {
        let delivered = send_all(&self.typing, channel, &payload);
        trace!(channel, delivered, "Published typing ping");
        Ok(())
    }
}

/// Send to every open subscriber under `key`, pruning closed ones
fn send_all(map: &DashMap<String, Vec<mpsc::UnboundedSender<String>>>, key: &str, payload: &str) -> usize {
    let Some(mut subscribers) = map.get_mut(key) else {
        return 0;
    };
    subscribers.retain(|tx| !tx.is_closed());
    let delivered = subscribers
        .iter()
        .filter(|tx| tx.send(payload.to_string()).is_ok())
        .count();
    if subscribers.is_empty() {
        drop(subscribers);
        map.remove_if(key, |_, subs| subs.is_empty());
    }
    delivered
}

fn live_count(map: &DashMap<String, Vec<mpsc::UnboundedSender<String>>>, key: &str) -> usize {
    map.get(key)
        .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
        .unwrap_or(0)
}
