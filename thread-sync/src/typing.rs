//! Typing indicator for one thread.
//!
//! Outgoing pings use a leading-edge debounce; the incoming flag expires on
//! its own when the peer stops sending pings. [`TypingState`] is the plain
//! state record, [`TypingCoordinator`] wires it to timers and the feed.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::backend::RealtimeFeed;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::FeedEvent;
use crate::utils::{lock_or_recover, typing_channel_key};

/// Last typing ping received from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub from_user_id: String,
    pub received_at: Instant,
}

#[derive(Debug, Clone)]
pub struct TypingState {
    peer_id: String,
    debounce: Duration,
    expiry: Duration,
    /// When our last ping actually went out
    last_broadcast: Option<Instant>,
    peer_signal: Option<TypingSignal>,
}

impl TypingState {
    pub fn new(peer_id: impl Into<String>, config: &SyncConfig) -> Self {
        Self {
            peer_id: peer_id.into(),
            debounce: config.typing_debounce,
            expiry: config.typing_expiry,
            last_broadcast: None,
            peer_signal: None,
        }
    }

    pub fn should_broadcast(&self, now: Instant) -> bool {
        match self.last_broadcast {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.debounce,
        }
    }

    pub fn record_broadcast(&mut self, now: Instant) {
        self.last_broadcast = Some(now);
    }

    pub fn last_broadcast(&self) -> Option<Instant> {
        self.last_broadcast
    }

    /// Register a typing ping. Pings from anyone but the peer are ignored.
    pub fn on_signal(&mut self, from_user_id: &str, now: Instant) -> bool {
        if from_user_id != self.peer_id {
            return false;
        }
        self.peer_signal = Some(TypingSignal {
            from_user_id: from_user_id.to_string(),
            received_at: now,
        });
        true
    }

    pub fn is_peer_typing(&self, now: Instant) -> bool {
        self.expires_at().is_some_and(|deadline| now < deadline)
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.peer_signal
            .as_ref()
            .map(|signal| signal.received_at + self.expiry)
    }

    /// Drop the peer signal if it has run out. Returns true on that transition.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.expires_at() {
            Some(deadline) if now >= deadline => {
                self.peer_signal = None;
                true
            }
            _ => false,
        }
    }
}

pub struct TypingCoordinator {
    self_id: String,
    channel: String,
    state: Arc<StdMutex<TypingState>>,
    peer_typing: Arc<watch::Sender<bool>>,
    expiry_task: StdMutex<Option<JoinHandle<()>>>,
}

impl TypingCoordinator {
    pub fn new(self_id: impl Into<String>, peer_id: impl Into<String>, config: &SyncConfig) -> Self {
        let self_id = self_id.into();
        let peer_id = peer_id.into();
        let (peer_typing, _) = watch::channel(false);
        Self {
            channel: typing_channel_key(&self_id, &peer_id),
            self_id,
            state: Arc::new(StdMutex::new(TypingState::new(peer_id, config))),
            peer_typing: Arc::new(peer_typing),
            expiry_task: StdMutex::new(None),
        }
    }

    /// Typing channel shared by both participants
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Broadcast a typing ping unless one went out within the debounce
    /// interval. Returns whether a ping was sent.
    pub fn notify_typing(&self, feed: &dyn RealtimeFeed) -> Result<bool, SyncError> {
        let now = Instant::now();
        if !lock_or_recover(&self.state).should_broadcast(now) {
            trace!(channel = %self.channel, "Typing ping debounced");
            return Ok(false);
        }

        let payload = FeedEvent::typing(&self.channel, &self.self_id).to_json()?;
        feed.publish_typing(&self.channel, payload).map_err(|e| {
            warn!(channel = %self.channel, error = %e, "Failed to broadcast typing");
            SyncError::Realtime(e)
        })?;

        lock_or_recover(&self.state).record_broadcast(now);
        Ok(true)
    }

    /// Handle a typing ping from the channel. Must run inside a tokio runtime.
    pub fn on_remote_typing(&self, from_user_id: &str) {
        let now = Instant::now();
        if !lock_or_recover(&self.state).on_signal(from_user_id, now) {
            return;
        }
        self.peer_typing.send_if_modified(|typing| !std::mem::replace(typing, true));

        let state = self.state.clone();
        let peer_typing = self.peer_typing.clone();
        let deadline = lock_or_recover(&self.state).expires_at();
        let task = tokio::spawn(async move {
            if let Some(deadline) = deadline {
                tokio::time::sleep_until(deadline).await;
            }
            if lock_or_recover(&state).expire(Instant::now()) {
                debug!("Peer stopped typing");
                peer_typing.send_replace(false);
            }
        });

        if let Some(previous) = lock_or_recover(&self.expiry_task).replace(task) {
            previous.abort();
        }
    }

    pub fn is_peer_typing(&self) -> bool {
        *self.peer_typing.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.peer_typing.subscribe()
    }

    /// Cancel the expiry timer and reset the flag
    pub fn shutdown(&self) {
        if let Some(task) = lock_or_recover(&self.expiry_task).take() {
            task.abort();
        }
        self.peer_typing.send_replace(false);
    }
}

impl Drop for TypingCoordinator {
    fn drop(&mut self) {
        if let Some(task) = lock_or_recover(&self.expiry_task).take() {
            task.abort();
        }
    }
}
