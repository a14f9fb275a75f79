//! One visit to a thread screen.
//!
//! A [`ThreadSession`] loads the history, listens to the realtime feed and
//! the thread's typing channel, and exposes the imperative API the
//! presentation layer calls (send, retry, mark read, pick image, typing).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use futures_util::future::try_join_all;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::backend::{AttachmentUploader, MessageStore, NewMessage, Profile, ProfileLookup, RealtimeFeed};
use crate::config::SyncConfig;
use crate::engine::{AckOutcome, ReconcileOutcome, ReconciliationEngine};
use crate::error::{BackendError, SyncError};
use crate::grouping::{self, DayGroup, DisplayUnit};
use crate::models::input::{SendInput, ThreadInput};
use crate::models::{Attachment, AttachmentKind, FeedEvent, Message, RealtimeEvent};
use crate::optimistic;
use crate::profiles::ProfileCache;
use crate::receipts;
use crate::typing::TypingCoordinator;
use crate::utils::{is_local_uri, lock_or_recover};

/// External collaborators a session talks to
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn MessageStore>,
    pub uploader: Arc<dyn AttachmentUploader>,
    pub profiles: Arc<dyn ProfileLookup>,
    pub feed: Arc<dyn RealtimeFeed>,
}

struct SessionInner {
    self_id: String,
    peer_id: String,
    config: SyncConfig,
    deps: SessionDeps,
    engine: StdMutex<ReconciliationEngine>,
    /// Chronologically sorted list, republished after every change
    list_tx: watch::Sender<Vec<Arc<Message>>>,
    typing: TypingCoordinator,
    /// Attachments picked for the next message
    draft: StdMutex<Vec<Attachment>>,
    /// temp_id -> fallback confirmation timer
    confirm_timers: DashMap<String, JoinHandle<()>>,
    profiles: ProfileCache,
    closed: AtomicBool,
}

pub struct ThreadSession {
    inner: Arc<SessionInner>,
    shutdown_tx: broadcast::Sender<()>,
    listener: StdMutex<Option<JoinHandle<()>>>,
}

impl ThreadSession {
    /// Open the thread between `self_id` and `peer_id`.
    ///
    /// Subscriptions are taken before the history fetch so events pushed
    /// while it is in flight are buffered and reconciled afterwards. A failed
    /// fetch is returned to the caller and not retried.
    pub async fn open(
        deps: SessionDeps,
        config: SyncConfig,
        self_id: &str,
        peer_id: &str,
    ) -> Result<Self, SyncError> {
        ThreadInput {
            self_id: self_id.to_string(),
            peer_id: peer_id.to_string(),
        }
        .validate_thread()?;
        config.validate()?;

        let typing = TypingCoordinator::new(self_id, peer_id, &config);
        let rows_rx = deps.feed.subscribe_rows(self_id);
        let typing_rx = deps.feed.subscribe_typing(typing.channel());

        let history = deps
            .store
            .fetch_messages(self_id, peer_id)
            .await
            .map_err(|e| {
                error!(self_id, peer_id, error = %e, "Failed to fetch thread history");
                SyncError::Fetch(e)
            })?;
        info!(self_id, peer_id, count = history.len(), "Thread history loaded");

        let mut engine = ReconciliationEngine::new(self_id, peer_id, &config);
        engine.load_snapshot(history);
        let mut initial = engine.snapshot();
        grouping::sort_chronologically(&mut initial);
        let (list_tx, _) = watch::channel(initial);

        let inner = Arc::new(SessionInner {
            self_id: self_id.to_string(),
            peer_id: peer_id.to_string(),
            config,
            profiles: ProfileCache::new(deps.profiles.clone()),
            deps,
            engine: StdMutex::new(engine),
            list_tx,
            typing,
            draft: StdMutex::new(Vec::new()),
            confirm_timers: DashMap::new(),
            closed: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let listener = tokio::spawn(run_listener(
            inner.clone(),
            rows_rx,
            typing_rx,
            shutdown_rx,
        ));

        let session = Self {
            inner,
            shutdown_tx,
            listener: StdMutex::new(Some(listener)),
        };

        if let Err(e) = session.mark_read().await {
            warn!(error = %e, "Could not mark thread as read on open");
        }

        Ok(session)
    }

    pub fn self_id(&self) -> &str {
        &self.inner.self_id
    }

    pub fn peer_id(&self) -> &str {
        &self.inner.peer_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), SyncError> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        Ok(())
    }

    /// Stage a local image for the next message
    pub fn pick_image(&self, local_uri: impl Into<String>) -> Result<(), SyncError> {
        self.ensure_open()?;
        let uri = local_uri.into();
        if uri.trim().is_empty() {
            return Err(SyncError::Validation("Image URI cannot be empty".to_string()));
        }
        lock_or_recover(&self.inner.draft).push(Attachment::new(uri, AttachmentKind::Image));
        Ok(())
    }

    pub fn draft_attachments(&self) -> Vec<Attachment> {
        lock_or_recover(&self.inner.draft).clone()
    }

    pub fn clear_draft(&self) {
        lock_or_recover(&self.inner.draft).clear();
    }

    /// Send `content` with the staged attachments.
    ///
    /// The message shows up immediately as sending; upload and persist run in
    /// the background. Returns the temp id of the new entry. Must be called
    /// from within a tokio runtime.
    pub fn send(&self, content: impl Into<String>) -> Result<String, SyncError> {
        self.ensure_open()?;
        let content = content.into();

        let attachments = {
            let mut draft = lock_or_recover(&self.inner.draft);
            SendInput {
                content: content.clone(),
                attachment_urls: draft.iter().map(|a| a.url.clone()).collect(),
            }
            .validate_send()?;
            std::mem::take(&mut *draft)
        };

        Ok(self.inner.start_send(content, attachments))
    }

    /// Resend a failed message under a new temp id. The failed entry is removed.
    pub fn retry(&self, temp_id: &str) -> Result<String, SyncError> {
        self.ensure_open()?;
        let failed = lock_or_recover(&self.inner.engine).take_failed(temp_id)?;
        info!(old_temp_id = temp_id, "Retrying failed message");
        Ok(self
            .inner
            .start_send(failed.content.clone(), failed.attachments.clone()))
    }

    /// Drop a failed message without resending it
    pub fn discard_failed(&self, temp_id: &str) -> Result<(), SyncError> {
        self.ensure_open()?;
        lock_or_recover(&self.inner.engine).take_failed(temp_id)?;
        self.inner.publish();
        Ok(())
    }

    /// Mark the peer's messages as read. Call whenever the thread regains focus.
    pub async fn mark_read(&self) -> Result<(), SyncError> {
        self.ensure_open()?;
        self.inner
            .deps
            .store
            .mark_incoming_as_read(&self.inner.self_id, &self.inner.peer_id)
            .await
            .map_err(SyncError::MarkRead)?;

        let marked = lock_or_recover(&self.inner.engine).mark_incoming_read(Utc::now());
        if marked > 0 {
            debug!(marked, "Marked incoming messages as read");
            self.inner.publish();
        }
        Ok(())
    }

    /// Tell the peer we are typing, at most once per debounce interval.
    /// Returns whether a ping went out.
    pub fn notify_typing(&self) -> Result<bool, SyncError> {
        self.ensure_open()?;
        self.inner.typing.notify_typing(self.inner.deps.feed.as_ref())
    }

    /// Current messages in chronological order
    pub fn messages(&self) -> Vec<Arc<Message>> {
        self.inner.list_tx.borrow().clone()
    }

    /// Watch the message list; a new value is published after every change
    pub fn subscribe(&self) -> watch::Receiver<Vec<Arc<Message>>> {
        self.inner.list_tx.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Message>> {
        self.inner
            .list_tx
            .borrow()
            .iter()
            .find(|m| m.id == id || m.temp_id.as_deref() == Some(id))
            .cloned()
    }

    /// Day buckets in UTC
    pub fn day_groups(&self) -> Vec<DayGroup> {
        self.day_groups_in(&Utc)
    }

    pub fn day_groups_in<Tz: TimeZone>(&self, tz: &Tz) -> Vec<DayGroup> {
        grouping::group_by_day(&self.messages(), self.inner.config.group_gap_chrono(), tz)
    }

    /// Newest-first display units in UTC
    pub fn display_units(&self) -> Vec<DisplayUnit> {
        self.display_units_in(&Utc)
    }

    pub fn display_units_in<Tz: TimeZone>(&self, tz: &Tz) -> Vec<DisplayUnit> {
        grouping::display_units(&self.messages(), self.inner.config.group_gap_chrono(), tz)
    }

    pub fn unread_count(&self) -> usize {
        receipts::unread_count(&self.messages(), &self.inner.self_id)
    }

    /// Id of the newest own message the peer has read
    pub fn last_read_outgoing(&self) -> Option<String> {
        receipts::last_read_outgoing(&self.messages(), &self.inner.self_id).map(|m| m.id.clone())
    }

    pub fn peer_typing(&self) -> bool {
        self.inner.typing.is_peer_typing()
    }

    pub fn typing_updates(&self) -> watch::Receiver<bool> {
        self.inner.typing.subscribe()
    }

    pub async fn sender_profile(&self, user_id: &str) -> Result<Profile, BackendError> {
        self.inner.profiles.get(user_id).await
    }

    /// Acknowledged sends still waiting for their realtime echo
    pub fn pending_confirmations(&self) -> usize {
        lock_or_recover(&self.inner.engine).pending_count()
    }

    /// Leave the thread: stop listening and clear timers. In-flight sends
    /// are left to finish; their results are dropped.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        if let Some(listener) = lock_or_recover(&self.listener).take() {
            listener.abort();
        }
        self.inner.confirm_timers.retain(|_, timer| {
            timer.abort();
            false
        });
        self.inner.typing.shutdown();
        info!(self_id = %self.inner.self_id, peer_id = %self.inner.peer_id, "Thread session closed");
    }
}

impl Drop for ThreadSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl SessionInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn publish(&self) {
        let mut list = lock_or_recover(&self.engine).snapshot();
        grouping::sort_chronologically(&mut list);
        self.list_tx.send_replace(list);
    }

    /// Append an optimistic message and deliver it in the background
    fn start_send(self: &Arc<Self>, content: String, attachments: Vec<Attachment>) -> String {
        let msg = optimistic::create_optimistic(content, &self.self_id, &self.peer_id, attachments);
        let temp_id = msg.id.clone();
        lock_or_recover(&self.engine).push_local(msg.clone());
        self.publish();
        debug!(%temp_id, "Queued optimistic message");

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.deliver(msg).await });
        temp_id
    }

    async fn deliver(self: Arc<Self>, msg: Message) {
        let temp_id = msg.id.clone();
        let result = self.persist(&msg).await;

        if self.is_closed() {
            debug!(%temp_id, "Session closed before send finished, dropping result");
            return;
        }

        match result {
            Ok(persisted) => {
                let outcome = lock_or_recover(&self.engine).acknowledge(&temp_id, &persisted.id);
                debug!(%temp_id, server_id = %persisted.id, ?outcome, "Message persisted");
                match outcome {
                    AckOutcome::AwaitingEcho { temp_id: owner } => {
                        self.arm_confirm_timer(owner, persisted)
                    }
                    AckOutcome::Failed { .. } => self.publish(),
                    AckOutcome::Settled => {}
                }
            }
            Err(e) => {
                warn!(%temp_id, error = %e, "Failed to send message");
                if lock_or_recover(&self.engine).fail_send(&temp_id, &e.user_message()) {
                    self.publish();
                }
            }
        }
    }

    /// Upload local attachments, then persist
    async fn persist(&self, msg: &Message) -> Result<Message, SyncError> {
        let temp_id = msg.id.as_str();
        let uploads = msg.attachments.iter().map(|attachment| async move {
            if is_local_uri(&attachment.url) {
                self.deps
                    .uploader
                    .upload_attachment(&attachment.url, temp_id)
                    .await
                    .map_err(SyncError::Upload)
            } else {
                Ok(attachment.clone())
            }
        });
        let attachments = try_join_all(uploads).await?;

        self.deps
            .store
            .persist_message(NewMessage {
                sender_id: msg.sender_id.clone(),
                recipient_id: msg.recipient_id.clone(),
                content: msg.content.clone(),
                attachments,
            })
            .await
            .map_err(SyncError::Persist)
    }

    fn arm_confirm_timer(self: &Arc<Self>, temp_id: String, persisted: Message) {
        let weak: Weak<SessionInner> = Arc::downgrade(self);
        let delay = self.config.confirm_fallback;
        let key = temp_id.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.confirm_timers.remove(&key);
            let outcome = lock_or_recover(&inner.engine).confirm_by_timeout(&key, persisted);
            if outcome.is_some() {
                inner.publish();
            }
        });

        if let Some(previous) = self.confirm_timers.insert(temp_id, timer) {
            previous.abort();
        }
    }

    fn cancel_confirm_timer(&self, temp_id: &str) {
        if let Some((_, timer)) = self.confirm_timers.remove(temp_id) {
            timer.abort();
        }
    }

    fn handle_row_payload(&self, text: &str) {
        let event = match FeedEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed realtime payload");
                return;
            }
        };
        if matches!(event, RealtimeEvent::Typing { .. }) {
            trace!("Ignoring typing payload on the row feed");
            return;
        }

        let outcome = lock_or_recover(&self.engine).apply_event(event);
        match outcome {
            ReconcileOutcome::Promoted { ref temp_id, .. } => {
                self.cancel_confirm_timer(temp_id);
                self.publish();
            }
            ReconcileOutcome::Appended | ReconcileOutcome::Updated => self.publish(),
            ReconcileOutcome::NotInThread
            | ReconcileOutcome::Duplicate
            | ReconcileOutcome::UnknownUpdate => {}
        }
    }

    fn handle_typing_payload(&self, text: &str) {
        match FeedEvent::parse(text) {
            Ok(RealtimeEvent::Typing {
                channel,
                from_user_id,
            }) if channel == self.typing.channel() => {
                self.typing.on_remote_typing(&from_user_id);
            }
            Ok(_) => trace!("Ignoring non-typing payload on the typing channel"),
            Err(e) => warn!(error = %e, "Dropping malformed typing payload"),
        }
    }
}

async fn run_listener(
    inner: Arc<SessionInner>,
    mut rows: mpsc::UnboundedReceiver<String>,
    mut typing: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown signal received, stopping thread listener");
                break;
            }
            Some(text) = rows.recv() => inner.handle_row_payload(&text),
            Some(text) = typing.recv() => inner.handle_typing_payload(&text),
            else => {
                info!("Realtime feed closed");
                break;
            }
        }
    }
}
