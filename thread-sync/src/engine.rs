//! Reconciliation of the open thread's message list.
//!
//! The engine merges three inputs into one deduplicated list: the initial
//! snapshot, optimistic local sends, and realtime row events. It never talks
//! to the backend itself; the session drives it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{DeliveryState, Message, RealtimeEvent};
use crate::optimistic;

/// How an optimistic entry was matched to its server row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The event id was recorded from the persist response
    Acknowledged,
    /// Same sender, recipient and content within the match window
    Heuristic,
    /// No echo arrived in time; confirmed from the persist response
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Event belongs to another thread (or is not a row event)
    NotInThread,
    Promoted { temp_id: String, via: MatchKind },
    /// Row id already present
    Duplicate,
    /// New confirmed message
    Appended,
    /// Fields of an existing message changed
    Updated,
    /// Update for a row this thread never saw
    UnknownUpdate,
}

/// Result of recording a successful persist call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// `temp_id` waits for the echo of the acknowledged row; arm its
    /// fallback timer with that row. When two identical sends crossed this
    /// is the sibling entry, not the one that was acknowledged.
    AwaitingEcho { temp_id: String },
    /// A crossed identical send failed and the failure landed on `temp_id`
    Failed { temp_id: String },
    /// The echo already confirmed this row, or the entry is gone
    Settled,
}

pub struct ReconciliationEngine {
    self_id: String,
    peer_id: String,
    match_window: chrono::Duration,
    messages: Vec<Arc<Message>>,
    /// server id -> temp id, filled when a persist call returns
    pending_sends: HashMap<String, String>,
    /// server id -> temp id of a sending entry whose row was taken by an
    /// identical sibling through the heuristic
    displaced: HashMap<String, String>,
    /// server id -> error of a sibling that failed after taking that row
    crossed_failures: HashMap<String, String>,
}

impl ReconciliationEngine {
    pub fn new(self_id: impl Into<String>, peer_id: impl Into<String>, config: &SyncConfig) -> Self {
        Self {
            self_id: self_id.into(),
            peer_id: peer_id.into(),
            match_window: config.match_window_chrono(),
            messages: Vec::new(),
            pending_sends: HashMap::new(),
            displaced: HashMap::new(),
            crossed_failures: HashMap::new(),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Current list, in arrival order
    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<Arc<Message>> {
        self.messages.clone()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Message>> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Number of acknowledged sends still waiting for their echo
    pub fn pending_count(&self) -> usize {
        self.pending_sends.len()
    }

    fn in_thread(&self, msg: &Message) -> bool {
        msg.is_between(&self.self_id, &self.peer_id)
    }

    fn contains_id(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Install the fetched history as the baseline.
    ///
    /// Entries that raced ahead of the fetch (local sends, early realtime
    /// rows) are kept unless the snapshot already holds their server row.
    pub fn load_snapshot(&mut self, rows: Vec<Message>) {
        let mut seen = HashSet::new();
        let mut next: Vec<Arc<Message>> = rows
            .into_iter()
            .filter(|row| seen.insert(row.id.clone()))
            .map(Arc::new)
            .collect();
        let baseline = next.len();

        for entry in &self.messages {
            if seen.contains(&entry.id) {
                continue;
            }
            if entry.is_optimistic() {
                let temp_id = entry.temp_id.as_deref().unwrap_or(&entry.id);
                let confirmed_in_snapshot = self
                    .pending_sends
                    .iter()
                    .any(|(server_id, t)| t == temp_id && seen.contains(server_id));
                if confirmed_in_snapshot {
                    continue;
                }
            }
            next.push(entry.clone());
        }

        self.pending_sends.retain(|server_id, _| !seen.contains(server_id));
        debug!(
            baseline,
            carried = next.len() - baseline,
            "Loaded thread snapshot"
        );
        self.messages = next;
    }

    /// Append a freshly created optimistic message
    pub fn push_local(&mut self, msg: Message) {
        trace!(temp_id = ?msg.temp_id, "Appending optimistic message");
        self.messages.push(Arc::new(msg));
    }

    /// Record that the persist call for `temp_id` returned `server_id`
    pub fn acknowledge(&mut self, temp_id: &str, server_id: &str) -> AckOutcome {
        if self.contains_id(server_id) {
            return self.acknowledge_taken_row(temp_id, server_id);
        }
        if optimistic::find_optimistic(&self.messages, temp_id).is_some() {
            self.pending_sends
                .insert(server_id.to_string(), temp_id.to_string());
            return AckOutcome::AwaitingEcho {
                temp_id: temp_id.to_string(),
            };
        }

        // The entry was confirmed with an identical sibling's row, so this
        // row is the sibling's.
        match self.crossed_sibling(temp_id) {
            Some(sibling) => {
                debug!(temp_id, server_id, %sibling, "Handing row to crossed sibling");
                self.pending_sends
                    .insert(server_id.to_string(), sibling.clone());
                AckOutcome::AwaitingEcho { temp_id: sibling }
            }
            None => {
                trace!(temp_id, server_id, "Ack for an entry that is no longer pending");
                AckOutcome::Settled
            }
        }
    }

    /// Ack whose row is already in the list: either our own echo won the
    /// race, or the heuristic gave the row to an identical sibling.
    fn acknowledge_taken_row(&mut self, temp_id: &str, server_id: &str) -> AckOutcome {
        let Some(index) = optimistic::find_optimistic(&self.messages, temp_id) else {
            return AckOutcome::Settled;
        };
        if self.pending_sends.values().any(|t| t == temp_id) {
            return AckOutcome::Settled;
        }

        if let Some(error) = self.crossed_failures.remove(server_id) {
            if let Some(next) = optimistic::fail(&self.messages, temp_id, error) {
                self.messages = next;
            }
            debug!(temp_id, server_id, "Crossed sibling failed, failing this entry");
            return AckOutcome::Failed {
                temp_id: temp_id.to_string(),
            };
        }

        if self.messages[index].is_sending() {
            debug!(temp_id, server_id, "Row taken by an identical send, waiting for its row");
            self.displaced
                .insert(server_id.to_string(), temp_id.to_string());
        }
        AckOutcome::Settled
    }

    /// Sending entry that should own the row acknowledged for `temp_id`,
    /// given that `temp_id` itself is already confirmed with another row
    fn crossed_sibling(&mut self, temp_id: &str) -> Option<String> {
        let holder = self
            .messages
            .iter()
            .find(|m| !m.is_optimistic() && m.temp_id.as_deref() == Some(temp_id))?
            .clone();

        if let Some(sibling) = self.displaced.remove(&holder.id) {
            if optimistic::find_optimistic(&self.messages, &sibling)
                .is_some_and(|i| self.messages[i].is_sending())
            {
                return Some(sibling);
            }
        }

        // The sibling's own ack has not arrived yet
        self.messages
            .iter()
            .filter(|m| {
                m.is_sending()
                    && m.content == holder.content
                    && m.sender_id == holder.sender_id
                    && m.recipient_id == holder.recipient_id
            })
            .filter_map(|m| m.temp_id.as_ref().map(|t| (m, t)))
            .filter(|(_, t)| !self.pending_sends.values().any(|p| p == *t))
            .map(|(m, t)| ((holder.created_at - m.created_at).abs(), t))
            .filter(|(distance, _)| *distance < self.match_window)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, t)| t.clone())
    }

    pub fn apply_event(&mut self, event: RealtimeEvent) -> ReconcileOutcome {
        match event {
            RealtimeEvent::Insert(msg) => self.apply_insert(msg),
            RealtimeEvent::Update(msg) => self.apply_update(msg),
            RealtimeEvent::Typing { .. } => ReconcileOutcome::NotInThread,
        }
    }

    /// Merge one inserted row into the list
    pub fn apply_insert(&mut self, msg: Message) -> ReconcileOutcome {
        if !self.in_thread(&msg) {
            trace!(id = %msg.id, "Ignoring row for another thread");
            return ReconcileOutcome::NotInThread;
        }

        if let Some(temp_id) = self.pending_sends.get(&msg.id).cloned() {
            if let Some(next) = optimistic::promote(&self.messages, &temp_id, msg.clone()) {
                self.messages = next;
                self.pending_sends.remove(&msg.id);
                debug!(id = %msg.id, %temp_id, "Confirmed acknowledged send");
                return ReconcileOutcome::Promoted {
                    temp_id,
                    via: MatchKind::Acknowledged,
                };
            }
            self.pending_sends.remove(&msg.id);
        }

        if self.contains_id(&msg.id) {
            trace!(id = %msg.id, "Dropping duplicate delivery");
            return ReconcileOutcome::Duplicate;
        }

        if let Some(temp_id) = self.heuristic_match(&msg) {
            if let Some(next) = optimistic::promote(&self.messages, &temp_id, msg.clone()) {
                self.messages = next;
                self.pending_sends.retain(|_, t| *t != temp_id);
                self.displaced.retain(|_, t| *t != temp_id);
                debug!(id = %msg.id, %temp_id, "Confirmed send from its echo");
                return ReconcileOutcome::Promoted {
                    temp_id,
                    via: MatchKind::Heuristic,
                };
            }
        }

        debug!(id = %msg.id, sender = %msg.sender_id, "Appending realtime message");
        self.messages.push(Arc::new(msg));
        ReconcileOutcome::Appended
    }

    /// Optimistic entry the row most plausibly confirms: identical sender,
    /// recipient and content, closest `created_at` inside the match window
    fn heuristic_match(&self, msg: &Message) -> Option<String> {
        self.messages
            .iter()
            .filter(|m| {
                m.is_optimistic()
                    && m.content == msg.content
                    && m.sender_id == msg.sender_id
                    && m.recipient_id == msg.recipient_id
            })
            .map(|m| ((msg.created_at - m.created_at).abs(), m))
            .filter(|(distance, _)| *distance < self.match_window)
            .min_by_key(|(distance, _)| *distance)
            .and_then(|(_, m)| m.temp_id.clone())
    }

    /// Apply a changed row (read receipts, edits) to the entry with its id
    pub fn apply_update(&mut self, msg: Message) -> ReconcileOutcome {
        if !self.in_thread(&msg) {
            return ReconcileOutcome::NotInThread;
        }

        // An update can overtake the insert echo of our own send
        if self.pending_sends.contains_key(&msg.id) {
            return self.apply_insert(msg);
        }

        let Some(index) = self.messages.iter().position(|m| m.id == msg.id) else {
            trace!(id = %msg.id, "Update for unknown message");
            return ReconcileOutcome::UnknownUpdate;
        };

        let current = &self.messages[index];
        let attachments = if msg.attachments.is_empty() {
            current.attachments.clone()
        } else {
            msg.attachments
        };
        let updated = Message {
            id: msg.id,
            temp_id: current.temp_id.clone(),
            content: msg.content,
            sender_id: msg.sender_id,
            recipient_id: msg.recipient_id,
            created_at: msg.created_at,
            attachments,
            read_at: msg.read_at.or(current.read_at),
            delivery: current.delivery.clone(),
        };
        if updated == **current {
            return ReconcileOutcome::Duplicate;
        }
        self.messages[index] = Arc::new(updated);
        ReconcileOutcome::Updated
    }

    /// Mark a pending send as failed. Returns true if the list changed.
    pub fn fail_send(&mut self, temp_id: &str, error: &str) -> bool {
        self.pending_sends.retain(|_, t| t != temp_id);
        if let Some(next) = optimistic::fail(&self.messages, temp_id, error) {
            self.messages = next;
            return true;
        }

        // Confirmed with an identical sibling's row: the failure is the sibling's
        let Some(held) = self
            .messages
            .iter()
            .find(|m| m.temp_id.as_deref() == Some(temp_id))
            .map(|m| m.id.clone())
        else {
            return false;
        };
        match self.displaced.remove(&held) {
            Some(sibling) => match optimistic::fail(&self.messages, &sibling, error) {
                Some(next) => {
                    debug!(temp_id, %sibling, "Moving send failure to crossed sibling");
                    self.messages = next;
                    true
                }
                None => false,
            },
            None => {
                self.crossed_failures.insert(held, error.to_string());
                false
            }
        }
    }

    /// Fallback when no echo arrived after a successful persist: trust the
    /// persisted row and confirm the entry with it
    pub fn confirm_by_timeout(&mut self, temp_id: &str, persisted: Message) -> Option<ReconcileOutcome> {
        let entry = optimistic::find_optimistic(&self.messages, temp_id)?;
        if !self.messages[entry].is_sending() {
            return None;
        }
        if self.contains_id(&persisted.id) {
            return None;
        }

        let server_id = persisted.id.clone();
        let next = optimistic::promote(&self.messages, temp_id, persisted)?;
        self.messages = next;
        self.pending_sends.remove(&server_id);
        self.displaced.retain(|_, t| t != temp_id);
        debug!(%server_id, temp_id, "Confirmed send without realtime echo");
        Some(ReconcileOutcome::Promoted {
            temp_id: temp_id.to_string(),
            via: MatchKind::Timeout,
        })
    }

    /// Remove a failed entry so it can be resent under a new temp id
    pub fn take_failed(&mut self, temp_id: &str) -> Result<Arc<Message>, SyncError> {
        let index = optimistic::find_optimistic(&self.messages, temp_id)
            .ok_or_else(|| SyncError::NotFound(temp_id.to_string()))?;
        if !self.messages[index].is_failed() {
            return Err(SyncError::NotRetryable(temp_id.to_string()));
        }
        let (next, removed) = optimistic::remove(&self.messages, temp_id)
            .ok_or_else(|| SyncError::NotFound(temp_id.to_string()))?;
        self.messages = next;
        Ok(removed)
    }

    /// Stamp `read_at` on incoming messages after the store marked them read
    pub fn mark_incoming_read(&mut self, at: DateTime<Utc>) -> usize {
        let mut marked = 0;
        for entry in self.messages.iter_mut() {
            if entry.sender_id == self.peer_id
                && entry.recipient_id == self.self_id
                && entry.read_at.is_none()
                && entry.delivery == DeliveryState::Confirmed
            {
                let mut read = Message::clone(entry);
                read.read_at = Some(at);
                *entry = Arc::new(read);
                marked += 1;
            }
        }
        marked
    }
}
