use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::backend::{Profile, ProfileLookup};
use crate::error::BackendError;

/// Sender profiles looked up during one session.
///
/// Owned by whoever renders senders (a thread session, the notifier) and
/// dropped with it. Concurrent misses for the same user may both reach the
/// backend; the last answer is kept.
pub struct ProfileCache {
    lookup: Arc<dyn ProfileLookup>,
    entries: DashMap<String, Profile>,
}

impl ProfileCache {
    pub fn new(lookup: Arc<dyn ProfileLookup>) -> Self {
        Self {
            lookup,
            entries: DashMap::new(),
        }
    }

    pub async fn get(&self, user_id: &str) -> Result<Profile, BackendError> {
        if let Some(profile) = self.entries.get(user_id) {
            return Ok(profile.clone());
        }

        debug!(user_id, "Profile cache miss");
        let profile = self.lookup.fetch_profile(user_id).await.map_err(|e| {
            warn!(user_id, error = %e, "Failed to fetch profile");
            e
        })?;
        self.entries.insert(user_id.to_string(), profile.clone());
        Ok(profile)
    }

    /// Display name, falling back to the raw user id when lookup fails
    pub async fn display_name(&self, user_id: &str) -> String {
        self.get(user_id)
            .await
            .map(|p| p.display_name)
            .unwrap_or_else(|_| user_id.to_string())
    }

    pub fn cached(&self, user_id: &str) -> Option<Profile> {
        self.entries.get(user_id).map(|p| p.clone())
    }

    pub fn invalidate(&self, user_id: &str) {
        self.entries.remove(user_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
