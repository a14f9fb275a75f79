use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SyncError;

const DEFAULT_MATCH_WINDOW_MS: u64 = 5_000;
const DEFAULT_GROUP_GAP_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_CONFIRM_FALLBACK_MS: u64 = 3_000;
const DEFAULT_TYPING_DEBOUNCE_MS: u64 = 1_000;
const DEFAULT_TYPING_EXPIRY_MS: u64 = 3_000;

/// Tunable thresholds for a thread session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Max distance between an optimistic entry and an echo for a heuristic match
    pub match_window: Duration,
    /// Max gap between consecutive messages of one visual group
    pub group_gap: Duration,
    /// How long an acknowledged send waits for its echo before being confirmed locally
    pub confirm_fallback: Duration,
    /// Min spacing between outgoing typing broadcasts
    pub typing_debounce: Duration,
    /// How long a peer stays "typing" without a fresh signal
    pub typing_expiry: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            match_window: Duration::from_millis(DEFAULT_MATCH_WINDOW_MS),
            group_gap: Duration::from_millis(DEFAULT_GROUP_GAP_MS),
            confirm_fallback: Duration::from_millis(DEFAULT_CONFIRM_FALLBACK_MS),
            typing_debounce: Duration::from_millis(DEFAULT_TYPING_DEBOUNCE_MS),
            typing_expiry: Duration::from_millis(DEFAULT_TYPING_EXPIRY_MS),
        }
    }
}

impl SyncConfig {
    /// Build a config from `THREAD_SYNC_*_MS` environment variables.
    ///
    /// A `.env` file is loaded first if present; unset variables keep their
    /// defaults, malformed ones are an error.
    pub fn from_env() -> Result<Self, SyncError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "Failed to load .env file");
            }
        }

        let defaults = Self::default();
        let config = Self {
            match_window: env_millis("THREAD_SYNC_MATCH_WINDOW_MS", defaults.match_window)?,
            group_gap: env_millis("THREAD_SYNC_GROUP_GAP_MS", defaults.group_gap)?,
            confirm_fallback: env_millis(
                "THREAD_SYNC_CONFIRM_FALLBACK_MS",
                defaults.confirm_fallback,
            )?,
            typing_debounce: env_millis("THREAD_SYNC_TYPING_DEBOUNCE_MS", defaults.typing_debounce)?,
            typing_expiry: env_millis("THREAD_SYNC_TYPING_EXPIRY_MS", defaults.typing_expiry)?,
        };
        config.validate()?;

        info!(?config, "Thread sync configuration loaded");
        Ok(config)
    }

    /// Reject zero durations, which would disable matching or grouping outright
    pub fn validate(&self) -> Result<(), SyncError> {
        let fields = [
            ("match_window", self.match_window),
            ("group_gap", self.group_gap),
            ("confirm_fallback", self.confirm_fallback),
            ("typing_expiry", self.typing_expiry),
        ];
        for (name, value) in fields {
            if value.is_zero() {
                return Err(SyncError::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }

    pub fn group_gap_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.group_gap).unwrap_or(chrono::Duration::MAX)
    }

    pub fn match_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.match_window).unwrap_or(chrono::Duration::MAX)
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration, SyncError> {
    parse_millis(key, std::env::var(key).ok().as_deref(), default)
}

fn parse_millis(key: &str, raw: Option<&str>, default: Duration) -> Result<Duration, SyncError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| SyncError::Config(format!("{}={:?}: {}", key, value, e))),
    }
}
