//! Client-side synchronization for one-to-one message threads.
//!
//! Messages are shown the moment they are sent, then reconciled with the
//! server's copy once it comes back over the realtime feed. The crate also
//! covers retry of failed sends, the typing indicator, day/time grouping
//! for display and read receipts.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod grouping;
pub mod models;
pub mod notifier;
pub mod optimistic;
pub mod profiles;
pub mod realtime;
pub mod receipts;
pub mod session;
pub mod telemetry;
pub mod typing;
pub mod utils;

pub use backend::{AttachmentUploader, MessageStore, NewMessage, Profile, ProfileLookup, RealtimeFeed};
pub use config::SyncConfig;
pub use engine::{AckOutcome, MatchKind, ReconcileOutcome, ReconciliationEngine};
pub use error::{BackendError, SyncError, SyncResult};
pub use grouping::{DayGroup, DisplayUnit};
pub use models::{Attachment, AttachmentKind, DeliveryState, FeedEvent, Message, RealtimeEvent};
pub use notifier::{Banner, NewMessageNotifier};
pub use realtime::LocalHub;
pub use session::{SessionDeps, ThreadSession};
pub use typing::TypingCoordinator;
