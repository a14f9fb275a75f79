pub mod event;
pub mod input;
mod message;

pub use event::{FeedEvent, MessageRow, RealtimeEvent};
pub use message::{Attachment, AttachmentKind, DeliveryState, Message};
