mod helpers;
mod ids;

pub use helpers::{is_local_uri, thread_key, typing_channel_key, KEY_SEPARATOR};
pub(crate) use helpers::lock_or_recover;
pub use ids::{new_temp_id, temp_id_millis};
