use std::sync::{Mutex, MutexGuard, PoisonError};

use url::Url;

/// Lock a std mutex, recovering the data if a previous holder panicked
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Separator between the ids of a thread key; never valid inside a user id
pub const KEY_SEPARATOR: char = ':';

/// Order-independent key for the thread between two users.
/// Both participants compute the same key regardless of who opens the thread.
pub fn thread_key(user_id_1: &str, user_id_2: &str) -> String {
    let (low, high) = if user_id_1 <= user_id_2 {
        (user_id_1, user_id_2)
    } else {
        (user_id_2, user_id_1)
    };
    format!("{}{}{}", low, KEY_SEPARATOR, high)
}

/// Name of the typing broadcast channel for a thread
pub fn typing_channel_key(user_id_1: &str, user_id_2: &str) -> String {
    format!("typing:{}", thread_key(user_id_1, user_id_2))
}

/// True if an attachment URI points at a file on this device and has to be
/// uploaded before the message can be persisted
pub fn is_local_uri(uri: &str) -> bool {
    // "C:\\..." would otherwise parse as a URL with scheme "c"
    if is_windows_path(uri) {
        return true;
    }
    match Url::parse(uri) {
        Ok(url) => matches!(url.scheme(), "file" | "content" | "ph" | "assets-library"),
        Err(_) => uri.starts_with('/') || uri.starts_with("./"),
    }
}

fn is_windows_path(uri: &str) -> bool {
    let bytes = uri.as_bytes();
    bytes.len() > 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}
