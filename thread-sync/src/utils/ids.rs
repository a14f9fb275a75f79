use chrono::{DateTime, Utc};
use uuid::Uuid;

const TEMP_ID_PREFIX: &str = "tmp-";

/// Generate a temporary id for an optimistic message.
///
/// Format: `tmp-<unix millis>-<uuid v4 simple>`. The embedded timestamp lets
/// two temp ids created at the same `created_at` still be ordered.
pub fn new_temp_id(created_at: DateTime<Utc>) -> String {
    format!(
        "{}{}-{}",
        TEMP_ID_PREFIX,
        created_at.timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Creation time embedded in a temp id, if `id` is one
pub fn temp_id_millis(id: &str) -> Option<i64> {
    let rest = id.strip_prefix(TEMP_ID_PREFIX)?;
    let (millis, _) = rest.split_once('-')?;
    millis.parse().ok()
}
