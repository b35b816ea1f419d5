//! The in-memory view of a download request.

use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle state of an [`Item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    Queued,
    Downloading,
    Completed,
    Failed,
    Paused,
    Canceled,
}

impl ItemState {
    /// `Completed` and `Canceled` never transition again without an explicit retry
    /// that mints a new queue token.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Completed | ItemState::Canceled)
    }

    pub fn as_status(self) -> &'static str {
        match self {
            ItemState::Queued => "pending",
            ItemState::Downloading => "downloading",
            ItemState::Completed => "completed",
            ItemState::Failed => "error",
            ItemState::Paused => "paused",
            ItemState::Canceled => "canceled",
        }
    }
}

/// Metadata fetched from the extractor ahead of the actual download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMeta {
    pub title: Option<String>,
    pub duration_seconds: Option<u64>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    pub url: String,
    pub db_id: Option<i64>,
    pub progress: f64,
    pub state: ItemState,
    pub error: Option<String>,
    pub meta: ItemMeta,
    pub filename: Option<String>,
    pub queue_token: u64,
    pub started_at: u64,
    pub updated_at: u64,
}

impl Item {
    pub fn new(id: String, url: String) -> Self {
        let now = now_secs();
        Self {
            id,
            url,
            db_id: None,
            progress: 0.0,
            state: ItemState::Queued,
            error: None,
            meta: ItemMeta::default(),
            filename: None,
            queue_token: 1,
            started_at: now,
            updated_at: now,
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generates an id with at least 96 bits of randomness (24 hex chars).
///
/// Falls back to a monotonic timestamp-based id if the entropy source is
/// somehow exhausted, so admission never fails purely for want of an id.
pub fn new_id() -> String {
    let mut bytes = [0u8; 12];
    if rand::rngs::OsRng.try_fill_bytes(&mut bytes).is_ok() {
        return hex_encode(&bytes);
    }
    format!("t{:024x}", now_secs())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_starts_queued_with_full_token() {
        let item = Item::new("abc".to_string(), "https://example.com".to_string());
        assert_eq!(item.state, ItemState::Queued);
        assert_eq!(item.queue_token, 1);
        assert_eq!(item.progress, 0.0);
        assert!(item.db_id.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(ItemState::Completed.is_terminal());
        assert!(ItemState::Canceled.is_terminal());
        assert!(!ItemState::Failed.is_terminal());
        assert!(!ItemState::Paused.is_terminal());
    }

    #[test]
    fn ids_are_unique_and_hex() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn status_mapping_matches_durable_schema() {
        assert_eq!(ItemState::Queued.as_status(), "pending");
        assert_eq!(ItemState::Downloading.as_status(), "downloading");
        assert_eq!(ItemState::Failed.as_status(), "error");
    }
}
