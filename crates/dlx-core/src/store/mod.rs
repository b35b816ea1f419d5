//! The durable record store: a SQLite-backed implementation of the narrow
//! contract the scheduler and intake worker use to persist lifecycle facts,
//! plus the change notifier that publishes mutations to subscribers.

mod notifier;
mod sqlite;

pub use notifier::{ChangeEvent, ChangeReceiver, Unsubscribe};
pub use sqlite::{normalize_status, DownloadRecord, DownloadStore};
