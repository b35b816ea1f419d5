//! Operator-recorded desired terminal states for items that are queued or
//! executing, decoupling control signals from worker observation.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopIntent {
    Paused,
    Canceled,
}

#[derive(Default)]
pub struct StopIntents {
    inner: Mutex<HashMap<String, StopIntent>>,
}

impl StopIntents {
    pub fn set(&self, id: &str, intent: StopIntent) {
        self.inner.lock().unwrap().insert(id.to_string(), intent);
    }

    /// Removes and returns the intent for `id`, if any. Completion always
    /// clears the intent so a later observer never re-applies it.
    pub fn take(&self, id: &str) -> Option<StopIntent> {
        self.inner.lock().unwrap().remove(id)
    }
}

/// Stop intents recorded against a durable `db_id` before the intake worker
/// has created (or attached) a registry item for it. Consumed by
/// `Scheduler::attach_db` the moment the item exists, so a pause/cancel
/// requested while a row is claimed but still mid metadata-fetch or queued
/// isn't lost.
#[derive(Default)]
pub struct PendingDbIntents {
    inner: Mutex<HashMap<i64, StopIntent>>,
}

impl PendingDbIntents {
    pub fn set(&self, db_id: i64, intent: StopIntent) {
        self.inner.lock().unwrap().insert(db_id, intent);
    }

    pub fn take(&self, db_id: i64) -> Option<StopIntent> {
        self.inner.lock().unwrap().remove(&db_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_take_clears_entry() {
        let intents = StopIntents::default();
        intents.set("a", StopIntent::Paused);
        assert_eq!(intents.take("a"), Some(StopIntent::Paused));
        assert_eq!(intents.take("a"), None);
    }
}
