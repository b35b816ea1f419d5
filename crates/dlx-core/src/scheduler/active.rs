//! Dual-indexed table of currently executing jobs: operators reference rows
//! by durable `db_id`, workers reference them by registry `id`.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct ActiveEntry {
    cancel: CancellationToken,
    db_id: Option<i64>,
}

#[derive(Default)]
struct ActiveInner {
    by_id: HashMap<String, ActiveEntry>,
    by_db_id: HashMap<i64, String>,
}

#[derive(Default)]
pub struct ActiveTable {
    inner: Mutex<ActiveInner>,
}

impl ActiveTable {
    pub fn register(&self, id: &str, db_id: Option<i64>, cancel: CancellationToken) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_id.insert(id.to_string(), ActiveEntry { cancel, db_id });
        if let Some(db_id) = db_id {
            inner.by_db_id.insert(db_id, id.to_string());
        }
    }

    pub fn unregister(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.by_id.remove(id) {
            if let Some(db_id) = entry.db_id {
                inner.by_db_id.remove(&db_id);
            }
        }
    }

    pub fn cancel_by_db_id(&self, db_id: i64) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(id) = inner.by_db_id.get(&db_id) else {
            return false;
        };
        match inner.by_id.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn id_for_db_id(&self, db_id: i64) -> Option<String> {
        self.inner.lock().unwrap().by_db_id.get(&db_id).cloned()
    }
}
