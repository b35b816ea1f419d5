//! In-memory, thread-safe map from request id to [`Item`].
//!
//! Pure state container: no knowledge of the scheduler or the store. Reads
//! take a read lock and copy; writes take the write lock and bump `updated_at`.

use crate::item::{now_secs, Item, ItemMeta, ItemState};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("item {0} already exists")]
    Conflict(String),
    #[error("item {0} not found")]
    NotFound(String),
}

#[derive(Default)]
pub struct ItemRegistry {
    items: RwLock<HashMap<String, Item>>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, id: &str, url: &str) -> Result<Item, RegistryError> {
        let mut items = self.items.write().unwrap();
        if items.contains_key(id) {
            return Err(RegistryError::Conflict(id.to_string()));
        }
        let item = Item::new(id.to_string(), url.to_string());
        items.insert(id.to_string(), item.clone());
        Ok(item)
    }

    pub fn get(&self, id: &str) -> Option<Item> {
        self.items.read().unwrap().get(id).cloned()
    }

    /// Returns a snapshot of all items, or of just `id` when given.
    pub fn snapshot(&self, id: Option<&str>) -> Vec<Item> {
        let items = self.items.read().unwrap();
        match id {
            Some(id) => items.get(id).cloned().into_iter().collect(),
            None => items.values().cloned().collect(),
        }
    }

    fn update<F>(&self, id: &str, f: F) -> Result<Item, RegistryError>
    where
        F: FnOnce(&mut Item),
    {
        let mut items = self.items.write().unwrap();
        let item = items
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        f(item);
        item.updated_at = now_secs();
        Ok(item.clone())
    }

    /// Sets progress to `max(prev, p)`; returns `(prev, new)`.
    pub fn set_progress(&self, id: &str, p: f64) -> Result<(f64, f64), RegistryError> {
        let clamped = p.clamp(0.0, 100.0);
        let mut prev = 0.0;
        let item = self.update(id, |item| {
            prev = item.progress;
            item.progress = item.progress.max(clamped);
        })?;
        Ok((prev, item.progress))
    }

    pub fn set_state(
        &self,
        id: &str,
        state: ItemState,
        error: Option<String>,
    ) -> Result<Item, RegistryError> {
        self.update(id, |item| {
            item.state = state;
            item.error = error;
        })
    }

    pub fn set_meta(&self, id: &str, meta: ItemMeta) -> Result<Item, RegistryError> {
        self.update(id, |item| {
            if meta.title.is_some() {
                item.meta.title = meta.title;
            }
            if meta.duration_seconds.is_some() {
                item.meta.duration_seconds = meta.duration_seconds;
            }
            if meta.thumbnail_url.is_some() {
                item.meta.thumbnail_url = meta.thumbnail_url;
            }
        })
    }

    pub fn set_filename(&self, id: &str, filename: String) -> Result<Item, RegistryError> {
        self.update(id, |item| item.filename = Some(filename))
    }

    pub fn attach(&self, id: &str, db_id: i64) -> Result<Item, RegistryError> {
        self.update(id, |item| item.db_id = Some(db_id))
    }

    pub fn set_queue_token(&self, id: &str, token: u64) -> Result<Item, RegistryError> {
        self.update(id, |item| item.queue_token = token)
    }

    pub fn delete(&self, id: &str) -> Option<Item> {
        self.items.write().unwrap().remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get() {
        let reg = ItemRegistry::new();
        let item = reg.create("a", "https://example.com").unwrap();
        assert_eq!(item.state, ItemState::Queued);
        assert_eq!(reg.get("a").unwrap().url, "https://example.com");
    }

    #[test]
    fn create_conflict() {
        let reg = ItemRegistry::new();
        reg.create("a", "u").unwrap();
        assert!(matches!(
            reg.create("a", "u2"),
            Err(RegistryError::Conflict(_))
        ));
    }

    #[test]
    fn progress_never_decreases() {
        let reg = ItemRegistry::new();
        reg.create("a", "u").unwrap();
        let (prev, new) = reg.set_progress("a", 50.0).unwrap();
        assert_eq!((prev, new), (0.0, 50.0));
        let (prev, new) = reg.set_progress("a", 20.0).unwrap();
        assert_eq!((prev, new), (50.0, 50.0));
        let (prev, new) = reg.set_progress("a", 75.0).unwrap();
        assert_eq!((prev, new), (50.0, 75.0));
    }

    #[test]
    fn snapshot_single_and_all() {
        let reg = ItemRegistry::new();
        reg.create("a", "u1").unwrap();
        reg.create("b", "u2").unwrap();
        assert_eq!(reg.snapshot(None).len(), 2);
        assert_eq!(reg.snapshot(Some("a")).len(), 1);
        assert_eq!(reg.snapshot(Some("missing")).len(), 0);
    }

    #[test]
    fn not_found_on_missing_update() {
        let reg = ItemRegistry::new();
        assert!(matches!(
            reg.set_state("missing", ItemState::Completed, None),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn delete_removes_entry() {
        let reg = ItemRegistry::new();
        reg.create("a", "u").unwrap();
        assert!(reg.delete("a").is_some());
        assert!(reg.get("a").is_none());
    }
}
