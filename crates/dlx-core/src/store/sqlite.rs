//! SQLite-backed implementation of the record-store interface, mirroring the
//! pool-open / migrate pattern used for the job database elsewhere in this
//! codebase, applied to a `downloads.db` file.

use super::notifier::{ChangeEvent, ChangeReceiver, Notifier, Unsubscribe};
use crate::error::StoreError;
use serde::Serialize;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRecord {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration: Option<i64>,
    pub status: String,
    pub progress: f64,
    pub filename: Option<String>,
    pub error_message: Option<String>,
    pub artifact_paths: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `queued -> pending`, `failed -> error`, unknown/blank -> `pending`, case-
/// and whitespace-insensitive.
pub fn normalize_status(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "queued" => "pending".to_string(),
        "failed" => "error".to_string(),
        s @ ("pending" | "downloading" | "completed" | "error" | "paused" | "canceled") => {
            s.to_string()
        }
        _ => "pending".to_string(),
    }
}

fn row_to_record(row: SqliteRow) -> Result<DownloadRecord, StoreError> {
    let artifact_json: String = row.try_get("artifact_paths")?;
    let artifact_paths: Vec<String> = serde_json::from_str(&artifact_json).unwrap_or_default();
    Ok(DownloadRecord {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        duration: row.try_get("duration")?,
        status: row.try_get("status")?,
        progress: row.try_get("progress")?,
        filename: row.try_get("filename")?,
        error_message: row.try_get("error_message")?,
        artifact_paths,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub struct DownloadStore {
    pool: SqlitePool,
    notifier: Arc<Notifier>,
}

impl DownloadStore {
    /// Opens (creating if absent) the store at the XDG state path
    /// `~/.local/state/dlx/downloads.db`.
    pub async fn open_default() -> Result<Self, StoreError> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("dlx")
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        let state_dir = xdg_dirs.get_state_home().join("dlx");
        std::fs::create_dir_all(&state_dir)?;
        let db_path = state_dir.join("downloads.db");
        Self::open(&format!("sqlite://{}?mode=rwc", db_path.display())).await
    }

    pub async fn open_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(if url == "sqlite::memory:" { 1 } else { 8 })
            .connect(url)
            .await?;
        let store = Self {
            pool,
            notifier: Notifier::new(),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                title TEXT,
                thumbnail_url TEXT,
                duration INTEGER,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                filename TEXT,
                error_message TEXT,
                artifact_paths TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_created_at ON downloads(created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_url_status ON downloads(url, status)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn subscribe_changes(&self, buffer: usize) -> (ChangeReceiver, Unsubscribe) {
        self.notifier.subscribe(buffer)
    }

    async fn fetch_by_id(&self, id: i64) -> Result<Option<DownloadRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_record).transpose()
    }

    async fn emit_upsert(&self, id: i64) -> Result<(), StoreError> {
        if let Some(record) = self.fetch_by_id(id).await? {
            self.notifier.emit(ChangeEvent::Upsert(Box::new(record)));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_download(
        &self,
        url: &str,
        title: Option<&str>,
        duration: Option<i64>,
        thumbnail_url: Option<&str>,
        status: &str,
        progress: f64,
    ) -> Result<i64, StoreError> {
        if url.trim().is_empty() {
            return Err(StoreError::EmptyUrl);
        }
        let now = now_ts();
        let status = normalize_status(status);
        let result = sqlx::query(
            "INSERT INTO downloads (url, title, thumbnail_url, duration, status, progress, artifact_paths, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, '[]', ?, ?)",
        )
        .bind(url)
        .bind(title)
        .bind(thumbnail_url)
        .bind(duration)
        .bind(&status)
        .bind(progress)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.emit_upsert(id).await?;
        Ok(id)
    }

    pub async fn update_progress(&self, id: i64, progress: f64) -> Result<(), StoreError> {
        sqlx::query("UPDATE downloads SET progress = ?, updated_at = ? WHERE id = ?")
            .bind(progress)
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.emit_upsert(id).await
    }

    pub async fn update_status(
        &self,
        id: i64,
        status: &str,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let status = normalize_status(status);
        let error_message = if status == "error" { error_message } else { None };
        sqlx::query("UPDATE downloads SET status = ?, error_message = ?, updated_at = ? WHERE id = ?")
            .bind(&status)
            .bind(error_message)
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.emit_upsert(id).await
    }

    pub async fn update_meta(
        &self,
        id: i64,
        title: Option<&str>,
        duration: Option<i64>,
        thumbnail_url: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            sqlx::query("UPDATE downloads SET title = ?, updated_at = ? WHERE id = ?")
                .bind(title)
                .bind(now_ts())
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(duration) = duration {
            sqlx::query("UPDATE downloads SET duration = ?, updated_at = ? WHERE id = ?")
                .bind(duration)
                .bind(now_ts())
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(thumb) = thumbnail_url.filter(|t| !t.is_empty()) {
            sqlx::query("UPDATE downloads SET thumbnail_url = ?, updated_at = ? WHERE id = ?")
                .bind(thumb)
                .bind(now_ts())
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        self.emit_upsert(id).await
    }

    pub async fn update_filename(&self, id: i64, filename: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE downloads SET filename = ?, updated_at = ? WHERE id = ?")
            .bind(filename)
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.emit_upsert(id).await
    }

    pub async fn update_artifacts(&self, id: i64, paths: &[String]) -> Result<(), StoreError> {
        let mut deduped = Vec::with_capacity(paths.len());
        for p in paths {
            if !deduped.contains(p) {
                deduped.push(p.clone());
            }
        }
        let encoded = serde_json::to_string(&deduped)?;
        sqlx::query("UPDATE downloads SET artifact_paths = ?, updated_at = ? WHERE id = ?")
            .bind(encoded)
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.emit_upsert(id).await
    }

    pub async fn get_download_by_id(&self, id: i64) -> Result<Option<DownloadRecord>, StoreError> {
        self.fetch_by_id(id).await
    }

    pub async fn list_downloads(&self) -> Result<Vec<DownloadRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM downloads ORDER BY id DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn get_latest_download_by_url(
        &self,
        url: &str,
    ) -> Result<Option<DownloadRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM downloads WHERE url = ? ORDER BY created_at DESC LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_record).transpose()
    }

    pub async fn is_url_completed(&self, url: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM downloads WHERE url = ? AND status = 'completed'",
        )
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    /// Atomic conditional update from `pending` to `downloading`. Idempotency
    /// key for the intake worker.
    pub async fn try_claim_pending(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE downloads SET status = 'downloading', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?;
        let claimed = result.rows_affected() > 0;
        if claimed {
            self.emit_upsert(id).await?;
        }
        Ok(claimed)
    }

    pub async fn try_pause(&self, id: i64) -> Result<bool, StoreError> {
        self.try_transition(id, &["pending", "downloading"], "paused").await
    }

    pub async fn try_cancel(&self, id: i64) -> Result<bool, StoreError> {
        self.try_transition(id, &["pending", "downloading", "paused"], "canceled")
            .await
    }

    pub async fn try_cancel_not_downloading(&self, id: i64) -> Result<bool, StoreError> {
        self.try_transition(id, &["pending", "paused"], "canceled").await
    }

    async fn try_transition(
        &self,
        id: i64,
        from_any_of: &[&str],
        to: &str,
    ) -> Result<bool, StoreError> {
        let placeholders = from_any_of.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE downloads SET status = ?, updated_at = ? WHERE id = ? AND status IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(to).bind(now_ts()).bind(id);
        for s in from_any_of {
            query = query.bind(*s);
        }
        let result = query.execute(&self.pool).await?;
        let changed = result.rows_affected() > 0;
        if changed {
            self.emit_upsert(id).await?;
        }
        Ok(changed)
    }

    pub async fn get_pending_downloads_for_worker(
        &self,
        limit: i64,
    ) -> Result<Vec<DownloadRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM downloads WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn get_incomplete_downloads(
        &self,
        limit: i64,
    ) -> Result<Vec<DownloadRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM downloads WHERE status NOT IN ('completed', 'paused', 'canceled') ORDER BY created_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn delete_download(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.notifier.emit(ChangeEvent::Delete(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_roundtrip() {
        let store = DownloadStore::open_memory().await.unwrap();
        let id = store
            .create_download("https://example.com/a", Some("Title"), Some(10), None, "pending", 0.0)
            .await
            .unwrap();
        let record = store.get_download_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.url, "https://example.com/a");
        assert_eq!(record.status, "pending");
        assert_eq!(record.title.as_deref(), Some("Title"));
    }

    #[tokio::test]
    async fn create_rejects_empty_url() {
        let store = DownloadStore::open_memory().await.unwrap();
        let err = store
            .create_download("", None, None, None, "pending", 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyUrl));
    }

    #[tokio::test]
    async fn try_claim_pending_is_idempotent() {
        let store = DownloadStore::open_memory().await.unwrap();
        let id = store
            .create_download("https://example.com/a", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        assert!(store.try_claim_pending(id).await.unwrap());
        assert!(!store.try_claim_pending(id).await.unwrap());
        let record = store.get_download_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.status, "downloading");
    }

    #[tokio::test]
    async fn update_artifacts_dedupes_preserving_order() {
        let store = DownloadStore::open_memory().await.unwrap();
        let id = store
            .create_download("https://example.com/a", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        store
            .update_artifacts(id, &["b".to_string(), "a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let record = store.get_download_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.artifact_paths, vec!["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn normalize_status_mapping() {
        assert_eq!(normalize_status("Queued"), "pending");
        assert_eq!(normalize_status(" FAILED "), "error");
        assert_eq!(normalize_status(""), "pending");
        assert_eq!(normalize_status("bogus"), "pending");
        assert_eq!(normalize_status("downloading"), "downloading");
    }

    #[tokio::test]
    async fn update_status_clears_error_message_on_non_error() {
        let store = DownloadStore::open_memory().await.unwrap();
        let id = store
            .create_download("https://example.com/a", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        store
            .update_status(id, "error", Some("boom"))
            .await
            .unwrap();
        store.update_status(id, "pending", None).await.unwrap();
        let record = store.get_download_by_id(id).await.unwrap().unwrap();
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn get_incomplete_excludes_paused_and_canceled() {
        let store = DownloadStore::open_memory().await.unwrap();
        let a = store
            .create_download("https://example.com/a", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        let b = store
            .create_download("https://example.com/b", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        store.try_pause(b).await.unwrap();
        let incomplete = store.get_incomplete_downloads(10).await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, a);
    }

    #[tokio::test]
    async fn list_downloads_orders_newest_first() {
        let store = DownloadStore::open_memory().await.unwrap();
        let a = store
            .create_download("https://example.com/a", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        let b = store
            .create_download("https://example.com/b", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        let listed = store.list_downloads().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b);
        assert_eq!(listed[1].id, a);
    }

    #[tokio::test]
    async fn subscribers_see_upsert_and_delete_events() {
        let store = DownloadStore::open_memory().await.unwrap();
        let (mut rx, _unsub) = store.subscribe_changes(8);
        let id = store
            .create_download("https://example.com/a", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        match rx.recv().await {
            Some(ChangeEvent::Upsert(record)) => assert_eq!(record.id, id),
            other => panic!("unexpected event: {other:?}"),
        }
        store.delete_download(id).await.unwrap();
        match rx.recv().await {
            Some(ChangeEvent::Delete(deleted_id)) => assert_eq!(deleted_id, id),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
