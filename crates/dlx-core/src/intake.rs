//! Periodically claims pending durable rows, fetches metadata through the
//! extractor, and hands claimed requests off to the scheduler.

use crate::extractor::ExtractorRunner;
use crate::item::ItemMeta;
use crate::scheduler::Scheduler;
use crate::store::DownloadStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct IntakeWorker {
    store: Arc<DownloadStore>,
    scheduler: Arc<Scheduler>,
    runner: Arc<dyn ExtractorRunner>,
    poll_interval: Duration,
    batch_size: i64,
    metadata_timeout: Duration,
}

impl IntakeWorker {
    pub fn new(
        store: Arc<DownloadStore>,
        scheduler: Arc<Scheduler>,
        runner: Arc<dyn ExtractorRunner>,
        poll_interval: Duration,
        batch_size: usize,
        metadata_timeout: Duration,
    ) -> Self {
        Self {
            store,
            scheduler,
            runner,
            poll_interval,
            batch_size: batch_size as i64,
            metadata_timeout,
        }
    }

    /// Resets up to 100 non-terminal, non-paused rows to `pending` so the
    /// poll loop reclaims whatever was in flight when the process last
    /// stopped.
    pub async fn retry_incomplete_downloads(&self) {
        match self.store.get_incomplete_downloads(100).await {
            Ok(rows) => {
                for row in rows {
                    if row.status != "pending" {
                        if let Err(e) = self.store.update_status(row.id, "pending", None).await {
                            tracing::warn!(db_id = row.id, error = %e, "failed to reset incomplete download");
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to list incomplete downloads on startup"),
        }
    }

    /// Runs until `run_token` is canceled, polling every `poll_interval`.
    ///
    /// Each claimed row is handed off to its own spawned task (tracked by
    /// the scheduler's background wait group) rather than processed
    /// in-line, so a slow metadata fetch for one row never blocks the rest
    /// of the batch from claiming and enqueuing.
    pub async fn run(&self, run_token: CancellationToken) {
        self.retry_incomplete_downloads().await;
        loop {
            tokio::select! {
                _ = run_token.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let rows = match self.store.get_pending_downloads_for_worker(self.batch_size).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to list pending downloads");
                    continue;
                }
            };

            for row in rows {
                let token = run_token.child_token();
                let store = self.store.clone();
                let scheduler = self.scheduler.clone();
                let runner = self.runner.clone();
                let metadata_timeout = self.metadata_timeout;
                self.scheduler.spawn_background(async move {
                    claim_fetch_and_enqueue(
                        &store,
                        &scheduler,
                        runner.as_ref(),
                        metadata_timeout,
                        row.id,
                        row.url,
                        token,
                    )
                    .await;
                });
            }
        }
    }

    #[cfg(test)]
    async fn process_pending(&self, db_id: i64, url: String, ctx: CancellationToken) {
        claim_fetch_and_enqueue(
            &self.store,
            &self.scheduler,
            self.runner.as_ref(),
            self.metadata_timeout,
            db_id,
            url,
            ctx,
        )
        .await;
    }
}

/// Claims a pending row, fetches its metadata within `metadata_timeout`, and
/// hands it to the scheduler. Free function (not a `&self` method) so a
/// caller can spawn it with owned clones of its dependencies.
async fn claim_fetch_and_enqueue(
    store: &DownloadStore,
    scheduler: &Scheduler,
    runner: &dyn ExtractorRunner,
    metadata_timeout: Duration,
    db_id: i64,
    url: String,
    ctx: CancellationToken,
) {
    match store.try_claim_pending(db_id).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            tracing::warn!(db_id, error = %e, "failed to claim pending download");
            return;
        }
    }

    let meta = match tokio::time::timeout(metadata_timeout, runner.fetch_metadata(ctx, &url)).await
    {
        Ok(Ok(meta)) => meta,
        Ok(Err(e)) => {
            let msg = format!("metadata_fetch_failed: {e}");
            let _ = store.update_status(db_id, "error", Some(&msg)).await;
            scheduler.discard_pending_intent(db_id);
            return;
        }
        Err(_) => {
            let _ = store
                .update_status(db_id, "error", Some("metadata_fetch_failed: timed out"))
                .await;
            scheduler.discard_pending_intent(db_id);
            return;
        }
    };

    let _ = store
        .update_meta(
            db_id,
            meta.title.as_deref(),
            meta.duration_seconds.map(|d| d as i64),
            meta.thumbnail_url.as_deref(),
        )
        .await;

    match scheduler.enqueue(&url) {
        Ok(id) => {
            scheduler.attach_db(&id, db_id);
            scheduler.set_meta(&id, ItemMeta { ..meta });
        }
        Err(e) => {
            let msg = format!("enqueue_failed: {e}");
            let _ = store.update_status(db_id, "error", Some(&msg)).await;
            scheduler.discard_pending_intent(db_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractorError;
    use crate::registry::ItemRegistry;
    use async_trait::async_trait;

    struct StubRunner;

    #[async_trait]
    impl ExtractorRunner for StubRunner {
        async fn download(
            &self,
            _ctx: CancellationToken,
            _id: &str,
            _url: &str,
        ) -> Result<(), ExtractorError> {
            Ok(())
        }

        async fn fetch_metadata(
            &self,
            _ctx: CancellationToken,
            _url: &str,
        ) -> Result<ItemMeta, ExtractorError> {
            Ok(ItemMeta {
                title: Some("A Title".to_string()),
                duration_seconds: Some(42),
                thumbnail_url: None,
            })
        }
    }

    async fn setup() -> (IntakeWorker, Arc<DownloadStore>, Arc<Scheduler>) {
        let store = Arc::new(DownloadStore::open_memory().await.unwrap());
        let registry = Arc::new(ItemRegistry::new());
        let scheduler = Scheduler::new(
            registry,
            store.clone(),
            Arc::new(StubRunner),
            8,
            1,
            Duration::from_millis(200),
        );
        let worker = IntakeWorker::new(
            store.clone(),
            scheduler.clone(),
            Arc::new(StubRunner),
            Duration::from_millis(10),
            10,
            Duration::from_secs(1),
        );
        (worker, store, scheduler)
    }

    #[tokio::test]
    async fn claims_fetches_metadata_and_enqueues() {
        let (worker, store, scheduler) = setup().await;
        let db_id = store
            .create_download("https://example.com/a", None, None, None, "pending", 0.0)
            .await
            .unwrap();

        worker
            .process_pending(db_id, "https://example.com/a".to_string(), CancellationToken::new())
            .await;

        let record = store.get_download_by_id(db_id).await.unwrap().unwrap();
        assert_eq!(record.title.as_deref(), Some("A Title"));

        let mut found = false;
        for item in scheduler.snapshot(None) {
            if item.db_id == Some(db_id) {
                found = true;
                assert_eq!(item.meta.title.as_deref(), Some("A Title"));
            }
        }
        assert!(found);
    }

    #[tokio::test]
    async fn double_claim_is_silent_noop() {
        let (worker, store, _scheduler) = setup().await;
        let db_id = store
            .create_download("https://example.com/a", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        worker
            .process_pending(db_id, "https://example.com/a".to_string(), CancellationToken::new())
            .await;
        let before = store.get_download_by_id(db_id).await.unwrap().unwrap();
        worker
            .process_pending(db_id, "https://example.com/a".to_string(), CancellationToken::new())
            .await;
        let after = store.get_download_by_id(db_id).await.unwrap().unwrap();
        assert_eq!(before.status, after.status);
    }

    #[tokio::test]
    async fn retry_incomplete_resets_downloading_rows_to_pending() {
        let (worker, store, _scheduler) = setup().await;
        let db_id = store
            .create_download("https://example.com/a", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        store.try_claim_pending(db_id).await.unwrap();
        assert_eq!(
            store.get_download_by_id(db_id).await.unwrap().unwrap().status,
            "downloading"
        );

        worker.retry_incomplete_downloads().await;
        assert_eq!(
            store.get_download_by_id(db_id).await.unwrap().unwrap().status,
            "pending"
        );
    }

    struct DelayedRunner {
        delay: Duration,
    }

    #[async_trait]
    impl ExtractorRunner for DelayedRunner {
        async fn download(
            &self,
            _ctx: CancellationToken,
            _id: &str,
            _url: &str,
        ) -> Result<(), ExtractorError> {
            Ok(())
        }

        async fn fetch_metadata(
            &self,
            _ctx: CancellationToken,
            url: &str,
        ) -> Result<ItemMeta, ExtractorError> {
            if url.contains("slow") {
                tokio::time::sleep(self.delay).await;
            }
            Ok(ItemMeta {
                title: Some("fetched".to_string()),
                duration_seconds: None,
                thumbnail_url: None,
            })
        }
    }

    #[tokio::test]
    async fn rows_in_a_batch_are_claimed_concurrently() {
        let store = Arc::new(DownloadStore::open_memory().await.unwrap());
        let registry = Arc::new(ItemRegistry::new());
        let runner = Arc::new(DelayedRunner {
            delay: Duration::from_millis(300),
        });
        let scheduler = Scheduler::new(
            registry,
            store.clone(),
            runner.clone(),
            8,
            1,
            Duration::from_millis(200),
        );
        let worker = IntakeWorker::new(
            store.clone(),
            scheduler.clone(),
            runner,
            Duration::from_millis(10),
            10,
            Duration::from_secs(5),
        );

        let slow_id = store
            .create_download("https://example.com/slow", None, None, None, "pending", 0.0)
            .await
            .unwrap();
        let fast_id = store
            .create_download("https://example.com/fast", None, None, None, "pending", 0.0)
            .await
            .unwrap();

        let token = CancellationToken::new();
        let run_token = token.clone();
        let handle = tokio::spawn(async move { worker.run(run_token).await });

        // One poll tick claims both rows and spawns them independently; the
        // fast one should finish its metadata fetch long before the slow
        // one's 300ms delay elapses.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let fast_record = store.get_download_by_id(fast_id).await.unwrap().unwrap();
        assert_eq!(fast_record.title.as_deref(), Some("fetched"));

        let slow_record = store.get_download_by_id(slow_id).await.unwrap().unwrap();
        assert_eq!(slow_record.status, "downloading");
        assert!(slow_record.title.is_none());

        token.cancel();
        handle.abort();
    }
}
