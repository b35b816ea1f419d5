//! Wires the Runner's callbacks to the Registry and Store, and assembles
//! the Scheduler and Intake Worker into one running service.

use crate::config::DlxConfig;
use crate::extractor::{
    ArtifactsCallback, Callbacks, ExtractorRunner, FilenameCallback, ProcessExtractorRunner,
    ProgressCallback,
};
use crate::intake::IntakeWorker;
use crate::registry::ItemRegistry;
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::store::DownloadStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct App {
    pub registry: Arc<ItemRegistry>,
    pub store: Arc<DownloadStore>,
    pub scheduler: Arc<Scheduler>,
    run_token: CancellationToken,
    intake_handle: tokio::task::JoinHandle<()>,
}

impl App {
    pub async fn start(config: &DlxConfig) -> Result<Self, crate::error::StoreError> {
        let store = Arc::new(DownloadStore::open_default().await?);
        let registry = Arc::new(ItemRegistry::new());

        // Background store writes from these callbacks need to be tracked
        // by the scheduler's shutdown wait group, but the scheduler can't be
        // built until the runner carrying these callbacks already exists.
        // `SchedulerHandle` breaks that cycle: bound to the real scheduler
        // right after it's constructed, below.
        let scheduler_handle = SchedulerHandle::new();

        let registry_for_progress = registry.clone();
        let store_for_progress = store.clone();
        let handle_for_progress = scheduler_handle.clone();
        let on_progress: ProgressCallback = Arc::new(move |id, pct| {
            let _ = registry_for_progress.set_progress(id, pct);
            if let Some(item) = registry_for_progress.get(id) {
                if let Some(db_id) = item.db_id {
                    let store = store_for_progress.clone();
                    handle_for_progress.spawn_background(async move {
                        let _ = store.update_progress(db_id, pct).await;
                    });
                }
            }
        });

        let registry_for_filename = registry.clone();
        let store_for_filename = store.clone();
        let handle_for_filename = scheduler_handle.clone();
        let on_filename: FilenameCallback = Arc::new(move |id, filename| {
            let _ = registry_for_filename.set_filename(id, filename.to_string());
            if let Some(item) = registry_for_filename.get(id) {
                if let Some(db_id) = item.db_id {
                    let store = store_for_filename.clone();
                    let filename = filename.to_string();
                    handle_for_filename.spawn_background(async move {
                        let _ = store.update_filename(db_id, &filename).await;
                    });
                }
            }
        });

        let registry_for_artifacts = registry.clone();
        let store_for_artifacts = store.clone();
        let handle_for_artifacts = scheduler_handle.clone();
        let on_artifacts: ArtifactsCallback = Arc::new(move |id, paths| {
            if let Some(item) = registry_for_artifacts.get(id) {
                if let Some(db_id) = item.db_id {
                    let store = store_for_artifacts.clone();
                    let paths = paths.to_vec();
                    handle_for_artifacts.spawn_background(async move {
                        let _ = store.update_artifacts(db_id, &paths).await;
                    });
                }
            }
        });

        let callbacks = Callbacks {
            on_progress,
            on_filename,
            on_artifacts,
        };

        let runner: Arc<dyn ExtractorRunner> = Arc::new(ProcessExtractorRunner::new(
            config.extractor_binary.clone(),
            config.out_dir.clone(),
            config.max_title_len,
            callbacks,
        ));

        let scheduler = Scheduler::new(
            registry.clone(),
            store.clone(),
            runner.clone(),
            config.queue_capacity,
            config.worker_count,
            Duration::from_secs(config.store_update_timeout_secs),
        );
        scheduler_handle.bind(&scheduler);

        let run_token = CancellationToken::new();
        let intake = IntakeWorker::new(
            store.clone(),
            scheduler.clone(),
            runner,
            Duration::from_secs(config.intake_poll_interval_secs),
            config.intake_batch_size,
            Duration::from_secs(config.metadata_fetch_timeout_secs),
        );
        let intake_token = run_token.clone();
        let intake_handle = tokio::spawn(async move { intake.run(intake_token).await });

        Ok(Self {
            registry,
            store,
            scheduler,
            run_token,
            intake_handle,
        })
    }

    pub async fn shutdown(self) {
        self.run_token.cancel();
        let _ = self.intake_handle.await;
        self.scheduler.stop_accepting();
        self.scheduler.shutdown().await;
    }
}
