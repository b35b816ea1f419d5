//! The worker loop: dequeues jobs, invokes the extractor runner, and
//! reconciles the result with any operator-recorded stop intent.

use super::stop_intent::StopIntent;
use super::Scheduler;
use crate::error::truncate_error_message;
use crate::item::ItemState;
use std::sync::Arc;
use std::time::Duration;

const MAX_ERROR_BYTES: usize = 512;

pub(super) async fn run_worker(scheduler: Arc<Scheduler>) {
    loop {
        let job = {
            let mut rx = scheduler.jobs_rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };
        handle_job(&scheduler, job).await;
    }
}

async fn handle_job(scheduler: &Arc<Scheduler>, job: super::queue::Job) {
    let Some(item) = scheduler.registry.get(&job.id) else {
        return;
    };
    if item.queue_token != job.token {
        tracing::debug!(id = %job.id, "discarding stale queued job");
        return;
    }

    if let Some(intent) = scheduler.stop_intents.take(&job.id) {
        apply_terminal(scheduler, &job.id, intent).await;
        return;
    }

    let _ = scheduler
        .registry
        .set_state(&job.id, ItemState::Downloading, None);

    let cancel = scheduler.run_token.child_token();
    scheduler.active.register(&job.id, item.db_id, cancel.clone());

    let result = scheduler.runner.download(cancel, &job.id, &job.url).await;

    if let Some(intent) = scheduler.stop_intents.take(&job.id) {
        match result {
            Ok(()) => finish_success(scheduler, &job.id).await,
            Err(_) => apply_terminal(scheduler, &job.id, intent).await,
        }
    } else {
        match result {
            Ok(()) => finish_success(scheduler, &job.id).await,
            Err(e) => finish_failure(scheduler, &job.id, &e.to_string()).await,
        }
    }

    scheduler.active.unregister(&job.id);
}

async fn finish_success(scheduler: &Arc<Scheduler>, id: &str) {
    let _ = scheduler.registry.set_progress(id, 100.0);
    let _ = scheduler.registry.set_state(id, ItemState::Completed, None);

    let Some(db_id) = scheduler.registry.get(id).and_then(|i| i.db_id) else {
        return;
    };
    let store = scheduler.store.clone();
    let timeout = scheduler.store_update_timeout;
    scheduler
        .spawn_background(async move {
            let res = tokio::time::timeout(timeout, async {
                store.update_progress(db_id, 100.0).await?;
                store.update_status(db_id, "completed", None).await
            })
            .await;
            log_store_result(res);
        });
}

async fn finish_failure(scheduler: &Arc<Scheduler>, id: &str, raw_error: &str) {
    let msg = truncate_error_message(raw_error, MAX_ERROR_BYTES);
    let _ = scheduler.registry.set_state(id, ItemState::Failed, Some(msg.clone()));

    let Some(db_id) = scheduler.registry.get(id).and_then(|i| i.db_id) else {
        return;
    };
    let store = scheduler.store.clone();
    let timeout = scheduler.store_update_timeout;
    scheduler
        .spawn_background(async move {
            let res = tokio::time::timeout(timeout, store.update_status(db_id, "error", Some(&msg)))
                .await;
            log_store_result(res);
        });
}

async fn apply_terminal(scheduler: &Arc<Scheduler>, id: &str, intent: StopIntent) {
    let (state, status) = match intent {
        StopIntent::Paused => (ItemState::Paused, "paused"),
        StopIntent::Canceled => (ItemState::Canceled, "canceled"),
    };
    let _ = scheduler.registry.set_state(id, state, None);

    let Some(db_id) = scheduler.registry.get(id).and_then(|i| i.db_id) else {
        return;
    };
    let store = scheduler.store.clone();
    let timeout = scheduler.store_update_timeout;
    scheduler
        .spawn_background(async move {
            let res = tokio::time::timeout(timeout, store.update_status(db_id, status, None)).await;
            log_store_result(res);
        });
}

/// Store errors that are expected during shutdown (closed pool, deadline,
/// cancellation) are suppressed from error-level logs.
fn log_store_result(
    res: Result<Result<(), crate::error::StoreError>, tokio::time::error::Elapsed>,
) {
    match res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "background store update failed"),
        Err(_) => tracing::debug!("background store update timed out"),
    }
}

#[allow(dead_code)]
pub(super) const fn default_store_update_timeout() -> Duration {
    Duration::from_secs(5)
}
