//! The scheduler: bounded job queue, worker pool, active-job table,
//! stop-intent table, and graceful shutdown. The heart of the engine.

mod active;
mod queue;
mod stop_intent;
mod worker;

use crate::extractor::ExtractorRunner;
use crate::error::SchedulerError;
use crate::item::{Item, ItemMeta, ItemState};
use crate::registry::ItemRegistry;
use crate::store::DownloadStore;
use active::ActiveTable;
use queue::Job;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use stop_intent::{PendingDbIntents, StopIntent, StopIntents};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

pub struct Scheduler {
    registry: Arc<ItemRegistry>,
    store: Arc<DownloadStore>,
    runner: Arc<dyn ExtractorRunner>,
    jobs_tx: Mutex<Option<mpsc::Sender<Job>>>,
    jobs_rx: TokioMutex<mpsc::Receiver<Job>>,
    active: ActiveTable,
    stop_intents: StopIntents,
    pending_db_intents: PendingDbIntents,
    run_token: CancellationToken,
    closing: AtomicBool,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    background_tasks: Mutex<JoinSet<()>>,
    store_update_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        registry: Arc<ItemRegistry>,
        store: Arc<DownloadStore>,
        runner: Arc<dyn ExtractorRunner>,
        queue_capacity: usize,
        worker_count: usize,
        store_update_timeout: Duration,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let scheduler = Arc::new(Self {
            registry,
            store,
            runner,
            jobs_tx: Mutex::new(Some(tx)),
            jobs_rx: TokioMutex::new(rx),
            active: ActiveTable::default(),
            stop_intents: StopIntents::default(),
            pending_db_intents: PendingDbIntents::default(),
            run_token: CancellationToken::new(),
            closing: AtomicBool::new(false),
            worker_handles: Mutex::new(Vec::new()),
            background_tasks: Mutex::new(JoinSet::new()),
            store_update_timeout,
        });

        let mut handles = Vec::new();
        for _ in 0..worker_count {
            let s = scheduler.clone();
            handles.push(tokio::spawn(async move { worker::run_worker(s).await }));
        }
        *scheduler.worker_handles.lock().unwrap() = handles;

        scheduler
    }

    /// Tracks `fut` in the background wait group drained by `shutdown`.
    /// Synchronous so it can be called directly from the Runner's callback
    /// closures, which have no `.await` point of their own.
    pub(crate) fn spawn_background<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.background_tasks.lock().unwrap().spawn(fut);
    }

    /// Places a job on the bounded queue. All-or-nothing: on a full queue the
    /// just-created registry entry is removed, leaving no leaked item.
    pub fn enqueue(&self, url: &str) -> Result<String, SchedulerError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(SchedulerError::ShuttingDown);
        }

        let mut id = crate::item::new_id();
        while self.registry.create(&id, url).is_err() {
            id = crate::item::new_id();
        }

        let tx_guard = self.jobs_tx.lock().unwrap();
        let Some(tx) = tx_guard.as_ref() else {
            drop(tx_guard);
            self.registry.delete(&id);
            return Err(SchedulerError::ShuttingDown);
        };

        match tx.try_send(Job {
            id: id.clone(),
            url: url.to_string(),
            token: 1,
        }) {
            Ok(()) => Ok(id),
            Err(_) => {
                drop(tx_guard);
                self.registry.delete(&id);
                Err(SchedulerError::QueueFull)
            }
        }
    }

    pub fn snapshot(&self, id: Option<&str>) -> Vec<Item> {
        self.registry.snapshot(id)
    }

    /// Attaches `db_id` to `id` and, if a pause/cancel arrived for `db_id`
    /// while the item was still being claimed or had its metadata fetched
    /// (i.e. before it existed in the registry), applies it now so the
    /// request is never silently dropped.
    pub fn attach_db(&self, id: &str, db_id: i64) {
        let _ = self.registry.attach(id, db_id);
        if let Some(intent) = self.pending_db_intents.take(db_id) {
            self.stop_intents.set(id, intent);
        }
    }

    /// Drops any pause/cancel recorded against `db_id` before a registry
    /// item existed for it. Called when intake gives up on a row (metadata
    /// fetch failure, enqueue failure) so the intent doesn't linger forever.
    pub fn discard_pending_intent(&self, db_id: i64) {
        self.pending_db_intents.take(db_id);
    }

    pub fn set_meta(&self, id: &str, meta: ItemMeta) {
        let _ = self.registry.set_meta(id, meta);
    }

    fn find_id_by_db_id(&self, db_id: i64) -> Option<String> {
        self.registry
            .snapshot(None)
            .into_iter()
            .find(|item| item.db_id == Some(db_id))
            .map(|item| item.id)
    }

    /// Drains the channel nondestructively, drops jobs matching `id`, and
    /// re-sends the survivors. A no-op (not a panic) once the channel is
    /// closed.
    async fn drop_queued_jobs_by_id(&self, id: &str) {
        let mut drained = Vec::new();
        {
            let mut rx = self.jobs_rx.lock().await;
            while let Ok(job) = rx.try_recv() {
                drained.push(job);
            }
        }
        let tx_guard = self.jobs_tx.lock().unwrap();
        if let Some(tx) = tx_guard.as_ref() {
            for job in drained {
                if job.id != id {
                    let _ = tx.try_send(job);
                }
            }
        }
    }

    pub async fn pause_by_db_id(&self, db_id: i64) -> bool {
        self.request_stop(db_id, StopIntent::Paused).await
    }

    pub async fn cancel_by_db_id(&self, db_id: i64) -> bool {
        self.request_stop(db_id, StopIntent::Canceled).await
    }

    /// Records `intent` against `db_id`, wherever the item currently lives:
    ///
    /// - Already executing (active-table entry exists): cancel its token and
    ///   record the intent so the worker applies it once the runner returns.
    /// - Queued in the registry but not yet picked up by a worker: record
    ///   the intent so `handle_job` applies it before the runner ever runs,
    ///   and opportunistically finalize immediately if the durable row
    ///   hadn't been claimed by intake yet.
    /// - Not yet in the registry at all (still being claimed or having its
    ///   metadata fetched by intake): record the intent by `db_id` so
    ///   `attach_db` applies it the moment the item is created.
    ///
    /// In every branch the request is accepted (and eventually honored),
    /// never silently dropped because of a claimed-but-not-yet-active
    /// window in the durable store.
    async fn request_stop(&self, db_id: i64, intent: StopIntent) -> bool {
        if let Some(id) = self.active.id_for_db_id(db_id) {
            self.stop_intents.set(&id, intent);
            return self.active.cancel_by_db_id(db_id);
        }

        if let Some(id) = self.find_id_by_db_id(db_id) {
            let Some(item) = self.registry.get(&id) else {
                return false;
            };
            if item.state != ItemState::Queued {
                return false;
            }

            self.stop_intents.set(&id, intent);
            let unclaimed = match intent {
                StopIntent::Paused => self.store.try_pause(db_id).await,
                StopIntent::Canceled => self.store.try_cancel_not_downloading(db_id).await,
            };
            if matches!(unclaimed, Ok(true)) {
                // Durable row was still pending/paused: finalize right away
                // instead of waiting for a worker to dequeue it.
                self.stop_intents.take(&id);
                self.drop_queued_jobs_by_id(&id).await;
                let state = match intent {
                    StopIntent::Paused => ItemState::Paused,
                    StopIntent::Canceled => ItemState::Canceled,
                };
                let _ = self.registry.set_state(&id, state, None);
            }
            return true;
        }

        self.pending_db_intents.set(db_id, intent);
        true
    }

    /// Bumps the queue token and re-enqueues. Rolls back to the prior state
    /// on a full queue. Completed items are never resumed.
    pub fn resume_by_db_id(&self, db_id: i64) -> Result<bool, SchedulerError> {
        let Some(id) = self.find_id_by_db_id(db_id) else {
            return Ok(false);
        };
        let Some(item) = self.registry.get(&id) else {
            return Ok(false);
        };
        if !matches!(item.state, ItemState::Paused | ItemState::Canceled) {
            return Ok(false);
        }

        let prior_state = item.state;
        let new_token = item.queue_token + 1;
        let _ = self.registry.set_queue_token(&id, new_token);
        let _ = self.registry.set_state(&id, ItemState::Queued, None);

        let tx_guard = self.jobs_tx.lock().unwrap();
        let Some(tx) = tx_guard.as_ref() else {
            drop(tx_guard);
            let _ = self.registry.set_state(&id, prior_state, None);
            return Err(SchedulerError::ShuttingDown);
        };

        match tx.try_send(Job {
            id: id.clone(),
            url: item.url.clone(),
            token: new_token,
        }) {
            Ok(()) => Ok(true),
            Err(_) => {
                drop(tx_guard);
                let _ = self.registry.set_state(&id, prior_state, None);
                Err(SchedulerError::QueueFull)
            }
        }
    }

    /// New enqueues fail immediately; in-flight downloads continue to
    /// completion.
    pub fn stop_accepting(&self) {
        self.closing.store(true, Ordering::Release);
    }

    /// Idempotent: cancels the run context, closes the jobs channel exactly
    /// once, then waits for workers and background store tasks to drain.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::Release);
        self.run_token.cancel();
        self.jobs_tx.lock().unwrap().take();

        let handles: Vec<_> = std::mem::take(&mut *self.worker_handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }

        let mut tasks = std::mem::replace(&mut *self.background_tasks.lock().unwrap(), JoinSet::new());
        while tasks.join_next().await.is_some() {}
    }
}

/// A handle the Runner's callbacks can hold before the `Scheduler` they'll
/// eventually route background work through is constructed.
///
/// `Scheduler::new` needs a fully built Runner up front, but the Runner's
/// progress/filename/artifacts callbacks are what need to reach
/// `Scheduler::spawn_background` so their store writes join the shutdown
/// wait group — a construction-order cycle. This cell breaks it: callbacks
/// clone a `SchedulerHandle` before the scheduler exists, and `bind` is
/// called once it does. A callback invoked in the narrow window before
/// `bind` falls back to a bare `tokio::spawn`, same as if no scheduler
/// existed to track it.
#[derive(Clone, Default)]
pub struct SchedulerHandle(Arc<OnceLock<Weak<Scheduler>>>);

impl SchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, scheduler: &Arc<Scheduler>) {
        let _ = self.0.set(Arc::downgrade(scheduler));
    }

    pub fn spawn_background<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.0.get().and_then(Weak::upgrade) {
            Some(scheduler) => scheduler.spawn_background(fut),
            None => {
                tokio::spawn(fut);
            }
        }
    }
}
