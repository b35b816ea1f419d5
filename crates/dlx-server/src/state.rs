use dlx_core::registry::ItemRegistry;
use dlx_core::scheduler::Scheduler;
use dlx_core::store::DownloadStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ItemRegistry>,
    pub store: Arc<DownloadStore>,
    pub scheduler: Arc<Scheduler>,
}
