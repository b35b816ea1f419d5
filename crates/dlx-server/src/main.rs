use dlx_core::app::App;
use dlx_core::logging;

mod routes;
mod sse;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = logging::init_logging() {
        logging::init_logging_stderr();
        tracing::warn!(error = %e, "falling back to stderr logging");
    }

    let config = dlx_core::config::load_or_init()?;
    let app = App::start(&config).await?;

    let state = AppState {
        registry: app.registry.clone(),
        store: app.store.clone(),
        scheduler: app.scheduler.clone(),
    };
    let router = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "dlx-server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
