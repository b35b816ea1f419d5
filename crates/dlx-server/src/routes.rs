//! Thin translation from HTTP verbs/paths to the Scheduler and Record Store
//! APIs. No templating, no auth, no dashboard.

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/downloads", post(create_download).get(list_downloads))
        .route("/downloads/:id", get(get_download).delete(delete_download))
        .route("/downloads/:id/pause", post(pause_download))
        .route("/downloads/:id/resume", post(resume_download))
        .route("/downloads/:id/cancel", post(cancel_download))
        .route("/downloads/stream", get(crate::sse::stream_downloads))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct CreateDownloadRequest {
    url: String,
}

async fn create_download(
    State(state): State<AppState>,
    Json(req): Json<CreateDownloadRequest>,
) -> impl IntoResponse {
    match state
        .store
        .create_download(&req.url, None, None, None, "pending", 0.0)
        .await
    {
        Ok(db_id) => (StatusCode::CREATED, Json(json!({ "id": db_id, "status": "pending" }))).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn list_downloads(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_downloads().await {
        Ok(records) => Json(records).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn get_download(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.store.get_download_by_id(id).await {
        Ok(Some(mut record)) => {
            // The registry's progress is the freshest value; the store's copy lags
            // behind it by one background write.
            if let Some(item) = state
                .registry
                .snapshot(None)
                .into_iter()
                .find(|item| item.db_id == Some(id))
            {
                record.progress = record.progress.max(item.progress);
            }
            Json(record).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn delete_download(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    state.scheduler.cancel_by_db_id(id).await;
    match state.store.delete_download(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn pause_download(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let ok = state.scheduler.pause_by_db_id(id).await;
    status_for_bool(ok)
}

async fn cancel_download(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let ok = state.scheduler.cancel_by_db_id(id).await;
    status_for_bool(ok)
}

async fn resume_download(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.scheduler.resume_by_db_id(id) {
        Ok(ok) => status_for_bool(ok),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

fn status_for_bool(ok: bool) -> axum::response::Response {
    if ok {
        Json(json!({ "ok": true })).into_response()
    } else {
        (StatusCode::CONFLICT, Json(json!({ "ok": false }))).into_response()
    }
}
