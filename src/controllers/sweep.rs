use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::errors::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/cron/sweep", post(run_sweep))
}

/// POST /api/cron/sweep
///
/// External scheduler entry point; the in-process loop runs the same sweep,
/// so this mainly covers deployments where that loop is disabled.
async fn run_sweep(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let secret = headers
        .get("X-Cron-Secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if secret != state.config.cron.secret {
        return Err(ApiError::Forbidden);
    }

    let report = state.reaper.sweep().await?;
    Ok(Json(json!({
        "success": true,
        "examined": report.examined,
        "cancelled": report.cancelled,
        "errors": report.errors,
        "skipped": report.skipped_lock_held,
    })))
}
