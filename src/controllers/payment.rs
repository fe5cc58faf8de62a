//! Gateway-facing endpoints. The gateway calls both after a checkout: the
//! customer's browser lands on `/payment/return` and the server-to-server
//! notification hits `/payment/ipn`. Both run the same reconciliation, so
//! whichever arrives second is a replay and changes nothing.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::services::reconcile::GatewayAck;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payment/return", get(payment_return))
        .route("/payment/ipn", get(payment_ipn))
}

/// GET /api/payment/return
async fn payment_return(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Redirect {
    match state.reconcile.handle_callback(&params).await {
        Ok(outcome) if outcome.is_success() => Redirect::to(state.reconcile.success_redirect()),
        Ok(_) => Redirect::to(state.reconcile.fail_redirect()),
        Err(e) => {
            error!("payment return processing failed: {}", e);
            Redirect::to(state.reconcile.fail_redirect())
        }
    }
}

/// GET /api/payment/ipn
///
/// Always 200 with an `{RspCode, Message}` body; a non-200 would make the
/// gateway retry forever, including for callbacks we rejected on purpose.
async fn payment_ipn(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let ack = match state.reconcile.handle_callback(&params).await {
        Ok(outcome) => outcome.ack(),
        Err(e) => {
            error!("payment notification processing failed: {}", e);
            GatewayAck::new("99", "Unknown error")
        }
    };
    (StatusCode::OK, Json(ack))
}
