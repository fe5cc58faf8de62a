pub mod bookings;
pub mod payment;
pub mod sweep;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(bookings::routes())
        .merge(payment::routes())
        .merge(sweep::routes())
}
