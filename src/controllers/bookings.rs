use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post, put},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::{
    errors::ApiError,
    middleware::AuthUser,
    models::{PaymentMethod, ServiceType},
    pricing::TariffTable,
    services::bookings::{CreateBooking, PaymentSelection},
    store::ClaimOutcome,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/paymentMethod", post(select_payment_method))
        .route("/bookings/cancel", patch(cancel_booking))
        .route("/bookings/claim", post(claim_transfer))
        .route("/bookings/{id}", get(get_booking))
        .route("/admin/bookings/confirmPayment", post(admin_confirm_payment))
        .route("/admin/bookings/cancel", post(admin_cancel))
        .route("/admin/bookings/checkout", post(checkout))
        .route("/admin/tariffs", put(replace_tariffs))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub room_id: i64,
    pub location_id: i64,
    pub service_type: ServiceType,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub guests: i32,
    #[serde(default)]
    pub note: String,
}

/// POST /api/bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state
        .bookings
        .create(CreateBooking {
            room_id: req.room_id,
            location_id: req.location_id,
            user_id: Some(user.user_id),
            service_type: req.service_type,
            date: req.date,
            start_time: req.start_time,
            end_time: req.end_time,
            guests: req.guests,
            note: req.note,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "booking": booking })),
    ))
}

/// GET /api/bookings
async fn list_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let bookings = state.bookings.list_for_user(user.user_id).await?;
    Ok(Json(json!({ "success": true, "bookings": bookings })))
}

/// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state.bookings.get_for(id, user.user_id).await?;
    Ok(Json(json!({ "success": true, "booking": booking })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectPaymentMethodRequest {
    pub booking_id: i64,
    pub payment_method: PaymentMethod,
}

/// POST /api/bookings/paymentMethod
async fn select_payment_method(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(req): Json<SelectPaymentMethodRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let selection = state
        .bookings
        .select_payment_method(req.booking_id, req.payment_method)
        .await?;

    let body = match selection {
        PaymentSelection::CashConfirmed(booking) => {
            json!({ "success": true, "booking": booking })
        }
        PaymentSelection::Transfer(instructions) => {
            json!({ "success": true, "transfer": instructions })
        }
        PaymentSelection::Checkout { payment_url } => {
            json!({ "success": true, "paymentUrl": payment_url })
        }
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingIdRequest {
    pub booking_id: i64,
}

/// PATCH /api/bookings/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<BookingIdRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state.bookings.self_cancel(req.booking_id, user.user_id).await?;
    Ok(Json(json!({ "success": true, "booking": booking })))
}

/// POST /api/bookings/claim
async fn claim_transfer(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(req): Json<BookingIdRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = match state.bookings.claim_bank_transfer(req.booking_id).await? {
        ClaimOutcome::Claimed => "transfer reported, pending staff confirmation",
        ClaimOutcome::AlreadyReported => "transfer already reported",
        ClaimOutcome::AlreadyConfirmed => "booking already confirmed",
        ClaimOutcome::NotFound => return Err(ApiError::NotFound),
    };
    Ok(Json(json!({ "success": true, "message": message })))
}

/// POST /api/admin/bookings/confirmPayment
async fn admin_confirm_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<BookingIdRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state
        .bookings
        .admin_confirm_payment(req.booking_id, user.user_id)
        .await?;
    Ok(Json(json!({ "success": true, "booking": booking })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCancelRequest {
    pub booking_id: i64,
    #[serde(default)]
    pub reason: String,
}

/// POST /api/admin/bookings/cancel
async fn admin_cancel(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<AdminCancelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state
        .bookings
        .admin_cancel(req.booking_id, user.user_id, &req.reason)
        .await?;
    Ok(Json(json!({ "success": true, "booking": booking })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub booking_id: i64,
    pub actual_start_time: Option<NaiveTime>,
    pub actual_end_time: NaiveTime,
}

/// POST /api/admin/bookings/checkout
async fn checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state
        .bookings
        .checkout(req.booking_id, user.user_id, req.actual_start_time, req.actual_end_time)
        .await?;
    Ok(Json(json!({ "success": true, "booking": booking })))
}

/// PUT /api/admin/tariffs
async fn replace_tariffs(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(table): Json<TariffTable>,
) -> Result<impl IntoResponse, ApiError> {
    let version = state.bookings.replace_tariffs(user.user_id, table).await?;
    Ok(Json(json!({ "success": true, "version": version })))
}
