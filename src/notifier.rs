//! Notification dispatch. Email rendering and delivery live in an external
//! service; this client only fires dispatch requests. Every call site
//! treats failures as non-fatal: a lost email never rolls back a booking
//! transition.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::config::NotifyConfig;
use crate::models::Booking;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Customer-facing confirmation email.
    async fn booking_confirmed(&self, booking: &Booking) -> anyhow::Result<()>;

    /// Customer-facing cancellation email.
    async fn booking_cancelled(&self, booking: &Booking, reason: &str) -> anyhow::Result<()>;

    /// In-app alert for staff.
    async fn staff_alert(&self, message: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct HttpNotifier {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn from_config(config: &NotifyConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            base_url: config.dispatch_url.clone(),
        })
    }

    async fn dispatch(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        self.http_client
            .post(format!("{}/dispatch", self.base_url))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn booking_confirmed(&self, booking: &Booking) -> anyhow::Result<()> {
        self.dispatch(json!({
            "template": "booking_confirmed",
            "booking_id": booking.id,
            "booking_code": booking.code,
            "user_id": booking.user_id,
        }))
        .await
    }

    async fn booking_cancelled(&self, booking: &Booking, reason: &str) -> anyhow::Result<()> {
        self.dispatch(json!({
            "template": "booking_cancelled",
            "booking_id": booking.id,
            "booking_code": booking.code,
            "user_id": booking.user_id,
            "reason": reason,
        }))
        .await
    }

    async fn staff_alert(&self, message: &str) -> anyhow::Result<()> {
        self.dispatch(json!({
            "template": "staff_alert",
            "message": message,
        }))
        .await
    }
}
