use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Vnpay,
    Momo,
    Zalopay,
    BankTransfer,
}

impl PaymentMethod {
    /// Gateway methods go through the redirect + webhook flow; CASH and
    /// BANK_TRANSFER are reconciled manually.
    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            PaymentMethod::Vnpay | PaymentMethod::Momo | PaymentMethod::Zalopay
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// One payment row per booking. `transaction_id` is the external reference
/// the gateway echoes back on both the return redirect and the webhook, so
/// it is the idempotency key for reconciliation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub booking_id: i64,
    pub amount: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub gateway_data: Option<serde_json::Value>,
}
