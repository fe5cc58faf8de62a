use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    Pending,
    PaidOnline,
    PaidCash,
    Waived,
}

impl DepositStatus {
    /// A deposit counts toward the remaining balance only once money
    /// actually moved; WAIVED means the full amount is due at checkout.
    pub fn is_paid(&self) -> bool {
        matches!(self, DepositStatus::PaidOnline | DepositStatus::PaidCash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    HotDesk,
    DedicatedDesk,
    Meeting,
    Event,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub code: String,
    pub room_id: i64,
    pub location_id: i64,
    pub user_id: Option<i64>,
    pub service_type: ServiceType,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub guests: i32,
    pub status: BookingStatus,
    pub deposit_status: DepositStatus,
    pub estimated_amount: i64,
    pub deposit_amount: i64,
    pub remaining_amount: i64,
    pub actual_amount: Option<i64>,
    pub actual_start_time: Option<NaiveTime>,
    pub payment_started_at: Option<DateTime<Utc>>,
    pub deposit_paid_at: Option<DateTime<Utc>>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn paid_deposit(&self) -> i64 {
        if self.deposit_status.is_paid() {
            self.deposit_amount
        } else {
            0
        }
    }

    /// remaining = (actual ?? estimated) - paid deposit. The postgres store
    /// keeps this as a generated column; the in-memory store recomputes it
    /// through here after every mutation.
    pub fn computed_remaining(&self) -> i64 {
        self.actual_amount.unwrap_or(self.estimated_amount) - self.paid_deposit()
    }

    pub fn scheduled_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    /// Wall-clock start of the booked slot.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn blocks_slot(&self) -> bool {
        matches!(self.status, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

/// Fields the caller supplies; id/code/status/amounts are filled in by the
/// booking service before the atomic insert.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub code: String,
    pub room_id: i64,
    pub location_id: i64,
    pub user_id: Option<i64>,
    pub service_type: ServiceType,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub guests: i32,
    pub estimated_amount: i64,
    pub deposit_amount: i64,
    pub note: String,
}
