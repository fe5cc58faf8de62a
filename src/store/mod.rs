//! Storage seam for the booking engine.
//!
//! Every operation that decides and applies a status transition is one
//! trait method, so each backend can run the deciding read and the write
//! inside a single atomic unit (a transaction in postgres, one critical
//! section in memory). The double-booking and idempotent-payment
//! invariants must hold regardless of which backend is in use.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::errors::ApiError;
use crate::models::{Booking, DepositStatus, NewBooking, Payment, PaymentMethod};

/// Result of a compare-and-swap transition on a booking.
#[derive(Debug)]
pub enum CasOutcome {
    /// The transition was performed by this call.
    Applied(Booking),
    /// The booking exists but was not in an eligible state; the current
    /// row is returned so callers can decide between no-op and error.
    NotApplied(Booking),
    NotFound,
}

/// Result of applying a verified gateway success notification.
#[derive(Debug)]
pub enum ApplyOutcome {
    Applied {
        booking: Booking,
        payment: Payment,
        /// True iff this call performed the PENDING -> CONFIRMED booking
        /// transition. The confirmation email is gated on this, not on the
        /// call succeeding.
        confirmed_now: bool,
    },
    /// The payment was already COMPLETED; nothing changed.
    AlreadyProcessed,
    NotFound,
}

/// Result of a guest reporting a bank transfer.
#[derive(Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyReported,
    AlreadyConfirmed,
    NotFound,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Advisory availability check. Only PENDING/CONFIRMED bookings block;
    /// the result can be stale by the time the caller inserts.
    async fn is_available(
        &self,
        room_id: i64,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<bool, ApiError>;

    /// Inserts a PENDING booking, re-validating availability inside the
    /// same atomic unit. Fails with `SlotConflict` when a concurrent
    /// writer won the race.
    async fn insert_booking(&self, new: NewBooking) -> Result<Booking, ApiError>;

    async fn booking(&self, id: i64) -> Result<Option<Booking>, ApiError>;

    async fn bookings_for_user(&self, user_id: i64) -> Result<Vec<Booking>, ApiError>;

    async fn payment_for_booking(&self, booking_id: i64) -> Result<Option<Payment>, ApiError>;

    async fn payment_by_transaction(&self, transaction_id: &str) -> Result<Option<Payment>, ApiError>;

    /// Creates or replaces the booking's payment row (one payment per
    /// booking; re-selecting a method overwrites a still-PENDING row) and
    /// stamps `payment_started_at`.
    async fn upsert_payment(
        &self,
        booking_id: i64,
        method: PaymentMethod,
        amount: i64,
        transaction_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Payment, ApiError>;

    /// CASH selection: one atomic unit setting the payment to CASH/PENDING
    /// and the booking to CONFIRMED with the deposit WAIVED.
    async fn select_cash(
        &self,
        booking_id: i64,
        transaction_id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, ApiError>;

    /// CAS PENDING -> CONFIRMED, setting the deposit status and stamping
    /// `deposit_paid_at` if it was never set.
    async fn confirm_booking(
        &self,
        booking_id: i64,
        deposit_status: DepositStatus,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, ApiError>;

    /// CAS PENDING|CONFIRMED -> CANCELLED, appending `note`.
    async fn cancel_booking(&self, booking_id: i64, note: &str) -> Result<CasOutcome, ApiError>;

    /// Reaper variant of cancellation: fires only while the booking is
    /// still PENDING with an unpaid deposit, so it can never race a
    /// concurrent confirmation into cancelling a paid booking.
    async fn expire_booking(&self, booking_id: i64, note: &str) -> Result<CasOutcome, ApiError>;

    /// CAS CONFIRMED -> COMPLETED with the checkout amounts.
    async fn complete_booking(
        &self,
        booking_id: i64,
        actual_amount: i64,
        actual_start_time: Option<NaiveTime>,
    ) -> Result<CasOutcome, ApiError>;

    /// Guest "I paid" for a bank transfer: stamps `deposit_paid_at` at most
    /// once while the booking stays PENDING.
    async fn claim_deposit(&self, booking_id: i64, now: DateTime<Utc>) -> Result<ClaimOutcome, ApiError>;

    /// Applies a verified gateway success: payment PENDING -> COMPLETED
    /// (+ paid_at + raw payload) and booking CONFIRMED / PAID_ONLINE /
    /// deposit_paid_at, all in one atomic unit keyed by the unique
    /// transaction reference. Replays are no-ops.
    async fn apply_gateway_success(
        &self,
        transaction_id: &str,
        paid_at: DateTime<Utc>,
        gateway_data: serde_json::Value,
    ) -> Result<ApplyOutcome, ApiError>;

    /// Records a reconciliation rejection: payment PENDING -> FAILED with
    /// the raw payload retained. A COMPLETED payment is never downgraded.
    async fn record_payment_failure(
        &self,
        transaction_id: &str,
        gateway_data: serde_json::Value,
    ) -> Result<(), ApiError>;

    /// PENDING bookings with an unpaid, unclaimed deposit created before
    /// `cutoff`. A reported bank transfer parks the booking for staff
    /// review instead of letting the sweep reclaim the slot. The reaper
    /// cancels each result independently through `expire_booking`, whose
    /// CAS makes overlapping sweeps safe.
    async fn expired_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, ApiError>;
}
