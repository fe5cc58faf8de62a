//! In-memory store. Backs the test suite and keeps the transition
//! semantics honest independent of postgres: every operation takes the
//! single mutex once, so its deciding read and write form one critical
//! section, the same shape the postgres backend gets from a transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::sync::Mutex;

use crate::availability::overlaps;
use crate::errors::ApiError;
use crate::models::{
    Booking, BookingStatus, DepositStatus, NewBooking, Payment, PaymentMethod, PaymentStatus,
};

use super::{ApplyOutcome, BookingStore, CasOutcome, ClaimOutcome};

#[derive(Default)]
struct Inner {
    bookings: HashMap<i64, Booking>,
    payments: HashMap<i64, Payment>,
    next_booking_id: i64,
    next_payment_id: i64,
}

impl Inner {
    fn slot_taken(&self, room_id: i64, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> bool {
        self.bookings.values().any(|b| {
            b.room_id == room_id
                && b.date == date
                && b.blocks_slot()
                && overlaps(start, end, b.start_time, b.end_time)
        })
    }

    fn payment_by_txn_mut(&mut self, transaction_id: &str) -> Option<&mut Payment> {
        self.payments
            .values_mut()
            .find(|p| p.transaction_id == transaction_id)
    }
}

fn append_note(note: &mut String, extra: &str) {
    if !note.is_empty() {
        note.push('\n');
    }
    note.push_str(extra);
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn is_available(
        &self,
        room_id: i64,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<bool, ApiError> {
        let inner = self.inner.lock().await;
        Ok(!inner.slot_taken(room_id, date, start, end))
    }

    async fn insert_booking(&self, new: NewBooking) -> Result<Booking, ApiError> {
        let mut inner = self.inner.lock().await;
        // Re-validate under the lock: the advisory check may be stale.
        if inner.slot_taken(new.room_id, new.date, new.start_time, new.end_time) {
            return Err(ApiError::SlotConflict);
        }
        inner.next_booking_id += 1;
        let id = inner.next_booking_id;
        let mut booking = Booking {
            id,
            code: new.code,
            room_id: new.room_id,
            location_id: new.location_id,
            user_id: new.user_id,
            service_type: new.service_type,
            date: new.date,
            start_time: new.start_time,
            end_time: new.end_time,
            guests: new.guests,
            status: BookingStatus::Pending,
            deposit_status: DepositStatus::Pending,
            estimated_amount: new.estimated_amount,
            deposit_amount: new.deposit_amount,
            remaining_amount: 0,
            actual_amount: None,
            actual_start_time: None,
            payment_started_at: None,
            deposit_paid_at: None,
            note: new.note,
            created_at: Utc::now(),
        };
        booking.remaining_amount = booking.computed_remaining();
        inner.bookings.insert(id, booking.clone());
        Ok(booking)
    }

    async fn booking(&self, id: i64) -> Result<Option<Booking>, ApiError> {
        Ok(self.inner.lock().await.bookings.get(&id).cloned())
    }

    async fn bookings_for_user(&self, user_id: i64) -> Result<Vec<Booking>, ApiError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| b.user_id == Some(user_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn payment_for_booking(&self, booking_id: i64) -> Result<Option<Payment>, ApiError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .payments
            .values()
            .find(|p| p.booking_id == booking_id)
            .cloned())
    }

    async fn payment_by_transaction(&self, transaction_id: &str) -> Result<Option<Payment>, ApiError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .payments
            .values()
            .find(|p| p.transaction_id == transaction_id)
            .cloned())
    }

    async fn upsert_payment(
        &self,
        booking_id: i64,
        method: PaymentMethod,
        amount: i64,
        transaction_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Payment, ApiError> {
        let mut inner = self.inner.lock().await;
        if !inner.bookings.contains_key(&booking_id) {
            return Err(ApiError::NotFound);
        }
        let existing = inner
            .payments
            .values()
            .find(|p| p.booking_id == booking_id)
            .map(|p| (p.id, p.status));
        let payment = match existing {
            Some((_, PaymentStatus::Completed)) => return Err(ApiError::AlreadyProcessed),
            Some((id, _)) => {
                let p = inner.payments.get_mut(&id).ok_or(ApiError::NotFound)?;
                p.method = method;
                p.amount = amount;
                p.status = PaymentStatus::Pending;
                p.transaction_id = transaction_id.to_string();
                p.clone()
            }
            None => {
                inner.next_payment_id += 1;
                let id = inner.next_payment_id;
                let p = Payment {
                    id,
                    booking_id,
                    amount,
                    method,
                    status: PaymentStatus::Pending,
                    transaction_id: transaction_id.to_string(),
                    paid_at: None,
                    gateway_data: None,
                };
                inner.payments.insert(id, p.clone());
                p
            }
        };
        if let Some(b) = inner.bookings.get_mut(&booking_id) {
            b.payment_started_at = Some(started_at);
        }
        Ok(payment)
    }

    async fn select_cash(
        &self,
        booking_id: i64,
        transaction_id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, ApiError> {
        let mut inner = self.inner.lock().await;
        let Some(current) = inner.bookings.get(&booking_id).cloned() else {
            return Ok(CasOutcome::NotFound);
        };
        if current.status != BookingStatus::Pending {
            return Ok(CasOutcome::NotApplied(current));
        }

        let existing_id = inner
            .payments
            .values()
            .find(|p| p.booking_id == booking_id)
            .map(|p| p.id);
        match existing_id {
            Some(id) => {
                let p = inner.payments.get_mut(&id).ok_or(ApiError::NotFound)?;
                p.method = PaymentMethod::Cash;
                p.amount = amount;
                p.status = PaymentStatus::Pending;
                p.transaction_id = transaction_id.to_string();
            }
            None => {
                inner.next_payment_id += 1;
                let id = inner.next_payment_id;
                inner.payments.insert(
                    id,
                    Payment {
                        id,
                        booking_id,
                        amount,
                        method: PaymentMethod::Cash,
                        status: PaymentStatus::Pending,
                        transaction_id: transaction_id.to_string(),
                        paid_at: None,
                        gateway_data: None,
                    },
                );
            }
        }

        let b = inner.bookings.get_mut(&booking_id).ok_or(ApiError::NotFound)?;
        b.status = BookingStatus::Confirmed;
        b.deposit_status = DepositStatus::Waived;
        b.payment_started_at = Some(now);
        b.remaining_amount = b.computed_remaining();
        Ok(CasOutcome::Applied(b.clone()))
    }

    async fn confirm_booking(
        &self,
        booking_id: i64,
        deposit_status: DepositStatus,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, ApiError> {
        let mut inner = self.inner.lock().await;
        let Some(b) = inner.bookings.get_mut(&booking_id) else {
            return Ok(CasOutcome::NotFound);
        };
        if b.status != BookingStatus::Pending {
            return Ok(CasOutcome::NotApplied(b.clone()));
        }
        b.status = BookingStatus::Confirmed;
        b.deposit_status = deposit_status;
        if b.deposit_paid_at.is_none() && deposit_status.is_paid() {
            b.deposit_paid_at = Some(now);
        }
        b.remaining_amount = b.computed_remaining();
        Ok(CasOutcome::Applied(b.clone()))
    }

    async fn cancel_booking(&self, booking_id: i64, note: &str) -> Result<CasOutcome, ApiError> {
        let mut inner = self.inner.lock().await;
        let Some(b) = inner.bookings.get_mut(&booking_id) else {
            return Ok(CasOutcome::NotFound);
        };
        if !matches!(b.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Ok(CasOutcome::NotApplied(b.clone()));
        }
        b.status = BookingStatus::Cancelled;
        append_note(&mut b.note, note);
        Ok(CasOutcome::Applied(b.clone()))
    }

    async fn expire_booking(&self, booking_id: i64, note: &str) -> Result<CasOutcome, ApiError> {
        let mut inner = self.inner.lock().await;
        let Some(b) = inner.bookings.get_mut(&booking_id) else {
            return Ok(CasOutcome::NotFound);
        };
        if b.status != BookingStatus::Pending
            || b.deposit_status != DepositStatus::Pending
            || b.deposit_paid_at.is_some()
        {
            return Ok(CasOutcome::NotApplied(b.clone()));
        }
        b.status = BookingStatus::Cancelled;
        append_note(&mut b.note, note);
        Ok(CasOutcome::Applied(b.clone()))
    }

    async fn complete_booking(
        &self,
        booking_id: i64,
        actual_amount: i64,
        actual_start_time: Option<NaiveTime>,
    ) -> Result<CasOutcome, ApiError> {
        let mut inner = self.inner.lock().await;
        let Some(b) = inner.bookings.get_mut(&booking_id) else {
            return Ok(CasOutcome::NotFound);
        };
        if b.status != BookingStatus::Confirmed {
            return Ok(CasOutcome::NotApplied(b.clone()));
        }
        b.status = BookingStatus::Completed;
        b.actual_amount = Some(actual_amount);
        if actual_start_time.is_some() {
            b.actual_start_time = actual_start_time;
        }
        b.remaining_amount = b.computed_remaining();
        Ok(CasOutcome::Applied(b.clone()))
    }

    async fn claim_deposit(&self, booking_id: i64, now: DateTime<Utc>) -> Result<ClaimOutcome, ApiError> {
        let mut inner = self.inner.lock().await;
        let Some(b) = inner.bookings.get_mut(&booking_id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if b.status != BookingStatus::Pending {
            return Ok(ClaimOutcome::AlreadyConfirmed);
        }
        if b.deposit_paid_at.is_some() {
            return Ok(ClaimOutcome::AlreadyReported);
        }
        b.deposit_paid_at = Some(now);
        Ok(ClaimOutcome::Claimed)
    }

    async fn apply_gateway_success(
        &self,
        transaction_id: &str,
        paid_at: DateTime<Utc>,
        gateway_data: serde_json::Value,
    ) -> Result<ApplyOutcome, ApiError> {
        let mut inner = self.inner.lock().await;
        let Some(p) = inner.payment_by_txn_mut(transaction_id) else {
            return Ok(ApplyOutcome::NotFound);
        };
        // Whoever completes the payment first wins; replays are no-ops.
        if p.status == PaymentStatus::Completed {
            return Ok(ApplyOutcome::AlreadyProcessed);
        }
        p.status = PaymentStatus::Completed;
        p.paid_at = Some(paid_at);
        p.gateway_data = Some(gateway_data);
        let payment = p.clone();

        let Some(b) = inner.bookings.get_mut(&payment.booking_id) else {
            return Ok(ApplyOutcome::NotFound);
        };
        let confirmed_now = b.status == BookingStatus::Pending;
        if confirmed_now {
            b.status = BookingStatus::Confirmed;
        }
        b.deposit_status = DepositStatus::PaidOnline;
        if b.deposit_paid_at.is_none() {
            b.deposit_paid_at = Some(paid_at);
        }
        b.remaining_amount = b.computed_remaining();
        Ok(ApplyOutcome::Applied {
            booking: b.clone(),
            payment,
            confirmed_now,
        })
    }

    async fn record_payment_failure(
        &self,
        transaction_id: &str,
        gateway_data: serde_json::Value,
    ) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().await;
        if let Some(p) = inner.payment_by_txn_mut(transaction_id) {
            if p.status == PaymentStatus::Pending {
                p.status = PaymentStatus::Failed;
                p.gateway_data = Some(gateway_data);
            }
        }
        Ok(())
    }

    async fn expired_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, ApiError> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| {
                b.status == BookingStatus::Pending
                    && b.deposit_status == DepositStatus::Pending
                    && b.deposit_paid_at.is_none()
                    && b.created_at < cutoff
            })
            .cloned()
            .collect();
        out.sort_by_key(|b| b.created_at);
        Ok(out)
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Test hook: backdate a booking so reaper cutoffs can be exercised.
    pub async fn set_created_at(&self, booking_id: i64, created_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        if let Some(b) = inner.bookings.get_mut(&booking_id) {
            b.created_at = created_at;
        }
    }
}
