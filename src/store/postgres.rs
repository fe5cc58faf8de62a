//! Postgres store. Transitions are compare-and-swap updates
//! (`UPDATE ... WHERE status = ...` + returned row / rows_affected), and
//! multi-row decisions run inside an explicit transaction. Slot insertion
//! takes a row lock on the room so the overlap check and the insert are
//! one atomic unit per room; no cross-room lock is ever held.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::database::Database;
use crate::errors::ApiError;
use crate::models::{Booking, DepositStatus, NewBooking, Payment, PaymentMethod, PaymentStatus};

use super::{ApplyOutcome, BookingStore, CasOutcome, ClaimOutcome};

#[derive(Clone)]
pub struct PgBookingStore {
    db: Database,
}

impl PgBookingStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn fetch_booking(&self, id: i64) -> Result<Option<Booking>, ApiError> {
        let row = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn is_available(
        &self,
        room_id: i64,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<bool, ApiError> {
        let taken = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
              SELECT 1 FROM bookings
              WHERE room_id = $1 AND date = $2
                AND status IN ('PENDING', 'CONFIRMED')
                AND start_time < $4 AND $3 < end_time
            )
            "#,
        )
        .bind(room_id)
        .bind(date)
        .bind(start)
        .bind(end)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(!taken)
    }

    async fn insert_booking(&self, new: NewBooking) -> Result<Booking, ApiError> {
        let mut tx = self.db.pool.begin().await?;

        // Serialize slot decisions per room; concurrent creators for the
        // same room queue here, everyone else proceeds.
        let room: Option<i64> = sqlx::query_scalar("SELECT id FROM rooms WHERE id = $1 FOR UPDATE")
            .bind(new.room_id)
            .fetch_optional(&mut *tx)
            .await?;
        if room.is_none() {
            return Err(ApiError::Validation("unknown room".into()));
        }

        let taken = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
              SELECT 1 FROM bookings
              WHERE room_id = $1 AND date = $2
                AND status IN ('PENDING', 'CONFIRMED')
                AND start_time < $4 AND $3 < end_time
            )
            "#,
        )
        .bind(new.room_id)
        .bind(new.date)
        .bind(new.start_time)
        .bind(new.end_time)
        .fetch_one(&mut *tx)
        .await?;
        if taken {
            // Implicit rollback when the transaction drops.
            return Err(ApiError::SlotConflict);
        }

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            INSERT INTO bookings
              (code, room_id, location_id, user_id, service_type, date,
               start_time, end_time, guests, status, deposit_status,
               estimated_amount, deposit_amount, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'PENDING', 'PENDING', $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(&new.code)
        .bind(new.room_id)
        .bind(new.location_id)
        .bind(new.user_id)
        .bind(new.service_type)
        .bind(new.date)
        .bind(new.start_time)
        .bind(new.end_time)
        .bind(new.guests)
        .bind(new.estimated_amount)
        .bind(new.deposit_amount)
        .bind(&new.note)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(booking)
    }

    async fn booking(&self, id: i64) -> Result<Option<Booking>, ApiError> {
        self.fetch_booking(id).await
    }

    async fn bookings_for_user(&self, user_id: i64) -> Result<Vec<Booking>, ApiError> {
        let rows = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    async fn payment_for_booking(&self, booking_id: i64) -> Result<Option<Payment>, ApiError> {
        let row = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE booking_id = $1")
            .bind(booking_id)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row)
    }

    async fn payment_by_transaction(&self, transaction_id: &str) -> Result<Option<Payment>, ApiError> {
        let row = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row)
    }

    async fn upsert_payment(
        &self,
        booking_id: i64,
        method: PaymentMethod,
        amount: i64,
        transaction_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Payment, ApiError> {
        let mut tx = self.db.pool.begin().await?;

        let updated = sqlx::query("UPDATE bookings SET payment_started_at = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(started_at)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(ApiError::NotFound);
        }

        // One payment row per booking; re-selecting a method rewrites a
        // still-pending row but never touches a completed one.
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (booking_id, amount, method, status, transaction_id)
            VALUES ($1, $2, $3, 'PENDING', $4)
            ON CONFLICT (booking_id) DO UPDATE
              SET amount = EXCLUDED.amount,
                  method = EXCLUDED.method,
                  status = 'PENDING',
                  transaction_id = EXCLUDED.transaction_id
              WHERE payments.status <> 'COMPLETED'
            RETURNING *
            "#,
        )
        .bind(booking_id)
        .bind(amount)
        .bind(method)
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::AlreadyProcessed)?;

        tx.commit().await?;
        Ok(payment)
    }

    async fn select_cash(
        &self,
        booking_id: i64,
        transaction_id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, ApiError> {
        let mut tx = self.db.pool.begin().await?;

        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET status = 'CONFIRMED', deposit_status = 'WAIVED', payment_started_at = $2
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(booking_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(booking) = booking else {
            drop(tx);
            return Ok(match self.fetch_booking(booking_id).await? {
                Some(current) => CasOutcome::NotApplied(current),
                None => CasOutcome::NotFound,
            });
        };

        sqlx::query(
            r#"
            INSERT INTO payments (booking_id, amount, method, status, transaction_id)
            VALUES ($1, $2, 'CASH', 'PENDING', $3)
            ON CONFLICT (booking_id) DO UPDATE
              SET amount = EXCLUDED.amount,
                  method = 'CASH',
                  status = 'PENDING',
                  transaction_id = EXCLUDED.transaction_id
              WHERE payments.status <> 'COMPLETED'
            "#,
        )
        .bind(booking_id)
        .bind(amount)
        .bind(transaction_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CasOutcome::Applied(booking))
    }

    async fn confirm_booking(
        &self,
        booking_id: i64,
        deposit_status: DepositStatus,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, ApiError> {
        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET status = 'CONFIRMED',
                deposit_status = $2,
                deposit_paid_at = CASE
                  WHEN deposit_paid_at IS NULL AND $3 THEN $4
                  ELSE deposit_paid_at
                END
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(booking_id)
        .bind(deposit_status)
        .bind(deposit_status.is_paid())
        .bind(now)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(match booking {
            Some(b) => CasOutcome::Applied(b),
            None => match self.fetch_booking(booking_id).await? {
                Some(current) => CasOutcome::NotApplied(current),
                None => CasOutcome::NotFound,
            },
        })
    }

    async fn cancel_booking(&self, booking_id: i64, note: &str) -> Result<CasOutcome, ApiError> {
        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET status = 'CANCELLED',
                note = CASE WHEN note = '' THEN $2 ELSE note || E'\n' || $2 END
            WHERE id = $1 AND status IN ('PENDING', 'CONFIRMED')
            RETURNING *
            "#,
        )
        .bind(booking_id)
        .bind(note)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(match booking {
            Some(b) => CasOutcome::Applied(b),
            None => match self.fetch_booking(booking_id).await? {
                Some(current) => CasOutcome::NotApplied(current),
                None => CasOutcome::NotFound,
            },
        })
    }

    async fn expire_booking(&self, booking_id: i64, note: &str) -> Result<CasOutcome, ApiError> {
        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET status = 'CANCELLED',
                note = CASE WHEN note = '' THEN $2 ELSE note || E'\n' || $2 END
            WHERE id = $1 AND status = 'PENDING' AND deposit_status = 'PENDING'
              AND deposit_paid_at IS NULL
            RETURNING *
            "#,
        )
        .bind(booking_id)
        .bind(note)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(match booking {
            Some(b) => CasOutcome::Applied(b),
            None => match self.fetch_booking(booking_id).await? {
                Some(current) => CasOutcome::NotApplied(current),
                None => CasOutcome::NotFound,
            },
        })
    }

    async fn complete_booking(
        &self,
        booking_id: i64,
        actual_amount: i64,
        actual_start_time: Option<NaiveTime>,
    ) -> Result<CasOutcome, ApiError> {
        let booking = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET status = 'COMPLETED',
                actual_amount = $2,
                actual_start_time = COALESCE($3, actual_start_time)
            WHERE id = $1 AND status = 'CONFIRMED'
            RETURNING *
            "#,
        )
        .bind(booking_id)
        .bind(actual_amount)
        .bind(actual_start_time)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(match booking {
            Some(b) => CasOutcome::Applied(b),
            None => match self.fetch_booking(booking_id).await? {
                Some(current) => CasOutcome::NotApplied(current),
                None => CasOutcome::NotFound,
            },
        })
    }

    async fn claim_deposit(&self, booking_id: i64, now: DateTime<Utc>) -> Result<ClaimOutcome, ApiError> {
        let updated = sqlx::query(
            r#"
            UPDATE bookings SET deposit_paid_at = $2
            WHERE id = $1 AND status = 'PENDING' AND deposit_paid_at IS NULL
            "#,
        )
        .bind(booking_id)
        .bind(now)
        .execute(&self.db.pool)
        .await?;
        if updated.rows_affected() > 0 {
            return Ok(ClaimOutcome::Claimed);
        }

        Ok(match self.fetch_booking(booking_id).await? {
            None => ClaimOutcome::NotFound,
            Some(b) if b.status != crate::models::BookingStatus::Pending => {
                ClaimOutcome::AlreadyConfirmed
            }
            Some(_) => ClaimOutcome::AlreadyReported,
        })
    }

    async fn apply_gateway_success(
        &self,
        transaction_id: &str,
        paid_at: DateTime<Utc>,
        gateway_data: serde_json::Value,
    ) -> Result<ApplyOutcome, ApiError> {
        let mut tx = self.db.pool.begin().await?;

        // The payment row is the idempotency gate: the first transaction to
        // flip it off PENDING wins, replays find nothing to update.
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'COMPLETED', paid_at = $2, gateway_data = $3
            WHERE transaction_id = $1 AND status <> 'COMPLETED'
            RETURNING *
            "#,
        )
        .bind(transaction_id)
        .bind(paid_at)
        .bind(&gateway_data)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(payment) = payment else {
            drop(tx);
            return Ok(match self.payment_by_transaction(transaction_id).await? {
                Some(p) if p.status == PaymentStatus::Completed => ApplyOutcome::AlreadyProcessed,
                _ => ApplyOutcome::NotFound,
            });
        };

        let confirmed = sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET status = 'CONFIRMED',
                deposit_status = 'PAID_ONLINE',
                deposit_paid_at = COALESCE(deposit_paid_at, $2)
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(payment.booking_id)
        .bind(paid_at)
        .fetch_optional(&mut *tx)
        .await?;

        let (booking, confirmed_now) = match confirmed {
            Some(b) => (b, true),
            None => {
                // Already confirmed through another channel; still settle
                // the deposit bookkeeping.
                let b = sqlx::query_as::<_, Booking>(
                    r#"
                    UPDATE bookings
                    SET deposit_status = 'PAID_ONLINE',
                        deposit_paid_at = COALESCE(deposit_paid_at, $2)
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(payment.booking_id)
                .bind(paid_at)
                .fetch_optional(&mut *tx)
                .await?;
                match b {
                    Some(b) => (b, false),
                    None => return Ok(ApplyOutcome::NotFound),
                }
            }
        };

        tx.commit().await?;
        Ok(ApplyOutcome::Applied {
            booking,
            payment,
            confirmed_now,
        })
    }

    async fn record_payment_failure(
        &self,
        transaction_id: &str,
        gateway_data: serde_json::Value,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE payments SET status = 'FAILED', gateway_data = $2
            WHERE transaction_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(transaction_id)
        .bind(&gateway_data)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn expired_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, ApiError> {
        let rows = sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings
            WHERE status = 'PENDING' AND deposit_status = 'PENDING'
              AND deposit_paid_at IS NULL AND created_at < $1
            ORDER BY created_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }
}
