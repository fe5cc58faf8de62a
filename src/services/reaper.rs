//! Expiry sweep for bookings whose payment window ran out.
//!
//! A PENDING booking with a PENDING deposit older than the timeout is
//! cancelled so its slot frees up. One failing booking never aborts the
//! rest of the sweep, and the per-booking CAS keeps overlapping sweeps
//! (two app instances, or cron firing during the in-process loop) from
//! double-cancelling anything.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info, warn};

use crate::config::ReaperConfig;
use crate::errors::ApiError;
use crate::notifier::Notifier;
use crate::redis_client::RedisClient;
use crate::store::{BookingStore, CasOutcome};

const SWEEP_LOCK_KEY: &str = "reaper:sweep";
const SWEEP_LOCK_TTL_SECONDS: u64 = 240;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub cancelled: usize,
    /// Bookings the sweep could not cancel; they stay for the next pass.
    pub errors: usize,
    pub skipped_lock_held: bool,
}

pub struct ExpiryReaper {
    store: Arc<dyn BookingStore>,
    notifier: Arc<dyn Notifier>,
    redis: Option<RedisClient>,
    config: ReaperConfig,
}

impl ExpiryReaper {
    pub fn new(
        store: Arc<dyn BookingStore>,
        notifier: Arc<dyn Notifier>,
        redis: Option<RedisClient>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            redis,
            config,
        }
    }

    /// One sweep pass. Holds a redis advisory lock while it runs so a
    /// cron-triggered sweep and the in-process loop do not scan the same
    /// backlog twice; losing redis only loses that optimization.
    pub async fn sweep(&self) -> Result<SweepReport, ApiError> {
        if let Some(redis) = &self.redis {
            match redis.try_lock(SWEEP_LOCK_KEY, SWEEP_LOCK_TTL_SECONDS).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("sweep already running elsewhere, skipping this pass");
                    return Ok(SweepReport {
                        skipped_lock_held: true,
                        ..SweepReport::default()
                    });
                }
                Err(e) => {
                    warn!("sweep lock unavailable ({}), proceeding without it", e);
                }
            }
        }

        let report = self.sweep_backlog().await;

        if let Some(redis) = &self.redis {
            if let Err(e) = redis.unlock(SWEEP_LOCK_KEY).await {
                warn!("could not release sweep lock: {}", e);
            }
        }
        report
    }

    async fn sweep_backlog(&self) -> Result<SweepReport, ApiError> {
        let cutoff = Utc::now() - Duration::minutes(self.config.timeout_minutes);
        let expired = self.store.expired_pending(cutoff).await?;
        if expired.is_empty() {
            return Ok(SweepReport::default());
        }
        info!("sweep found {} expired pending bookings", expired.len());

        let mut report = SweepReport::default();
        for booking in expired {
            report.examined += 1;
            match self
                .store
                .expire_booking(booking.id, "cancelled: payment window expired")
                .await
            {
                Ok(CasOutcome::Applied(cancelled)) => {
                    report.cancelled += 1;
                    info!("booking {} expired and cancelled", cancelled.code);
                    if let Err(e) = self
                        .notifier
                        .booking_cancelled(&cancelled, "payment window expired")
                        .await
                    {
                        warn!("expiry email for {} failed: {}", cancelled.code, e);
                    }
                }
                // Paid or cancelled since the scan; leave it alone.
                Ok(_) => {}
                Err(e) => {
                    error!("sweep could not cancel booking {}: {}", booking.code, e);
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DepositStatus, NewBooking, PaymentMethod, ServiceType};
    use crate::notifier::test_support::CountingNotifier;
    use crate::store::memory::MemoryStore;
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::atomic::Ordering;

    fn reaper(store: Arc<MemoryStore>, notifier: Arc<CountingNotifier>) -> ExpiryReaper {
        ExpiryReaper::new(
            store,
            notifier,
            None,
            ReaperConfig {
                timeout_minutes: 5,
                interval_seconds: 60,
            },
        )
    }

    async fn seed_booking(store: &MemoryStore, code: &str, hour: u32) -> i64 {
        let booking = store
            .insert_booking(NewBooking {
                code: code.into(),
                room_id: 1,
                location_id: 1,
                user_id: Some(7),
                service_type: ServiceType::HotDesk,
                date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
                guests: 1,
                estimated_amount: 50_000,
                deposit_amount: 15_000,
                note: String::new(),
            })
            .await
            .unwrap();
        booking.id
    }

    #[tokio::test]
    async fn sweeps_only_past_the_timeout() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(CountingNotifier::default());

        let stale = seed_booking(&store, "WB-20250110-STALE1", 9).await;
        let fresh = seed_booking(&store, "WB-20250110-FRESH1", 11).await;
        store.set_created_at(stale, Utc::now() - Duration::minutes(6)).await;
        store.set_created_at(fresh, Utc::now() - Duration::minutes(4)).await;

        let report = reaper(store.clone(), notifier.clone()).sweep().await.unwrap();
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.errors, 0);

        let stale = store.booking(stale).await.unwrap().unwrap();
        assert_eq!(stale.status, crate::models::BookingStatus::Cancelled);
        assert!(stale.note.contains("payment window expired"));
        let fresh = store.booking(fresh).await.unwrap().unwrap();
        assert_eq!(fresh.status, crate::models::BookingStatus::Pending);
        assert_eq!(notifier.cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn paid_or_confirmed_bookings_are_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(CountingNotifier::default());

        let confirmed = seed_booking(&store, "WB-20250110-CASH01", 9).await;
        store.set_created_at(confirmed, Utc::now() - Duration::minutes(10)).await;
        store
            .select_cash(confirmed, "WB-20250110-CASH01-1", 50_000, Utc::now())
            .await
            .unwrap();

        // Deposit claimed but still PENDING: the guest says they paid, so
        // the sweep must not pull the slot out from under review.
        let claimed = seed_booking(&store, "WB-20250110-CLAIM1", 11).await;
        store.set_created_at(claimed, Utc::now() - Duration::minutes(10)).await;
        store
            .upsert_payment(claimed, PaymentMethod::BankTransfer, 15_000, "WB-20250110-CLAIM1-1", Utc::now())
            .await
            .unwrap();
        store.claim_deposit(claimed, Utc::now()).await.unwrap();

        let report = reaper(store.clone(), notifier.clone()).sweep().await.unwrap();
        assert_eq!(report.cancelled, 0);

        let b = store.booking(confirmed).await.unwrap().unwrap();
        assert_eq!(b.status, crate::models::BookingStatus::Confirmed);
        assert_eq!(b.deposit_status, DepositStatus::Waived);
    }

    #[tokio::test]
    async fn failing_notifier_does_not_abort_the_sweep() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(CountingNotifier::failing());

        let a = seed_booking(&store, "WB-20250110-AAAAAA", 9).await;
        let b = seed_booking(&store, "WB-20250110-BBBBBB", 11).await;
        store.set_created_at(a, Utc::now() - Duration::minutes(30)).await;
        store.set_created_at(b, Utc::now() - Duration::minutes(30)).await;

        let report = reaper(store.clone(), notifier).sweep().await.unwrap();
        assert_eq!(report.cancelled, 2);
        assert_eq!(report.errors, 0);
    }

    #[tokio::test]
    async fn overlapping_sweeps_cancel_each_booking_once() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(CountingNotifier::default());

        let id = seed_booking(&store, "WB-20250110-RACE01", 9).await;
        store.set_created_at(id, Utc::now() - Duration::minutes(30)).await;

        let r1 = reaper(store.clone(), notifier.clone());
        let r2 = reaper(store.clone(), notifier.clone());
        let (a, b) = tokio::join!(r1.sweep(), r2.sweep());
        let total = a.unwrap().cancelled + b.unwrap().cancelled;
        assert_eq!(total, 1);
        assert_eq!(notifier.cancelled.load(Ordering::SeqCst), 1);
    }
}
