//! Booking lifecycle: PENDING -> CONFIRMED -> COMPLETED, with CANCELLED
//! reachable from PENDING and CONFIRMED. Every transition is a store-level
//! compare-and-swap, so two racing writers cannot both apply the same
//! transition.

use std::sync::Arc;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::availability::validate_interval;
use crate::errors::ApiError;
use crate::models::{Booking, BookingStatus, DepositStatus, NewBooking, PaymentMethod, ServiceType};
use crate::notifier::Notifier;
use crate::permission_client::PermissionGate;
use crate::pricing::TariffCatalog;
use crate::services::reconcile::{ReconcileService, TransferInstructions};
use crate::store::{BookingStore, CasOutcome, ClaimOutcome};

/// Self-cancellation closes this many minutes before the scheduled start.
pub const SELF_CANCEL_DEADLINE_MINUTES: i64 = 360;

/// A booking starting in exactly 360 minutes is still cancellable; 359 is
/// not. Compared against local wall-clock time, like the slot itself.
pub fn can_self_cancel(starts_at: NaiveDateTime, now: NaiveDateTime) -> bool {
    starts_at - now >= Duration::minutes(SELF_CANCEL_DEADLINE_MINUTES)
}

fn generate_code(date: NaiveDate) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    format!("WB-{}-{}", date.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub room_id: i64,
    pub location_id: i64,
    pub user_id: Option<i64>,
    pub service_type: ServiceType,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub guests: i32,
    pub note: String,
}

/// What the caller gets back from selecting a payment method.
#[derive(Debug)]
pub enum PaymentSelection {
    /// CASH auto-confirms: no gateway call, deposit waived.
    CashConfirmed(Booking),
    /// BANK_TRANSFER: transfer code / amount / QR payload to show the guest.
    Transfer(TransferInstructions),
    /// Gateway method: redirect the customer to the signed checkout URL.
    Checkout { payment_url: String },
}

pub struct BookingService {
    store: Arc<dyn BookingStore>,
    tariffs: Arc<TariffCatalog>,
    notifier: Arc<dyn Notifier>,
    permissions: Arc<dyn PermissionGate>,
    reconcile: Arc<ReconcileService>,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        tariffs: Arc<TariffCatalog>,
        notifier: Arc<dyn Notifier>,
        permissions: Arc<dyn PermissionGate>,
        reconcile: Arc<ReconcileService>,
    ) -> Self {
        Self {
            store,
            tariffs,
            notifier,
            permissions,
            reconcile,
        }
    }

    pub async fn create(&self, req: CreateBooking) -> Result<Booking, ApiError> {
        validate_interval(req.start_time, req.end_time)?;
        let duration = (req.end_time - req.start_time).num_minutes();

        let pricing = self.tariffs.snapshot();
        let estimated = pricing.table.price(req.service_type, duration, req.guests)?;
        let deposit = pricing.table.deposit(estimated);

        // Advisory pre-check; the insert re-validates atomically.
        if !self
            .store
            .is_available(req.room_id, req.date, req.start_time, req.end_time)
            .await?
        {
            return Err(ApiError::SlotConflict);
        }

        let booking = self
            .store
            .insert_booking(NewBooking {
                code: generate_code(req.date),
                room_id: req.room_id,
                location_id: req.location_id,
                user_id: req.user_id,
                service_type: req.service_type,
                date: req.date,
                start_time: req.start_time,
                end_time: req.end_time,
                guests: req.guests,
                estimated_amount: estimated,
                deposit_amount: deposit,
                note: req.note,
            })
            .await?;

        info!(
            "booking {} created: room {} on {} {}-{}, estimated {} (tariff v{})",
            booking.code, booking.room_id, booking.date, booking.start_time, booking.end_time,
            estimated, pricing.version
        );
        Ok(booking)
    }

    pub async fn get(&self, id: i64) -> Result<Booking, ApiError> {
        self.store.booking(id).await?.ok_or(ApiError::NotFound)
    }

    /// Owner-or-staff read. Strangers get the same opaque denial whether
    /// the booking exists or not.
    pub async fn get_for(&self, id: i64, requester_id: i64) -> Result<Booking, ApiError> {
        let booking = self.get(id).await?;
        if booking.user_id == Some(requester_id) || self.permissions.can_manage_bookings(requester_id).await? {
            Ok(booking)
        } else {
            Err(ApiError::Forbidden)
        }
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Booking>, ApiError> {
        self.store.bookings_for_user(user_id).await
    }

    pub async fn select_payment_method(
        &self,
        booking_id: i64,
        method: PaymentMethod,
    ) -> Result<PaymentSelection, ApiError> {
        let booking = self.get(booking_id).await?;
        let now = Utc::now();
        let transaction_id = format!("{}-{}", booking.code, now.timestamp());

        match method {
            PaymentMethod::Cash => {
                // Full amount is collected at the desk, so the payment row
                // carries the estimate and the deposit is waived.
                match self
                    .store
                    .select_cash(booking_id, &transaction_id, booking.estimated_amount, now)
                    .await?
                {
                    CasOutcome::Applied(confirmed) => {
                        self.notify_confirmed(&confirmed).await;
                        Ok(PaymentSelection::CashConfirmed(confirmed))
                    }
                    CasOutcome::NotApplied(current) if current.status == BookingStatus::Confirmed => {
                        Err(ApiError::AlreadyProcessed)
                    }
                    CasOutcome::NotApplied(_) => {
                        Err(ApiError::Validation("booking is no longer payable".into()))
                    }
                    CasOutcome::NotFound => Err(ApiError::NotFound),
                }
            }
            PaymentMethod::BankTransfer => {
                if booking.status != BookingStatus::Pending {
                    return Err(ApiError::Validation("booking is no longer payable".into()));
                }
                self.store
                    .upsert_payment(booking_id, method, booking.deposit_amount, &transaction_id, now)
                    .await?;
                Ok(PaymentSelection::Transfer(
                    self.reconcile
                        .transfer_instructions(booking.deposit_amount, &booking.code),
                ))
            }
            gateway => {
                if booking.status != BookingStatus::Pending {
                    return Err(ApiError::Validation("booking is no longer payable".into()));
                }
                self.store
                    .upsert_payment(booking_id, gateway, booking.deposit_amount, &transaction_id, now)
                    .await?;
                let payment_url = self.reconcile.build_checkout_url(
                    &transaction_id,
                    booking.deposit_amount,
                    &booking.code,
                )?;
                Ok(PaymentSelection::Checkout { payment_url })
            }
        }
    }

    pub async fn self_cancel(&self, booking_id: i64, requester_id: i64) -> Result<Booking, ApiError> {
        let booking = self.get(booking_id).await?;
        if booking.user_id != Some(requester_id) {
            // Opaque: the caller learns nothing about bookings they do not own.
            return Err(ApiError::Forbidden);
        }
        if !can_self_cancel(booking.starts_at(), Local::now().naive_local()) {
            return Err(ApiError::TooLateToCancel);
        }

        match self
            .store
            .cancel_booking(booking_id, "cancelled by customer")
            .await?
        {
            CasOutcome::Applied(cancelled) => {
                if let Err(e) = self.notifier.booking_cancelled(&cancelled, "cancelled by customer").await {
                    warn!("cancellation email for {} failed: {}", cancelled.code, e);
                }
                Ok(cancelled)
            }
            CasOutcome::NotApplied(current) if current.status == BookingStatus::Cancelled => {
                Err(ApiError::AlreadyProcessed)
            }
            CasOutcome::NotApplied(_) => {
                Err(ApiError::Validation("completed bookings cannot be cancelled".into()))
            }
            CasOutcome::NotFound => Err(ApiError::NotFound),
        }
    }

    /// Guest "I paid" for a bank transfer: records the claim exactly once;
    /// repeated claims and already-confirmed bookings are quiet no-ops.
    pub async fn claim_bank_transfer(&self, booking_id: i64) -> Result<ClaimOutcome, ApiError> {
        let outcome = self.store.claim_deposit(booking_id, Utc::now()).await?;
        match &outcome {
            ClaimOutcome::Claimed => {
                info!("booking {} reported a bank transfer", booking_id);
                if let Err(e) = self
                    .notifier
                    .staff_alert(&format!("booking {} reports a bank transfer, needs review", booking_id))
                    .await
                {
                    warn!("staff alert for claim on {} failed: {}", booking_id, e);
                }
            }
            ClaimOutcome::NotFound => return Err(ApiError::NotFound),
            _ => {}
        }
        Ok(outcome)
    }

    pub async fn admin_confirm_payment(&self, booking_id: i64, staff_id: i64) -> Result<Booking, ApiError> {
        self.require_manage(staff_id).await?;

        // The deposit channel follows the selected method; with no payment
        // row the staff member is recording a cash deposit at the desk.
        let deposit_status = match self.store.payment_for_booking(booking_id).await? {
            Some(p) if p.method == PaymentMethod::Cash => DepositStatus::PaidCash,
            Some(_) => DepositStatus::PaidOnline,
            None => DepositStatus::PaidCash,
        };

        match self
            .store
            .confirm_booking(booking_id, deposit_status, Utc::now())
            .await?
        {
            CasOutcome::Applied(confirmed) => {
                self.notify_confirmed(&confirmed).await;
                Ok(confirmed)
            }
            CasOutcome::NotApplied(current) if current.status == BookingStatus::Confirmed => {
                Err(ApiError::AlreadyProcessed)
            }
            CasOutcome::NotApplied(_) => {
                Err(ApiError::Validation("booking is not awaiting confirmation".into()))
            }
            CasOutcome::NotFound => Err(ApiError::NotFound),
        }
    }

    pub async fn admin_cancel(&self, booking_id: i64, staff_id: i64, reason: &str) -> Result<Booking, ApiError> {
        self.require_manage(staff_id).await?;
        let note = format!("cancelled by staff: {}", reason);
        match self.store.cancel_booking(booking_id, &note).await? {
            CasOutcome::Applied(cancelled) => {
                if let Err(e) = self.notifier.booking_cancelled(&cancelled, reason).await {
                    warn!("cancellation email for {} failed: {}", cancelled.code, e);
                }
                Ok(cancelled)
            }
            CasOutcome::NotApplied(current) if current.status == BookingStatus::Cancelled => {
                Err(ApiError::AlreadyProcessed)
            }
            CasOutcome::NotApplied(_) => {
                Err(ApiError::Validation("completed bookings cannot be cancelled".into()))
            }
            CasOutcome::NotFound => Err(ApiError::NotFound),
        }
    }

    /// Checkout: the booking completes with the actual amount, which is the
    /// estimate plus the overtime surcharge. Early departure adds nothing.
    pub async fn checkout(
        &self,
        booking_id: i64,
        staff_id: i64,
        actual_start_time: Option<NaiveTime>,
        actual_end_time: NaiveTime,
    ) -> Result<Booking, ApiError> {
        self.require_manage(staff_id).await?;
        let booking = self.get(booking_id).await?;

        let started = actual_start_time.unwrap_or(booking.start_time);
        let actual_minutes = (actual_end_time - started).num_minutes();
        if actual_minutes <= 0 {
            return Err(ApiError::Validation("actual end must be after start".into()));
        }

        let pricing = self.tariffs.snapshot();
        let surcharge = pricing.table.surcharge(
            booking.service_type,
            actual_minutes,
            booking.scheduled_minutes(),
            booking.guests,
        )?;
        let actual_amount = booking.estimated_amount + surcharge;

        match self
            .store
            .complete_booking(booking_id, actual_amount, actual_start_time)
            .await?
        {
            CasOutcome::Applied(completed) => {
                info!(
                    "booking {} checked out: actual {} (surcharge {}), remaining {}",
                    completed.code, actual_amount, surcharge, completed.remaining_amount
                );
                Ok(completed)
            }
            CasOutcome::NotApplied(_) => {
                Err(ApiError::Validation("only confirmed bookings can be checked out".into()))
            }
            CasOutcome::NotFound => Err(ApiError::NotFound),
        }
    }

    /// Installs a new tariff table. The version bump is the invalidation
    /// signal: no calculation started afterwards can use the old prices.
    pub async fn replace_tariffs(&self, staff_id: i64, table: crate::pricing::TariffTable) -> Result<u64, ApiError> {
        self.require_manage(staff_id).await?;
        let version = self.tariffs.replace(table);
        info!("tariff catalog replaced, now at version {}", version);
        Ok(version)
    }

    async fn require_manage(&self, staff_id: i64) -> Result<(), ApiError> {
        if !self.permissions.can_manage_bookings(staff_id).await? {
            return Err(ApiError::Forbidden);
        }
        Ok(())
    }

    async fn notify_confirmed(&self, booking: &Booking) {
        if let Err(e) = self.notifier.booking_confirmed(booking).await {
            warn!("confirmation email for {} failed: {}", booking.code, e);
        }
        if let Err(e) = self
            .notifier
            .staff_alert(&format!("booking {} confirmed", booking.code))
            .await
        {
            warn!("staff alert for {} failed: {}", booking.code, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentConfig;
    use crate::notifier::test_support::CountingNotifier;
    use crate::permission_client::test_support::StaticGate;
    use crate::store::memory::MemoryStore;
    use proptest::prelude::*;
    use std::sync::atomic::Ordering;

    fn payment_config() -> PaymentConfig {
        PaymentConfig {
            gateway_url: "https://sandbox.gateway.example/pay".into(),
            gateway_secret: "test-secret".into(),
            return_url: "https://host.example/api/payment/return".into(),
            success_redirect: "https://host.example/booking/success".into(),
            fail_redirect: "https://host.example/booking/failed".into(),
            bank_account: "1234567890".into(),
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        notifier: Arc<CountingNotifier>,
        service: Arc<BookingService>,
    }

    fn harness(can_manage: bool) -> Harness {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let notifier = Arc::new(CountingNotifier::default());
        let reconcile = Arc::new(ReconcileService::new(
            store.clone(),
            notifier.clone(),
            payment_config(),
        ));
        let service = Arc::new(BookingService::new(
            store.clone(),
            Arc::new(TariffCatalog::default()),
            notifier.clone(),
            Arc::new(StaticGate(can_manage)),
            reconcile,
        ));
        Harness {
            store,
            notifier,
            service,
        }
    }

    fn request(start: (u32, u32), end: (u32, u32)) -> CreateBooking {
        CreateBooking {
            room_id: 1,
            location_id: 1,
            user_id: Some(7),
            service_type: ServiceType::Meeting,
            date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            guests: 2,
            note: String::new(),
        }
    }

    fn request_at(starts_at: NaiveDateTime, minutes: i64) -> CreateBooking {
        // Keep the slot inside one calendar day no matter when the test runs.
        let latest = NaiveTime::from_hms_opt(23, 0, 0).unwrap() - Duration::minutes(minutes);
        let starts_at = if starts_at.time() > latest {
            starts_at.date().and_time(latest)
        } else {
            starts_at
        };
        CreateBooking {
            room_id: 9,
            location_id: 1,
            user_id: Some(7),
            service_type: ServiceType::HotDesk,
            date: starts_at.date(),
            start_time: starts_at.time(),
            end_time: starts_at.time() + Duration::minutes(minutes),
            guests: 1,
            note: String::new(),
        }
    }

    #[tokio::test]
    async fn create_prices_from_current_tariffs() {
        let h = harness(false);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();
        assert_eq!(booking.estimated_amount, 150_000);
        assert_eq!(booking.deposit_amount, 45_000);
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.deposit_status, DepositStatus::Pending);
        assert!(booking.code.starts_with("WB-20250110-"));
    }

    #[tokio::test]
    async fn overlapping_create_is_rejected_but_back_to_back_is_not() {
        let h = harness(false);
        h.service.create(request((9, 0), (10, 0))).await.unwrap();

        let err = h.service.create(request((9, 30), (10, 30))).await.unwrap_err();
        assert!(matches!(err, ApiError::SlotConflict));

        // Half-open intervals: 10:00 end does not collide with 10:00 start.
        h.service.create(request((10, 0), (11, 0))).await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_booking_frees_the_slot() {
        let h = harness(false);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();
        h.store.cancel_booking(booking.id, "test").await.unwrap();
        h.service.create(request((9, 0), (10, 0))).await.unwrap();
    }

    #[tokio::test]
    async fn create_rejects_bad_intervals() {
        let h = harness(false);
        let inverted = h.service.create(request((10, 0), (9, 0))).await.unwrap_err();
        assert!(matches!(inverted, ApiError::Validation(_)));
        let empty = h.service.create(request((9, 0), (9, 0))).await.unwrap_err();
        assert!(matches!(empty, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn concurrent_creates_for_one_slot_yield_one_booking() {
        let h = harness(false);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = h.service.clone();
            handles.push(tokio::spawn(async move {
                service.create(request((14, 0), (15, 0))).await
            }));
        }
        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(ApiError::SlotConflict) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn cash_selection_confirms_immediately_and_waives_deposit() {
        let h = harness(false);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();

        let selection = h
            .service
            .select_payment_method(booking.id, PaymentMethod::Cash)
            .await
            .unwrap();
        let confirmed = match selection {
            PaymentSelection::CashConfirmed(b) => b,
            other => panic!("expected cash confirmation, got {other:?}"),
        };
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.deposit_status, DepositStatus::Waived);
        // Nothing was prepaid, so the full estimate is still due.
        assert_eq!(confirmed.remaining_amount, confirmed.estimated_amount);
        assert_eq!(h.notifier.confirmed.load(Ordering::SeqCst), 1);

        // Selecting cash again is a quiet success, not a second email.
        let again = h
            .service
            .select_payment_method(booking.id, PaymentMethod::Cash)
            .await
            .unwrap_err();
        assert!(matches!(again, ApiError::AlreadyProcessed));
        assert_eq!(h.notifier.confirmed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gateway_selection_returns_signed_checkout_url() {
        let h = harness(false);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();

        let selection = h
            .service
            .select_payment_method(booking.id, PaymentMethod::Vnpay)
            .await
            .unwrap();
        let url = match selection {
            PaymentSelection::Checkout { payment_url } => payment_url,
            other => panic!("expected checkout redirect, got {other:?}"),
        };
        assert!(url.starts_with("https://sandbox.gateway.example/pay?"));
        assert!(url.contains("secureHash="));

        let payment = h.store.payment_for_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(payment.method, PaymentMethod::Vnpay);
        assert_eq!(payment.amount, booking.deposit_amount);
        assert!(payment.transaction_id.starts_with(&booking.code));
    }

    #[tokio::test]
    async fn bank_transfer_selection_returns_instructions() {
        let h = harness(false);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();

        let selection = h
            .service
            .select_payment_method(booking.id, PaymentMethod::BankTransfer)
            .await
            .unwrap();
        let instructions = match selection {
            PaymentSelection::Transfer(t) => t,
            other => panic!("expected transfer instructions, got {other:?}"),
        };
        assert_eq!(instructions.transfer_code, booking.code);
        assert_eq!(instructions.amount, booking.deposit_amount);
        assert!(instructions.qr_payload.contains(&booking.code));
    }

    #[test]
    fn self_cancel_deadline_is_inclusive_at_six_hours() {
        let now = NaiveDate::from_ymd_opt(2025, 1, 10)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert!(can_self_cancel(now + Duration::minutes(360), now));
        assert!(!can_self_cancel(now + Duration::minutes(359), now));
        assert!(!can_self_cancel(now - Duration::minutes(1), now));
    }

    #[tokio::test]
    async fn self_cancel_far_ahead_succeeds_and_repeats_as_noop() {
        let h = harness(false);
        let starts = Local::now().naive_local() + Duration::days(2);
        let booking = h.service.create(request_at(starts, 60)).await.unwrap();

        let cancelled = h.service.self_cancel(booking.id, 7).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(h.notifier.cancelled.load(Ordering::SeqCst), 1);

        let again = h.service.self_cancel(booking.id, 7).await.unwrap_err();
        assert!(matches!(again, ApiError::AlreadyProcessed));
        assert_eq!(h.notifier.cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn self_cancel_close_to_start_is_rejected() {
        let h = harness(false);
        let starts = Local::now().naive_local() + Duration::minutes(90);
        let booking = h.service.create(request_at(starts, 60)).await.unwrap();

        let err = h.service.self_cancel(booking.id, 7).await.unwrap_err();
        assert!(matches!(err, ApiError::TooLateToCancel));
    }

    #[tokio::test]
    async fn self_cancel_by_stranger_is_opaquely_forbidden() {
        let h = harness(false);
        let starts = Local::now().naive_local() + Duration::days(2);
        let booking = h.service.create(request_at(starts, 60)).await.unwrap();

        let err = h.service.self_cancel(booking.id, 999).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));

        // Walk-in bookings have no owner, so nobody self-cancels them.
        let mut walk_in = request_at(starts + Duration::days(1), 60);
        walk_in.user_id = None;
        let walk_in = h.service.create(walk_in).await.unwrap();
        let err = h.service.self_cancel(walk_in.id, 7).await.unwrap_err();
        assert!(matches!(err, ApiError::Forbidden));
    }

    #[tokio::test]
    async fn admin_endpoints_require_the_manage_grant() {
        let h = harness(false);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();

        let confirm = h.service.admin_confirm_payment(booking.id, 42).await.unwrap_err();
        assert!(matches!(confirm, ApiError::Forbidden));
        let cancel = h.service.admin_cancel(booking.id, 42, "no-show").await.unwrap_err();
        assert!(matches!(cancel, ApiError::Forbidden));
        let end = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let checkout = h.service.checkout(booking.id, 42, None, end).await.unwrap_err();
        assert!(matches!(checkout, ApiError::Forbidden));
    }

    #[tokio::test]
    async fn admin_confirm_follows_the_selected_method() {
        let h = harness(true);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();
        h.service
            .select_payment_method(booking.id, PaymentMethod::BankTransfer)
            .await
            .unwrap();

        let confirmed = h.service.admin_confirm_payment(booking.id, 42).await.unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.deposit_status, DepositStatus::PaidOnline);
        assert_eq!(
            confirmed.remaining_amount,
            confirmed.estimated_amount - confirmed.deposit_amount
        );
        assert_eq!(h.notifier.confirmed.load(Ordering::SeqCst), 1);

        let again = h.service.admin_confirm_payment(booking.id, 42).await.unwrap_err();
        assert!(matches!(again, ApiError::AlreadyProcessed));
    }

    #[tokio::test]
    async fn admin_confirm_without_payment_row_records_cash() {
        let h = harness(true);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();

        let confirmed = h.service.admin_confirm_payment(booking.id, 42).await.unwrap();
        assert_eq!(confirmed.deposit_status, DepositStatus::PaidCash);
    }

    #[tokio::test]
    async fn checkout_adds_overtime_surcharge() {
        let h = harness(true);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();
        h.service
            .select_payment_method(booking.id, PaymentMethod::Cash)
            .await
            .unwrap();

        // Meeting at 150_000/h, 30 minutes over: surcharge 75_000.
        let end = NaiveTime::from_hms_opt(10, 30, 0).unwrap();
        let completed = h.service.checkout(booking.id, 42, None, end).await.unwrap();
        assert_eq!(completed.status, BookingStatus::Completed);
        assert_eq!(completed.actual_amount, Some(225_000));
        assert_eq!(completed.remaining_amount, 225_000);
    }

    #[tokio::test]
    async fn early_checkout_charges_the_full_estimate() {
        let h = harness(true);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();
        h.service
            .select_payment_method(booking.id, PaymentMethod::Cash)
            .await
            .unwrap();

        let end = NaiveTime::from_hms_opt(9, 20, 0).unwrap();
        let completed = h.service.checkout(booking.id, 42, None, end).await.unwrap();
        assert_eq!(completed.actual_amount, Some(booking.estimated_amount));
    }

    #[tokio::test]
    async fn checkout_requires_a_confirmed_booking() {
        let h = harness(true);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();

        let end = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let err = h.service.checkout(booking.id, 42, None, end).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn claim_ladder_is_idempotent() {
        let h = harness(false);
        let booking = h.service.create(request((9, 0), (10, 0))).await.unwrap();
        h.service
            .select_payment_method(booking.id, PaymentMethod::BankTransfer)
            .await
            .unwrap();

        assert_eq!(
            h.service.claim_bank_transfer(booking.id).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(h.notifier.alerts.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.service.claim_bank_transfer(booking.id).await.unwrap(),
            ClaimOutcome::AlreadyReported
        );
        assert_eq!(h.notifier.alerts.load(Ordering::SeqCst), 1);

        let err = h.service.claim_bank_transfer(99).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn replaced_tariffs_apply_to_new_bookings_only() {
        let h = harness(true);
        let before = h.service.create(request((9, 0), (10, 0))).await.unwrap();

        let mut table = crate::pricing::TariffTable::default();
        if let Some(t) = table.tariffs.get_mut(&ServiceType::Meeting) {
            t.hourly_rate = 200_000;
        }
        let version = h.service.replace_tariffs(42, table).await.unwrap();
        assert_eq!(version, 2);

        let after = h.service.create(request((11, 0), (12, 0))).await.unwrap();
        assert_eq!(before.estimated_amount, 150_000);
        assert_eq!(after.estimated_amount, 200_000);
    }

    proptest! {
        // Whatever sequence of intervals arrives, the set of accepted
        // bookings for a room never contains an overlapping pair.
        #[test]
        fn accepted_bookings_never_overlap(
            slots in prop::collection::vec((0u32..22, 1u32..4), 1..12)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            rt.block_on(async {
                let h = harness(false);
                let mut accepted: Vec<(NaiveTime, NaiveTime)> = Vec::new();
                for (start_h, hours) in slots {
                    let end_h = (start_h + hours).min(23);
                    let req = request((start_h, 0), (end_h, 0));
                    match h.service.create(req).await {
                        Ok(b) => accepted.push((b.start_time, b.end_time)),
                        Err(ApiError::SlotConflict) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
                for (i, a) in accepted.iter().enumerate() {
                    for b in &accepted[i + 1..] {
                        assert!(!crate::availability::overlaps(a.0, a.1, b.0, b.1));
                    }
                }
            });
        }
    }
}
