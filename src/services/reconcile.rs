//! Payment reconciler: the gateway redirect, the gateway webhook and the
//! manual bank-transfer path all converge on one Booking+Payment pair.
//! Every inbound notification is verified against the shared secret, then
//! applied through the store's idempotent compare-and-swap keyed by the
//! external transaction reference — whichever notification lands first
//! wins, replays are acknowledged no-ops.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::PaymentConfig;
use crate::errors::ApiError;
use crate::models::Booking;
use crate::notifier::Notifier;
use crate::store::{ApplyOutcome, BookingStore};

/// Canonical signature over gateway parameters: keys sorted
/// lexicographically, `key=value` pairs joined with `&` (the signature
/// field itself excluded), the shared secret appended, SHA-256, lowercase
/// hex.
pub fn sign_params<'a, I>(params: I, secret: &str) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let sorted: BTreeMap<&str, &str> = params.into_iter().collect();
    let canonical = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A verified gateway callback (return redirect or webhook — same signed
/// contract for both).
#[derive(Debug)]
pub struct GatewayCallback {
    pub transaction_id: String,
    pub amount: i64,
    pub response_code: String,
}

fn verify_callback(params: &HashMap<String, String>, secret: &str) -> Result<GatewayCallback, ApiError> {
    let received_hash = params.get("secureHash").ok_or(ApiError::BadSignature)?;

    let expected = sign_params(
        params
            .iter()
            .filter(|(k, _)| k.as_str() != "secureHash")
            .map(|(k, v)| (k.as_str(), v.as_str())),
        secret,
    );
    if !expected.eq_ignore_ascii_case(received_hash) {
        return Err(ApiError::BadSignature);
    }

    let transaction_id = params
        .get("txnRef")
        .ok_or_else(|| ApiError::Validation("missing txnRef".into()))?
        .clone();
    let amount = params
        .get("amount")
        .and_then(|a| a.parse::<i64>().ok())
        .ok_or_else(|| ApiError::Validation("missing or invalid amount".into()))?;
    let response_code = params.get("rspCode").cloned().unwrap_or_default();

    Ok(GatewayCallback {
        transaction_id,
        amount,
        response_code,
    })
}

/// What a callback did. The webhook handler turns this into the gateway's
/// `{RspCode, Message}` acknowledgment; the return handler turns it into a
/// browser redirect. Rejections are still acknowledged so the gateway does
/// not retry forever.
#[derive(Debug)]
pub enum CallbackOutcome {
    /// This call completed the payment (and possibly confirmed the booking).
    Applied(Box<Booking>),
    /// Payment already COMPLETED by an earlier notification; no-op.
    AlreadyProcessed,
    /// The gateway reported a failed/cancelled payment; recorded FAILED.
    GatewayFailure,
    BadSignature,
    AmountMismatch,
    UnknownReference,
}

impl CallbackOutcome {
    pub fn ack(&self) -> GatewayAck {
        match self {
            CallbackOutcome::Applied(_) => GatewayAck::new("00", "Confirm Success"),
            CallbackOutcome::AlreadyProcessed => GatewayAck::new("02", "Order already confirmed"),
            CallbackOutcome::GatewayFailure => GatewayAck::new("00", "Acknowledged"),
            CallbackOutcome::UnknownReference => GatewayAck::new("01", "Order not found"),
            CallbackOutcome::AmountMismatch => GatewayAck::new("04", "Invalid amount"),
            CallbackOutcome::BadSignature => GatewayAck::new("97", "Invalid signature"),
        }
    }

    /// Whether the paying customer should land on the success page.
    pub fn is_success(&self) -> bool {
        matches!(self, CallbackOutcome::Applied(_) | CallbackOutcome::AlreadyProcessed)
    }
}

#[derive(Debug, Serialize)]
pub struct GatewayAck {
    #[serde(rename = "RspCode")]
    pub rsp_code: &'static str,
    #[serde(rename = "Message")]
    pub message: &'static str,
}

impl GatewayAck {
    pub fn new(rsp_code: &'static str, message: &'static str) -> Self {
        Self { rsp_code, message }
    }
}

/// Bank-QR payload handed to the guest when they pick BANK_TRANSFER.
#[derive(Debug, Serialize)]
pub struct TransferInstructions {
    pub transfer_code: String,
    pub amount: i64,
    pub qr_payload: String,
}

pub struct ReconcileService {
    store: Arc<dyn BookingStore>,
    notifier: Arc<dyn Notifier>,
    config: PaymentConfig,
}

impl ReconcileService {
    pub fn new(store: Arc<dyn BookingStore>, notifier: Arc<dyn Notifier>, config: PaymentConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Signed checkout URL for the gateway redirect.
    pub fn build_checkout_url(
        &self,
        transaction_id: &str,
        amount: i64,
        booking_code: &str,
    ) -> Result<String, ApiError> {
        let amount_str = amount.to_string();
        let params = vec![
            ("txnRef", transaction_id),
            ("amount", amount_str.as_str()),
            ("orderInfo", booking_code),
            ("returnUrl", self.config.return_url.as_str()),
        ];
        let hash = sign_params(params.iter().copied(), &self.config.gateway_secret);
        let mut signed: Vec<(&str, &str)> = params;
        signed.push(("secureHash", hash.as_str()));
        let query = serde_urlencoded::to_string(&signed)
            .map_err(|e| ApiError::Internal(e.into()))?;
        Ok(format!("{}?{}", self.config.gateway_url, query))
    }

    pub fn transfer_instructions(&self, amount: i64, booking_code: &str) -> TransferInstructions {
        TransferInstructions {
            transfer_code: booking_code.to_string(),
            amount,
            qr_payload: format!(
                "bank://{}?amount={}&memo={}",
                self.config.bank_account, amount, booking_code
            ),
        }
    }

    /// Handles a signed gateway callback — return redirect and webhook go
    /// through the same path, so whichever arrives first applies the
    /// transition and the other sees `AlreadyProcessed`.
    pub async fn handle_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackOutcome, ApiError> {
        let raw = serde_json::to_value(params).unwrap_or_default();

        let callback = match verify_callback(params, &self.config.gateway_secret) {
            Ok(cb) => cb,
            Err(ApiError::BadSignature) => {
                warn!("gateway callback rejected: bad signature");
                if let Some(txn) = params.get("txnRef") {
                    self.record_failure(txn, raw).await;
                }
                return Ok(CallbackOutcome::BadSignature);
            }
            Err(e) => {
                warn!("gateway callback rejected: {}", e);
                return Ok(CallbackOutcome::UnknownReference);
            }
        };

        let Some(payment) = self.store.payment_by_transaction(&callback.transaction_id).await? else {
            warn!("gateway callback for unknown reference {}", callback.transaction_id);
            return Ok(CallbackOutcome::UnknownReference);
        };

        if payment.amount != callback.amount {
            warn!(
                "amount mismatch for {}: reported {}, stored {}",
                callback.transaction_id, callback.amount, payment.amount
            );
            self.record_failure(&callback.transaction_id, raw).await;
            return Ok(CallbackOutcome::AmountMismatch);
        }

        if callback.response_code != "00" {
            info!(
                "gateway reported failure {} for {}",
                callback.response_code, callback.transaction_id
            );
            self.record_failure(&callback.transaction_id, raw).await;
            return Ok(CallbackOutcome::GatewayFailure);
        }

        match self
            .store
            .apply_gateway_success(&callback.transaction_id, Utc::now(), raw)
            .await?
        {
            ApplyOutcome::Applied {
                booking,
                confirmed_now,
                ..
            } => {
                info!(
                    "payment {} completed for booking {}",
                    callback.transaction_id, booking.code
                );
                // The email is gated on this call having performed the
                // PENDING -> CONFIRMED transition, not on the call itself.
                if confirmed_now {
                    self.notify_confirmed(&booking).await;
                }
                Ok(CallbackOutcome::Applied(Box::new(booking)))
            }
            ApplyOutcome::AlreadyProcessed => {
                info!("replayed notification for {}, no-op", callback.transaction_id);
                Ok(CallbackOutcome::AlreadyProcessed)
            }
            ApplyOutcome::NotFound => Ok(CallbackOutcome::UnknownReference),
        }
    }

    pub fn success_redirect(&self) -> &str {
        &self.config.success_redirect
    }

    pub fn fail_redirect(&self) -> &str {
        &self.config.fail_redirect
    }

    async fn record_failure(&self, transaction_id: &str, raw: serde_json::Value) {
        if let Err(e) = self.store.record_payment_failure(transaction_id, raw).await {
            warn!("could not record payment failure for {}: {}", transaction_id, e);
        }
    }

    async fn notify_confirmed(&self, booking: &Booking) {
        if let Err(e) = self.notifier.booking_confirmed(booking).await {
            warn!("confirmation email for {} failed: {}", booking.code, e);
        }
        if let Err(e) = self
            .notifier
            .staff_alert(&format!("booking {} paid and confirmed", booking.code))
            .await
        {
            warn!("staff alert for {} failed: {}", booking.code, e);
        }
    }
}
