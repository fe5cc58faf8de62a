//! Tariff catalog and price computation.
//!
//! All amounts are integer smallest-currency-units and every division
//! truncates — pricing never rounds up. The catalog is a versioned
//! snapshot: admin edits install a new table and bump the version, so a
//! calculation that started before the edit keeps its own consistent view
//! and nothing started after the edit sees a stale tariff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::errors::ApiError;
use crate::models::ServiceType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tariff {
    /// Base rate for one hour of occupancy.
    pub hourly_rate: i64,
    /// Extra hourly rate per guest beyond `included_guests`.
    pub per_guest_hourly: i64,
    pub included_guests: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffTable {
    pub tariffs: HashMap<ServiceType, Tariff>,
    /// Deposit as a percentage of the estimated amount, truncated.
    pub deposit_rate_pct: i64,
}

impl Default for TariffTable {
    fn default() -> Self {
        let mut tariffs = HashMap::new();
        tariffs.insert(ServiceType::HotDesk, Tariff { hourly_rate: 50_000, per_guest_hourly: 0, included_guests: 1 });
        tariffs.insert(ServiceType::DedicatedDesk, Tariff { hourly_rate: 80_000, per_guest_hourly: 0, included_guests: 1 });
        tariffs.insert(ServiceType::Meeting, Tariff { hourly_rate: 150_000, per_guest_hourly: 10_000, included_guests: 4 });
        tariffs.insert(ServiceType::Event, Tariff { hourly_rate: 400_000, per_guest_hourly: 15_000, included_guests: 20 });
        TariffTable { tariffs, deposit_rate_pct: 30 }
    }
}

impl TariffTable {
    pub fn price(&self, service_type: ServiceType, duration_minutes: i64, guests: i32) -> Result<i64, ApiError> {
        if duration_minutes <= 0 {
            return Err(ApiError::Validation("duration must be positive".into()));
        }
        if guests <= 0 {
            return Err(ApiError::Validation("guests must be positive".into()));
        }
        let tariff = self
            .tariffs
            .get(&service_type)
            .ok_or_else(|| ApiError::Validation("no tariff for service type".into()))?;

        let extra_guests = (guests - tariff.included_guests).max(0) as i64;
        let base = tariff.hourly_rate * duration_minutes / 60;
        let per_guest = tariff.per_guest_hourly * extra_guests * duration_minutes / 60;
        Ok(base + per_guest)
    }

    pub fn deposit(&self, amount: i64) -> i64 {
        amount * self.deposit_rate_pct / 100
    }

    /// Surcharge for occupancy beyond the scheduled duration. Leaving early
    /// never yields a refund: the surcharge is zero, not negative.
    pub fn surcharge(
        &self,
        service_type: ServiceType,
        actual_minutes: i64,
        scheduled_minutes: i64,
        guests: i32,
    ) -> Result<i64, ApiError> {
        let overtime = actual_minutes - scheduled_minutes;
        if overtime <= 0 {
            return Ok(0);
        }
        self.price(service_type, overtime, guests)
    }
}

/// A consistent view of the catalog captured at the start of a calculation.
#[derive(Clone)]
pub struct TariffSnapshot {
    pub table: Arc<TariffTable>,
    pub version: u64,
}

pub struct TariffCatalog {
    table: RwLock<Arc<TariffTable>>,
    version: AtomicU64,
}

impl TariffCatalog {
    pub fn new(table: TariffTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
            version: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> TariffSnapshot {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner()).clone();
        TariffSnapshot {
            table,
            version: self.version.load(Ordering::Acquire),
        }
    }

    /// Installs a new table and bumps the version token. Returns the new
    /// version so the caller can log the invalidation.
    pub fn replace(&self, table: TariffTable) -> u64 {
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(table);
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for TariffCatalog {
    fn default() -> Self {
        Self::new(TariffTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_truncates_down() {
        let table = TariffTable::default();
        assert_eq!(table.price(ServiceType::Meeting, 50, 2).unwrap(), 125_000);
        // 41 min of MEETING: 150_000 * 41 / 60 = 102_500 exactly.
        assert_eq!(table.price(ServiceType::Meeting, 41, 2).unwrap(), 102_500);
        // 1 minute of HOT_DESK: 50_000/60 = 833.33 -> 833.
        assert_eq!(table.price(ServiceType::HotDesk, 1, 1).unwrap(), 833);
    }

    #[test]
    fn price_charges_extra_guests() {
        let table = TariffTable::default();
        // 4 guests included; 6 guests for 60 min adds 2 * 10_000.
        assert_eq!(table.price(ServiceType::Meeting, 60, 6).unwrap(), 170_000);
        assert_eq!(table.price(ServiceType::Meeting, 60, 4).unwrap(), 150_000);
    }

    #[test]
    fn non_positive_duration_is_validation_error() {
        let table = TariffTable::default();
        assert!(matches!(
            table.price(ServiceType::Meeting, 0, 2),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            table.price(ServiceType::Meeting, -30, 2),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn deposit_truncates() {
        let table = TariffTable::default();
        assert_eq!(table.deposit(100_000), 30_000);
        assert_eq!(table.deposit(101), 30);
        assert_eq!(table.deposit(3), 0);
    }

    #[test]
    fn surcharge_only_for_overtime() {
        let table = TariffTable::default();
        // 30 minutes over on a MEETING with 2 guests: 150_000 * 30/60.
        assert_eq!(table.surcharge(ServiceType::Meeting, 90, 60, 2).unwrap(), 75_000);
        // Early departure is not refunded.
        assert_eq!(table.surcharge(ServiceType::Meeting, 45, 60, 2).unwrap(), 0);
        assert_eq!(table.surcharge(ServiceType::Meeting, 60, 60, 2).unwrap(), 0);
    }

    #[test]
    fn replace_bumps_version_and_takes_effect() {
        let catalog = TariffCatalog::default();
        let before = catalog.snapshot();
        let price_before = before.table.price(ServiceType::Meeting, 60, 2).unwrap();

        let mut edited = TariffTable::default();
        edited
            .tariffs
            .insert(ServiceType::Meeting, Tariff { hourly_rate: 200_000, per_guest_hourly: 10_000, included_guests: 4 });
        let new_version = catalog.replace(edited);

        let after = catalog.snapshot();
        assert!(new_version > before.version);
        assert_eq!(after.version, new_version);
        assert_eq!(after.table.price(ServiceType::Meeting, 60, 2).unwrap(), 200_000);
        // The snapshot captured before the edit keeps its own view.
        assert_eq!(before.table.price(ServiceType::Meeting, 60, 2).unwrap(), price_before);
    }
}
