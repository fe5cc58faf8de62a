//! Half-open interval overlap for slot availability.
//!
//! The pure predicate is only an advisory pre-check: two concurrent callers
//! can both pass it before either inserts. The store re-validates inside
//! the same transaction that inserts the row (see `BookingStore`).

use chrono::NaiveTime;

use crate::errors::ApiError;

/// Half-open overlap: [a_start, a_end) intersects [b_start, b_end).
pub fn overlaps(a_start: NaiveTime, a_end: NaiveTime, b_start: NaiveTime, b_end: NaiveTime) -> bool {
    a_start < b_end && b_start < a_end
}

/// Validates a requested interval before any pricing or storage work.
pub fn validate_interval(start: NaiveTime, end: NaiveTime) -> Result<(), ApiError> {
    if start >= end {
        return Err(ApiError::Validation("startTime must be before endTime".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn half_open_overlap_table() {
        // Partial overlap both directions.
        assert!(overlaps(t(9, 0), t(10, 0), t(9, 30), t(10, 30)));
        assert!(overlaps(t(9, 30), t(10, 30), t(9, 0), t(10, 0)));
        // Containment.
        assert!(overlaps(t(9, 0), t(12, 0), t(10, 0), t(11, 0)));
        // Identical.
        assert!(overlaps(t(9, 0), t(10, 0), t(9, 0), t(10, 0)));
        // Back-to-back slots do not collide: [9,10) then [10,11).
        assert!(!overlaps(t(9, 0), t(10, 0), t(10, 0), t(11, 0)));
        assert!(!overlaps(t(10, 0), t(11, 0), t(9, 0), t(10, 0)));
        // Disjoint.
        assert!(!overlaps(t(9, 0), t(10, 0), t(14, 0), t(15, 0)));
    }

    #[test]
    fn interval_must_be_forward() {
        assert!(validate_interval(t(9, 0), t(10, 0)).is_ok());
        assert!(validate_interval(t(10, 0), t(9, 0)).is_err());
        assert!(validate_interval(t(9, 0), t(9, 0)).is_err());
    }
}
