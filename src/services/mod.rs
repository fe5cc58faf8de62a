pub mod bookings;
pub mod reaper;
pub mod reconcile;
