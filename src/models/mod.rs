pub mod booking;
pub mod payment;

pub use booking::{Booking, BookingStatus, DepositStatus, NewBooking, ServiceType};
pub use payment::{Payment, PaymentMethod, PaymentStatus};
