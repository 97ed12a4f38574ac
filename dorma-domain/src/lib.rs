pub mod booking;
pub mod error;
pub mod events;
pub mod identity;
pub mod payment;
pub mod repository;
pub mod unit;

pub use booking::{Booking, BookingStatus, BookingTerms, PaymentStatus};
pub use error::{BookingError, StoreError};
pub use events::FeedEvent;
pub use identity::{Claims, Gender, Role};
pub use unit::{AvailabilitySnapshot, GenderPolicy, Unit};
