use crate::booking::BookingStatus;
use crate::unit::GenderPolicy;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("conflicting write")]
    Conflict,

    /// Transient backend failure; retried with backoff at the
    /// orchestrator boundary.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    /// The ledger had no free slot at reservation time. Recoverable by
    /// the user (pick another unit), not retried automatically.
    #[error("no free slot in this unit, someone else just booked it")]
    RoomUnavailable,

    #[error("unit policy {policy} does not admit this tenant")]
    PolicyViolation { policy: GenderPolicy },

    #[error("booking not found")]
    NotFound,

    #[error("not permitted for this actor")]
    NotPermitted,

    #[error("invalid booking terms: {0}")]
    InvalidTerms(String),

    #[error("booking is not flagged for review")]
    NotFlagged,

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("payment provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
