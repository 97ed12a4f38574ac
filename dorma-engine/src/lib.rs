pub mod feed;
pub mod holds;
pub mod orchestrator;
pub mod reconciler;

pub use feed::ChangeFeed;
pub use holds::HoldManager;
pub use orchestrator::{BookingOrchestrator, BookingReceipt};
pub use reconciler::{PaymentOutcome, PaymentReconciler, Resolution};

/// Product rules the engine runs under, mapped from configuration.
#[derive(Debug, Clone)]
pub struct BookingRules {
    /// How long a hold keeps a slot occupied pending payment.
    pub hold_ttl: chrono::Duration,
    pub currency: String,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            hold_ttl: chrono::Duration::hours(24),
            currency: "EUR".to_string(),
        }
    }
}
