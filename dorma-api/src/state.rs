use std::sync::Arc;

use dorma_domain::repository::BookingStore;
use dorma_engine::{BookingOrchestrator, ChangeFeed, HoldManager, PaymentReconciler};
use dorma_ledger::AvailabilityLedger;

use crate::metrics::EngineMetrics;

#[derive(Clone)]
pub struct AuthSettings {
    pub secret: String,
    pub expiration_seconds: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<dyn BookingStore>,
    pub ledger: Arc<AvailabilityLedger>,
    pub holds: Arc<HoldManager>,
    pub orchestrator: Arc<BookingOrchestrator>,
    pub reconciler: Arc<PaymentReconciler>,
    pub feed: ChangeFeed,
    pub auth: AuthSettings,
    pub metrics: Arc<EngineMetrics>,
}
