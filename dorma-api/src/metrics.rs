use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

use crate::state::AppState;

pub struct EngineMetrics {
    registry: Registry,
    pub bookings_placed_total: IntCounter,
    pub bookings_confirmed_total: IntCounter,
    pub reservation_conflicts_total: IntCounter,
    pub holds_expired_total: IntCounter,
    pub payment_disputes_total: IntCounter,
    pub refunds_required_total: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let bookings_placed_total = IntCounter::new(
            "dorma_bookings_placed_total",
            "Bookings successfully placed on hold",
        )?;
        let bookings_confirmed_total = IntCounter::new(
            "dorma_bookings_confirmed_total",
            "Bookings confirmed by payment",
        )?;
        let reservation_conflicts_total = IntCounter::new(
            "dorma_reservation_conflicts_total",
            "Booking requests rejected because the unit was full",
        )?;
        let holds_expired_total = IntCounter::new(
            "dorma_holds_expired_total",
            "Holds expired by the sweep",
        )?;
        let payment_disputes_total = IntCounter::new(
            "dorma_payment_disputes_total",
            "Payments flagged for amount mismatch",
        )?;
        let refunds_required_total = IntCounter::new(
            "dorma_refunds_required_total",
            "Payments that landed after the hold was released",
        )?;

        registry.register(Box::new(bookings_placed_total.clone()))?;
        registry.register(Box::new(bookings_confirmed_total.clone()))?;
        registry.register(Box::new(reservation_conflicts_total.clone()))?;
        registry.register(Box::new(holds_expired_total.clone()))?;
        registry.register(Box::new(payment_disputes_total.clone()))?;
        registry.register(Box::new(refunds_required_total.clone()))?;

        Ok(Self {
            registry,
            bookings_placed_total,
            bookings_confirmed_total,
            reservation_conflicts_total,
            holds_expired_total,
            payment_disputes_total,
            refunds_required_total,
        })
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
        Ok(()) => (StatusCode::OK, buffer).into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
