use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use dorma_domain::{Booking, BookingStatus, PaymentStatus};
use dorma_engine::PaymentOutcome;
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Succeeded,
    Failed,
}

/// Payload the payment processor posts back once a session settles.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    pub booking_id: Uuid,
    pub reference: String,
    pub outcome: WebhookOutcome,
    pub amount: i64,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// POST /v1/webhooks/payments
///
/// Always acks with 200 once the outcome has been applied; flagged states
/// land in the review queue rather than bouncing the provider into
/// redelivery loops.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentWebhook>,
) -> Result<StatusCode, StatusCode> {
    tracing::info!(
        booking_id = %payload.booking_id,
        reference = %payload.reference,
        "received payment webhook"
    );

    let outcome = match payload.outcome {
        WebhookOutcome::Succeeded => PaymentOutcome::Succeeded {
            amount: payload.amount,
        },
        WebhookOutcome::Failed => PaymentOutcome::Failed,
    };

    let booking = state
        .reconciler
        .on_payment_callback(payload.booking_id, &payload.reference, outcome)
        .await
        .map_err(|e| {
            tracing::error!("failed to apply payment webhook: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    record_reconciliation(&state, &booking);
    Ok(StatusCode::OK)
}

pub(crate) fn record_reconciliation(state: &AppState, booking: &Booking) {
    match booking.payment_status {
        PaymentStatus::Paid if booking.status == BookingStatus::Confirmed => {
            state.metrics.bookings_confirmed_total.inc();
        }
        PaymentStatus::Disputed => state.metrics.payment_disputes_total.inc(),
        PaymentStatus::RefundRequired => state.metrics.refunds_required_total.inc(),
        _ => {}
    }
}
