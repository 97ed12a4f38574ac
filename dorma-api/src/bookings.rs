use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use dorma_domain::{Booking, BookingError, BookingTerms};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::decode_claims;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub unit_id: Uuid,
    pub semester: String,
    pub duration_months: i32,
}

#[derive(Debug, Serialize)]
struct BookingResponse {
    booking: Booking,
    payment_reference: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(request_booking))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/verify-payment", post(verify_payment))
}

async fn request_booking(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let claims = decode_claims(bearer.token(), &state.auth.secret)?;
    let terms = BookingTerms {
        semester: req.semester,
        duration_months: req.duration_months,
    };

    match state
        .orchestrator
        .request_booking(&claims, req.unit_id, &terms)
        .await
    {
        Ok(receipt) => {
            state.metrics.bookings_placed_total.inc();
            Ok(Json(BookingResponse {
                booking: receipt.booking,
                payment_reference: receipt.payment_reference,
            }))
        }
        Err(e) => {
            if matches!(e, BookingError::RoomUnavailable) {
                state.metrics.reservation_conflicts_total.inc();
            }
            Err(e.into())
        }
    }
}

async fn get_booking(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let claims = decode_claims(bearer.token(), &state.auth.secret)?;
    let booking = state.orchestrator.get_booking(id, &claims).await?;
    Ok(Json(booking))
}

async fn cancel_booking(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let claims = decode_claims(bearer.token(), &state.auth.secret)?;
    let booking = state.orchestrator.cancel_booking(id, &claims).await?;
    Ok(Json(booking))
}

/// Pull-based reconciliation for when the webhook never arrived.
async fn verify_payment(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let claims = decode_claims(bearer.token(), &state.auth.secret)?;
    let booking = state.orchestrator.get_booking(id, &claims).await?;

    let reference = booking.payment_reference.clone().ok_or_else(|| {
        AppError::ValidationError("booking has no payment reference".to_string())
    })?;

    let updated = state.reconciler.verify_payment(id, &reference).await?;
    crate::webhooks::record_reconciliation(&state, &updated);
    Ok(Json(updated))
}
