use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use dorma_domain::{Booking, Role};
use dorma_engine::Resolution;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::decode_claims;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    resolution: Resolution,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/bookings/flagged", get(list_flagged))
        .route("/v1/admin/bookings/{id}/resolve", post(resolve_booking))
}

/// The manual review queue: disputed amounts and post-expiry payments.
async fn list_flagged(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let claims = decode_claims(bearer.token(), &state.auth.secret)?;
    if claims.role != Role::Admin {
        return Err(AppError::AuthorizationError(
            "admin role required".to_string(),
        ));
    }

    let flagged = state
        .bookings
        .list_flagged()
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    Ok(Json(flagged))
}

async fn resolve_booking(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Booking>, AppError> {
    let claims = decode_claims(bearer.token(), &state.auth.secret)?;
    let booking = state
        .reconciler
        .resolve_flag(id, req.resolution, &claims)
        .await?;
    Ok(Json(booking))
}
