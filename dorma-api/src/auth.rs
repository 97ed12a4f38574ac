use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use dorma_domain::{Claims, Gender, Role};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

/// Decode and verify a bearer token into claims. Identity itself is an
/// external collaborator; this layer only checks the signature and expiry.
pub fn decode_claims(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::AuthenticationError(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    sub: String,
    role: Role,
    gender: Option<Gender>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
    expires_at: i64,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/token", post(issue_token))
}

/// Dev-mode token mint standing in for the real identity provider.
async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let expires_at = Utc::now().timestamp() + state.auth.expiration_seconds as i64;
    let claims = Claims {
        sub: req.sub,
        role: req.role,
        gender: req.gender,
        exp: expires_at as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.auth.secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    Ok(Json(TokenResponse { token, expires_at }))
}
