pub mod admin;
pub mod adventures;
pub mod auth;
pub mod bookings;
pub mod health;
pub mod mpesa;
pub mod payments;

use axum::http::HeaderMap;

use crate::errors::AppError;
use crate::models::AuthContext;
use crate::services::accounts;
use crate::state::AppState;

fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("")
}

/// Resolves the caller from `Authorization: Bearer <token>`.
pub fn require_user(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, AppError> {
    let token = bearer_token(headers);
    let db = state.db();
    accounts::authenticate(&db, token)
}

/// Like [`require_user`], but anonymous callers are fine.
pub fn optional_user(state: &AppState, headers: &HeaderMap) -> Result<Option<AuthContext>, AppError> {
    if bearer_token(headers).is_empty() {
        return Ok(None);
    }
    require_user(state, headers).map(Some)
}

pub fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, AppError> {
    let ctx = require_user(state, headers)?;
    if !ctx.is_admin() {
        return Err(AppError::Unauthorized);
    }
    Ok(ctx)
}
