use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::errors::AppError;
use crate::models::User;
use crate::services::accounts::{self, Credentials, Login, RegisterUser};
use crate::state::AppState;

// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterUser>,
) -> Result<(StatusCode, Json<Credentials>), AppError> {
    // Hash before taking the connection lock.
    let password_hash =
        accounts::hash_password(&body.password, state.config.password_hash_cost).await?;
    let registered = {
        let db = state.db();
        accounts::register(&db, &body, &password_hash)?
    };
    Ok((StatusCode::CREATED, Json(registered)))
}

// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Login>,
) -> Result<Json<Credentials>, AppError> {
    Ok(Json(accounts::login(&state, &body).await?))
}

// GET /api/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<User>, AppError> {
    let ctx = super::require_user(&state, &headers)?;
    Ok(Json(ctx.user))
}
