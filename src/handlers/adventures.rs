use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{Adventure, AdventurePatch, NewAdventure};
use crate::services::catalog::{self, Availability};
use crate::state::AppState;

// GET /api/adventures
pub async fn list_adventures(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Adventure>>, AppError> {
    let db = state.db();
    Ok(Json(catalog::list_active(&db)?))
}

// GET /api/adventures/my-adventures
pub async fn my_adventures(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Adventure>>, AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let db = state.db();
    Ok(Json(catalog::list_owned(&db, &ctx)?))
}

// GET /api/adventures/:id
pub async fn get_adventure(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Adventure>, AppError> {
    let ctx = super::optional_user(&state, &headers)?;
    let db = state.db();
    Ok(Json(catalog::get_adventure(&db, ctx.as_ref(), id)?))
}

// POST /api/adventures
pub async fn create_adventure(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewAdventure>,
) -> Result<(StatusCode, Json<Adventure>), AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let db = state.db();
    let adventure = catalog::create_adventure(&db, &ctx, &body)?;
    Ok((StatusCode::CREATED, Json(adventure)))
}

// PUT /api/adventures/:id
pub async fn update_adventure(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<AdventurePatch>,
) -> Result<Json<Adventure>, AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let mut db = state.db();
    Ok(Json(catalog::update_adventure(&mut db, &ctx, id, body)?))
}

// DELETE /api/adventures/:id
pub async fn delete_adventure(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Adventure>, AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let db = state.db();
    Ok(Json(catalog::deactivate_adventure(&db, &ctx, id)?))
}

// GET /api/adventures/:id/availability?date=YYYY-MM-DD
#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub date: String,
}

pub async fn availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Availability>, AppError> {
    let db = state.db();
    Ok(Json(catalog::availability(&db, id, &query.date)?))
}
