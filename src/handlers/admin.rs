use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{Adventure, Booking, BookingStatus, Page, Payment, User, UserDetail};
use crate::services::accounts::{self, UserFilter};
use crate::services::booking::{self, BookingFilter};
use crate::services::catalog::{self, ListingStatus};
use crate::services::reconciliation::{self, PaymentFilter};
use crate::state::AppState;

// GET /api/admin/users
pub async fn get_users(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Page<User>>, AppError> {
    let ctx = super::require_admin(&state, &headers)?;
    let db = state.db();
    Ok(Json(accounts::list_users(&db, &ctx, &filter)?))
}

// GET /api/admin/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<UserDetail>, AppError> {
    let ctx = super::require_admin(&state, &headers)?;
    let db = state.db();
    Ok(Json(accounts::get_user(&db, &ctx, id)?))
}

// PUT /api/admin/users/:id/toggle-admin
pub async fn toggle_admin(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<User>, AppError> {
    let ctx = super::require_admin(&state, &headers)?;
    let db = state.db();
    Ok(Json(accounts::toggle_admin(&db, &ctx, id)?))
}

// GET /api/admin/adventures?status=active|inactive|all
#[derive(Deserialize)]
pub struct AdventuresQuery {
    #[serde(default)]
    pub status: ListingStatus,
}

pub async fn get_adventures(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdventuresQuery>,
) -> Result<Json<Vec<Adventure>>, AppError> {
    let ctx = super::require_admin(&state, &headers)?;
    let db = state.db();
    Ok(Json(catalog::list_all_adventures(&db, &ctx, query.status)?))
}

// PUT /api/admin/adventures/:id/toggle-status
pub async fn toggle_adventure_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Adventure>, AppError> {
    let ctx = super::require_admin(&state, &headers)?;
    let db = state.db();
    Ok(Json(catalog::toggle_adventure_status(&db, &ctx, id)?))
}

// GET /api/admin/bookings
pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<BookingFilter>,
) -> Result<Json<Page<Booking>>, AppError> {
    let ctx = super::require_admin(&state, &headers)?;
    let db = state.db();
    Ok(Json(booking::list_all_bookings(&db, &ctx, &filter)?))
}

// PUT /api/admin/bookings/:id
#[derive(Deserialize)]
pub struct UpdateBookingStatus {
    pub status: String,
}

pub async fn update_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateBookingStatus>,
) -> Result<Json<Booking>, AppError> {
    let ctx = super::require_admin(&state, &headers)?;
    let next = BookingStatus::parse(body.status.trim())
        .ok_or_else(|| AppError::InvalidInput(format!("unknown booking status: {}", body.status)))?;
    let mut db = state.db();
    Ok(Json(booking::update_booking_status(&mut db, &ctx, id, next)?))
}

// GET /api/admin/payments
pub async fn get_payments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<PaymentFilter>,
) -> Result<Json<Page<Payment>>, AppError> {
    let ctx = super::require_admin(&state, &headers)?;
    let db = state.db();
    Ok(Json(reconciliation::list_all_payments(&db, &ctx, &filter)?))
}
