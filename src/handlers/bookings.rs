use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;

use crate::errors::AppError;
use crate::models::{Booking, Page, Payment};
use crate::services::booking::{self, BookingFilter, CreateBooking};
use crate::services::reconciliation::{self, InitiatePayment};
use crate::state::AppState;

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBooking>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let mut db = state.db();
    let booking = booking::create_booking(&mut db, &ctx, &body, Utc::now().naive_utc())?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<BookingFilter>,
) -> Result<Json<Page<Booking>>, AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let db = state.db();
    Ok(Json(booking::list_bookings(&db, &ctx, &filter)?))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Booking>, AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let db = state.db();
    Ok(Json(booking::get_booking(&db, &ctx, id)?))
}

// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Booking>, AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let mut db = state.db();
    Ok(Json(booking::cancel_booking(&mut db, &ctx, id)?))
}

// POST /api/bookings/initiate-payment
pub async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<InitiatePayment>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let payment = reconciliation::initiate_payment(&state, &ctx, &body).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}
