use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use rusqlite::{Connection, TransactionBehavior};
use serde::Deserialize;

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{AuthContext, Booking, BookingStatus, ContactInfo, Page, PageParams};

const REFERENCE_PREFIX: &str = "BK";
const REFERENCE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const REFERENCE_LEN: usize = 8;
const REFERENCE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBooking {
    pub adventure_id: i64,
    pub adventure_date: String,
    pub number_of_people: i64,
    #[serde(flatten)]
    pub contact: ContactInfo,
    pub special_requests: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingFilter {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl BookingFilter {
    fn status(&self) -> Result<Option<BookingStatus>, AppError> {
        parse_status_filter(self.status.as_deref())
    }

    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

pub fn parse_status_filter(status: Option<&str>) -> Result<Option<BookingStatus>, AppError> {
    match status.filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => BookingStatus::parse(s)
            .map(Some)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown booking status: {s}"))),
    }
}

/// `BK` followed by eight characters drawn from the OS CSPRNG.
pub fn generate_reference() -> String {
    let mut rng = OsRng;
    let suffix: String = (0..REFERENCE_LEN)
        .map(|_| REFERENCE_CHARSET[rng.gen_range(0..REFERENCE_CHARSET.len())] as char)
        .collect();
    format!("{REFERENCE_PREFIX}{suffix}")
}

fn unique_reference(conn: &Connection) -> Result<String, AppError> {
    for _ in 0..REFERENCE_ATTEMPTS {
        let reference = generate_reference();
        if !queries::booking_reference_exists(conn, &reference)? {
            return Ok(reference);
        }
        tracing::warn!(reference = %reference, "booking reference collision, regenerating");
    }
    Err(AppError::Busy)
}

/// Accepts RFC 3339 with any offset, or a naive ISO-8601 timestamp taken as UTC.
pub fn parse_adventure_date(raw: &str) -> Result<NaiveDateTime, AppError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc).naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| {
            AppError::InvalidInput(format!(
                "invalid adventure_date '{raw}', expected an ISO 8601 timestamp"
            ))
        })
}

pub fn create_booking(
    conn: &mut Connection,
    ctx: &AuthContext,
    request: &CreateBooking,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    // Stored at whole-second precision; the returned booking must match a later read.
    let now = now.trunc_subsecs(0);
    let adventure_date = parse_adventure_date(&request.adventure_date)?.trunc_subsecs(0);
    if adventure_date <= now {
        return Err(AppError::InvalidInput(
            "adventure_date must be in the future".to_string(),
        ));
    }
    if request.number_of_people < 1 {
        return Err(AppError::InvalidInput(
            "number_of_people must be at least 1".to_string(),
        ));
    }

    let booking = db::retry_on_busy(conn, |conn| {
        // IMMEDIATE takes the write lock up front, so the capacity check and
        // the insert cannot interleave with another writer.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let adventure = queries::get_adventure(&tx, request.adventure_id)?
            .filter(|a| a.is_active)
            .ok_or_else(|| {
                AppError::NotFound(format!("adventure {} not found or inactive", request.adventure_id))
            })?;

        let confirmed = queries::confirmed_people_on_date(&tx, adventure.id, adventure_date.date())?;
        let available = (adventure.max_capacity - confirmed).max(0);
        if request.number_of_people > available {
            return Err(AppError::CapacityExceeded { available });
        }

        let total_amount = adventure
            .price
            .checked_mul(request.number_of_people)
            .ok_or_else(|| AppError::InvalidInput("total amount out of range".to_string()))?;

        let mut booking = Booking {
            id: 0,
            user_id: ctx.user_id(),
            adventure_id: adventure.id,
            booking_reference: unique_reference(&tx)?,
            adventure_date,
            number_of_people: request.number_of_people,
            total_amount,
            special_requests: request
                .special_requests
                .clone()
                .filter(|s| !s.trim().is_empty()),
            status: BookingStatus::Pending,
            customer_name: request
                .contact
                .name
                .clone()
                .unwrap_or_else(|| ctx.user.username.clone()),
            customer_email: request
                .contact
                .email
                .clone()
                .unwrap_or_else(|| ctx.user.email.clone()),
            customer_phone: request
                .contact
                .phone
                .clone()
                .or_else(|| ctx.user.phone_number.clone())
                .unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        booking.id = queries::insert_booking(&tx, &booking)?;
        tx.commit()?;
        Ok(booking)
    })?;

    tracing::info!(
        booking_id = booking.id,
        reference = %booking.booking_reference,
        adventure_id = booking.adventure_id,
        people = booking.number_of_people,
        "booking created"
    );
    Ok(booking)
}

pub fn get_booking(conn: &Connection, ctx: &AuthContext, id: i64) -> Result<Booking, AppError> {
    let booking = queries::get_booking(conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;
    if !ctx.can_act_for(booking.user_id) {
        return Err(AppError::Unauthorized);
    }
    Ok(booking)
}

/// Moves `booking` to `next` if the lifecycle allows it.
fn transition(
    conn: &Connection,
    mut booking: Booking,
    next: BookingStatus,
) -> Result<Booking, AppError> {
    if !booking.status.can_transition_to(next) {
        return Err(AppError::InvalidStateTransition(format!(
            "booking {} is {} and cannot become {}",
            booking.booking_reference,
            booking.status.as_str(),
            next.as_str()
        )));
    }
    queries::update_booking_status(conn, booking.id, next)?;
    tracing::info!(
        booking_id = booking.id,
        from = booking.status.as_str(),
        to = next.as_str(),
        "booking status changed"
    );
    booking.status = next;
    Ok(booking)
}

/// Cancelling a confirmed booking frees its seats: availability is always
/// recomputed from the confirmed bookings that remain.
pub fn cancel_booking(
    conn: &mut Connection,
    ctx: &AuthContext,
    id: i64,
) -> Result<Booking, AppError> {
    set_booking_status(conn, ctx, id, BookingStatus::Cancelled)
}

/// Admin status change, bounded by the same lifecycle as everything else.
pub fn update_booking_status(
    conn: &mut Connection,
    ctx: &AuthContext,
    id: i64,
    next: BookingStatus,
) -> Result<Booking, AppError> {
    if !ctx.is_admin() {
        return Err(AppError::Unauthorized);
    }
    set_booking_status(conn, ctx, id, next)
}

fn set_booking_status(
    conn: &mut Connection,
    ctx: &AuthContext,
    id: i64,
    next: BookingStatus,
) -> Result<Booking, AppError> {
    db::retry_on_busy(conn, |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let booking = get_booking(&tx, ctx, id)?;
        let booking = transition(&tx, booking, next)?;
        tx.commit()?;
        Ok(booking)
    })
}

pub fn list_bookings(
    conn: &Connection,
    ctx: &AuthContext,
    filter: &BookingFilter,
) -> Result<Page<Booking>, AppError> {
    let page = filter.page_params();
    let (bookings, total) =
        queries::list_bookings(conn, Some(ctx.user_id()), filter.status()?, &page)?;
    Ok(Page::new(bookings, total, &page))
}

pub fn list_all_bookings(
    conn: &Connection,
    ctx: &AuthContext,
    filter: &BookingFilter,
) -> Result<Page<Booking>, AppError> {
    if !ctx.is_admin() {
        return Err(AppError::Unauthorized);
    }
    let page = filter.page_params();
    let (bookings, total) = queries::list_bookings(conn, None, filter.status()?, &page)?;
    Ok(Page::new(bookings, total, &page))
}
