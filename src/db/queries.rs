use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::models::{
    Adventure, Booking, BookingStatus, NewAdventure, PageParams, Payment, PaymentStatus, User,
    UserStatistics,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_ts(dt: &NaiveDateTime) -> String {
    dt.format(TS_FORMAT).to_string()
}

fn now_ts() -> String {
    format_ts(&Utc::now().naive_utc())
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn bad_enum(idx: usize, kind: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown {kind}: {value}").into(),
    )
}

/// WHERE-clause accumulator for the filtered list queries.
#[derive(Default)]
struct Filter {
    clauses: Vec<&'static str>,
    values: Vec<Value>,
}

impl Filter {
    fn push(&mut self, clause: &'static str, value: impl Into<Value>) {
        self.clauses.push(clause);
        self.values.push(value.into());
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn count(&self, conn: &Connection, table: &str) -> rusqlite::Result<i64> {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {table}{}", self.sql()),
            params_from_iter(self.values.iter()),
            |row| row.get(0),
        )
    }

    fn page_values(&self, page: &PageParams) -> Vec<Value> {
        let mut values = self.values.clone();
        values.push(Value::Integer(page.per_page()));
        values.push(Value::Integer(page.offset()));
        values
    }
}

// ── Users ──

const USER_COLUMNS: &str = "id, username, email, phone_number, is_admin, created_at, updated_at";

fn parse_user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        phone_number: row.get(3)?,
        is_admin: row.get::<_, i32>(4)? != 0,
        created_at: parse_ts(5, &row.get::<_, String>(5)?)?,
        updated_at: parse_ts(6, &row.get::<_, String>(6)?)?,
    })
}

pub fn create_user(
    conn: &Connection,
    username: &str,
    email: &str,
    phone_number: Option<&str>,
    api_token: &str,
    password_hash: Option<&str>,
) -> rusqlite::Result<User> {
    let now = now_ts();
    conn.execute(
        "INSERT INTO users (username, email, phone_number, is_admin, api_token, password_hash,
                            created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?6)",
        params![username, email, phone_number, api_token, password_hash, now],
    )?;
    let id = conn.last_insert_rowid();
    get_user(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get_user(conn: &Connection, id: i64) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        parse_user_row,
    )
    .optional()
}

pub fn get_user_by_token(conn: &Connection, token: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE api_token = ?1"),
        params![token],
        parse_user_row,
    )
    .optional()
}

/// Looks a user up by username or (lowercased) email, with their password
/// hash if they have one.
pub fn get_user_credentials(
    conn: &Connection,
    identifier: &str,
) -> rusqlite::Result<Option<(User, Option<String>)>> {
    conn.query_row(
        &format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users
             WHERE username = ?1 OR email = lower(?1)
             ORDER BY username = ?1 DESC LIMIT 1"
        ),
        params![identifier],
        |row| Ok((parse_user_row(row)?, row.get(7)?)),
    )
    .optional()
}

pub fn set_user_token(conn: &Connection, id: i64, token: &str) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE users SET api_token = ?1, updated_at = ?2 WHERE id = ?3",
        params![token, now_ts(), id],
    )?;
    Ok(count > 0)
}

/// Ensures an `admin` account exists whose bearer token is `token`.
pub fn upsert_admin(conn: &Connection, token: &str) -> rusqlite::Result<()> {
    let now = now_ts();
    conn.execute(
        "INSERT INTO users (username, email, phone_number, is_admin, api_token, created_at, updated_at)
         VALUES ('admin', 'admin@localhost', NULL, 1, ?1, ?2, ?2)
         ON CONFLICT(username) DO UPDATE SET
           is_admin = 1,
           api_token = excluded.api_token,
           updated_at = excluded.updated_at",
        params![token, now],
    )?;
    Ok(())
}

pub fn list_users(
    conn: &Connection,
    search: Option<&str>,
    page: &PageParams,
) -> rusqlite::Result<(Vec<User>, i64)> {
    let mut filter = Filter::default();
    if let Some(term) = search.filter(|s| !s.is_empty()) {
        let pattern = format!("%{term}%");
        filter.clauses.push("(username LIKE ? OR email LIKE ? OR phone_number LIKE ?)");
        filter.values.extend([
            Value::Text(pattern.clone()),
            Value::Text(pattern.clone()),
            Value::Text(pattern),
        ]);
    }

    let total = filter.count(conn, "users")?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        filter.sql()
    ))?;
    let users = stmt
        .query_map(params_from_iter(filter.page_values(page)), parse_user_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((users, total))
}

pub fn user_statistics(conn: &Connection, user_id: i64) -> rusqlite::Result<UserStatistics> {
    conn.query_row(
        "SELECT
           (SELECT COUNT(*) FROM adventures WHERE user_id = ?1),
           (SELECT COUNT(*) FROM bookings WHERE user_id = ?1),
           (SELECT COUNT(*) FROM payments WHERE user_id = ?1),
           (SELECT COALESCE(SUM(amount), 0) FROM payments WHERE user_id = ?1 AND status = 'completed')",
        params![user_id],
        |row| {
            Ok(UserStatistics {
                adventures_created: row.get(0)?,
                bookings_made: row.get(1)?,
                payments_made: row.get(2)?,
                total_spent: row.get(3)?,
            })
        },
    )
}

pub fn set_user_admin(conn: &Connection, id: i64, is_admin: bool) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE users SET is_admin = ?1, updated_at = ?2 WHERE id = ?3",
        params![is_admin as i32, now_ts(), id],
    )?;
    Ok(count > 0)
}

// ── Adventures ──

const ADVENTURE_COLUMNS: &str = "id, user_id, title, description, location, price, duration, \
     difficulty, image_url, max_capacity, is_active, created_at, updated_at";

fn parse_adventure_row(row: &Row) -> rusqlite::Result<Adventure> {
    Ok(Adventure {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        price: row.get(5)?,
        duration: row.get(6)?,
        difficulty: row.get(7)?,
        image_url: row.get(8)?,
        max_capacity: row.get(9)?,
        is_active: row.get::<_, i32>(10)? != 0,
        created_at: parse_ts(11, &row.get::<_, String>(11)?)?,
        updated_at: parse_ts(12, &row.get::<_, String>(12)?)?,
    })
}

pub fn insert_adventure(
    conn: &Connection,
    owner_id: i64,
    adventure: &NewAdventure,
) -> rusqlite::Result<Adventure> {
    let now = now_ts();
    conn.execute(
        "INSERT INTO adventures (user_id, title, description, location, price, duration, difficulty,
                                 image_url, max_capacity, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10)",
        params![
            owner_id,
            adventure.title.trim(),
            adventure.description,
            adventure.location,
            adventure.price,
            adventure.duration.as_deref().unwrap_or("1 day"),
            adventure.difficulty.as_deref().unwrap_or("moderate"),
            adventure.image_url,
            adventure.max_capacity.unwrap_or(10),
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_adventure(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get_adventure(conn: &Connection, id: i64) -> rusqlite::Result<Option<Adventure>> {
    conn.query_row(
        &format!("SELECT {ADVENTURE_COLUMNS} FROM adventures WHERE id = ?1"),
        params![id],
        parse_adventure_row,
    )
    .optional()
}

/// `None` filters are not applied. Newest first.
pub fn list_adventures(
    conn: &Connection,
    owner_id: Option<i64>,
    active: Option<bool>,
) -> rusqlite::Result<Vec<Adventure>> {
    let mut filter = Filter::default();
    if let Some(owner_id) = owner_id {
        filter.push("user_id = ?", owner_id);
    }
    if let Some(active) = active {
        filter.push("is_active = ?", active as i64);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {ADVENTURE_COLUMNS} FROM adventures{} ORDER BY created_at DESC, id DESC",
        filter.sql()
    ))?;
    let adventures = stmt
        .query_map(params_from_iter(filter.values.iter()), parse_adventure_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(adventures)
}

pub fn update_adventure(conn: &Connection, adventure: &Adventure) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE adventures SET title = ?1, description = ?2, location = ?3, price = ?4,
                duration = ?5, difficulty = ?6, image_url = ?7, max_capacity = ?8,
                is_active = ?9, updated_at = ?10
         WHERE id = ?11",
        params![
            adventure.title,
            adventure.description,
            adventure.location,
            adventure.price,
            adventure.duration,
            adventure.difficulty,
            adventure.image_url,
            adventure.max_capacity,
            adventure.is_active as i32,
            now_ts(),
            adventure.id,
        ],
    )?;
    Ok(count > 0)
}

pub fn count_confirmed_bookings(conn: &Connection, adventure_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM bookings WHERE adventure_id = ?1 AND status = 'confirmed'",
        params![adventure_id],
        |row| row.get(0),
    )
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, user_id, adventure_id, booking_reference, adventure_date, \
     number_of_people, total_amount, special_requests, status, customer_name, customer_email, \
     customer_phone, created_at, updated_at";

fn parse_booking_row(row: &Row) -> rusqlite::Result<Booking> {
    let status_str: String = row.get(8)?;
    let status = BookingStatus::parse(&status_str)
        .ok_or_else(|| bad_enum(8, "booking status", &status_str))?;

    Ok(Booking {
        id: row.get(0)?,
        user_id: row.get(1)?,
        adventure_id: row.get(2)?,
        booking_reference: row.get(3)?,
        adventure_date: parse_ts(4, &row.get::<_, String>(4)?)?,
        number_of_people: row.get(5)?,
        total_amount: row.get(6)?,
        special_requests: row.get(7)?,
        status,
        customer_name: row.get(9)?,
        customer_email: row.get(10)?,
        customer_phone: row.get(11)?,
        created_at: parse_ts(12, &row.get::<_, String>(12)?)?,
        updated_at: parse_ts(13, &row.get::<_, String>(13)?)?,
    })
}

/// Inserts `booking` (its `id` is ignored) and returns the new row id.
pub fn insert_booking(conn: &Connection, booking: &Booking) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO bookings (user_id, adventure_id, booking_reference, adventure_date,
                               number_of_people, total_amount, special_requests, status,
                               customer_name, customer_email, customer_phone, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            booking.user_id,
            booking.adventure_id,
            booking.booking_reference,
            format_ts(&booking.adventure_date),
            booking.number_of_people,
            booking.total_amount,
            booking.special_requests,
            booking.status.as_str(),
            booking.customer_name,
            booking.customer_email,
            booking.customer_phone,
            format_ts(&booking.created_at),
            format_ts(&booking.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn booking_reference_exists(conn: &Connection, reference: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM bookings WHERE booking_reference = ?1",
        params![reference],
        |row| row.get(0),
    )
}

pub fn get_booking(conn: &Connection, id: i64) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        parse_booking_row,
    )
    .optional()
}

/// `user_id = None` lists across all users. Newest first.
pub fn list_bookings(
    conn: &Connection,
    user_id: Option<i64>,
    status: Option<BookingStatus>,
    page: &PageParams,
) -> rusqlite::Result<(Vec<Booking>, i64)> {
    let mut filter = Filter::default();
    if let Some(user_id) = user_id {
        filter.push("user_id = ?", user_id);
    }
    if let Some(status) = status {
        filter.push("status = ?", status.as_str().to_string());
    }

    let total = filter.count(conn, "bookings")?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        filter.sql()
    ))?;
    let bookings = stmt
        .query_map(params_from_iter(filter.page_values(page)), parse_booking_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((bookings, total))
}

/// Sum of `number_of_people` over confirmed bookings on the calendar date.
pub fn confirmed_people_on_date(
    conn: &Connection,
    adventure_id: i64,
    date: NaiveDate,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(number_of_people), 0) FROM bookings
         WHERE adventure_id = ?1 AND date(adventure_date) = ?2 AND status = 'confirmed'",
        params![adventure_id, date.format("%Y-%m-%d").to_string()],
        |row| row.get(0),
    )
}

pub fn update_booking_status(
    conn: &Connection,
    id: i64,
    status: BookingStatus,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now_ts(), id],
    )?;
    Ok(count > 0)
}

// ── Payments ──

const PAYMENT_COLUMNS: &str = "id, user_id, adventure_id, booking_id, phone_number, amount, \
     status, checkout_request_id, merchant_request_id, mpesa_receipt_number, transaction_date, \
     result_code, result_desc, created_at, updated_at";

fn parse_payment_row(row: &Row) -> rusqlite::Result<Payment> {
    let status_str: String = row.get(6)?;
    let status = PaymentStatus::parse(&status_str)
        .ok_or_else(|| bad_enum(6, "payment status", &status_str))?;
    let transaction_date = match row.get::<_, Option<String>>(10)? {
        Some(s) => Some(parse_ts(10, &s)?),
        None => None,
    };

    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        adventure_id: row.get(2)?,
        booking_id: row.get(3)?,
        phone_number: row.get(4)?,
        amount: row.get(5)?,
        status,
        checkout_request_id: row.get(7)?,
        merchant_request_id: row.get(8)?,
        mpesa_receipt_number: row.get(9)?,
        transaction_date,
        result_code: row.get(11)?,
        result_desc: row.get(12)?,
        created_at: parse_ts(13, &row.get::<_, String>(13)?)?,
        updated_at: parse_ts(14, &row.get::<_, String>(14)?)?,
    })
}

/// Inserts `payment` (its `id` is ignored) and returns the new row id.
pub fn insert_payment(conn: &Connection, payment: &Payment) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO payments (user_id, adventure_id, booking_id, phone_number, amount, status,
                               checkout_request_id, merchant_request_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            payment.user_id,
            payment.adventure_id,
            payment.booking_id,
            payment.phone_number,
            payment.amount,
            payment.status.as_str(),
            payment.checkout_request_id,
            payment.merchant_request_id,
            format_ts(&payment.created_at),
            format_ts(&payment.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_payment(conn: &Connection, id: i64) -> rusqlite::Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
        params![id],
        parse_payment_row,
    )
    .optional()
}

pub fn get_payment_by_checkout_id(
    conn: &Connection,
    checkout_request_id: &str,
) -> rusqlite::Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE checkout_request_id = ?1"),
        params![checkout_request_id],
        parse_payment_row,
    )
    .optional()
}

pub fn pending_payment_for_booking(
    conn: &Connection,
    booking_id: i64,
) -> rusqlite::Result<Option<Payment>> {
    conn.query_row(
        &format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = ?1 AND status = 'pending'"
        ),
        params![booking_id],
        parse_payment_row,
    )
    .optional()
}

/// Fills in the provider's correlation ids on a reserved payment.
pub fn set_provider_ids(
    conn: &Connection,
    id: i64,
    checkout_request_id: &str,
    merchant_request_id: Option<&str>,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE payments SET checkout_request_id = ?1, merchant_request_id = ?2, updated_at = ?3
         WHERE id = ?4",
        params![checkout_request_id, merchant_request_id, now_ts(), id],
    )?;
    Ok(count > 0)
}

/// Drops a reservation whose prompt was never sent. Only pending rows go.
pub fn delete_pending_payment(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "DELETE FROM payments WHERE id = ?1 AND status = 'pending'",
        params![id],
    )?;
    Ok(count > 0)
}

/// Outcome fields written when a payment leaves `pending`.
#[derive(Debug, Clone, Default)]
pub struct Settlement<'a> {
    pub result_code: Option<i64>,
    pub result_desc: Option<&'a str>,
    pub receipt_number: Option<&'a str>,
    pub amount: Option<i64>,
    pub transaction_date: Option<NaiveDateTime>,
}

/// Records a result on a payment that has none yet: a pending one, or one
/// failed locally when superseded. Returns false otherwise, so a provider
/// result is never overwritten.
pub fn settle_payment(
    conn: &Connection,
    id: i64,
    status: PaymentStatus,
    settlement: &Settlement,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE payments SET
           status = ?1,
           result_code = ?2,
           result_desc = ?3,
           mpesa_receipt_number = COALESCE(?4, mpesa_receipt_number),
           amount = COALESCE(?5, amount),
           transaction_date = COALESCE(?6, transaction_date),
           updated_at = ?7
         WHERE id = ?8
           AND (status = 'pending' OR (status = 'failed' AND result_code IS NULL))",
        params![
            status.as_str(),
            settlement.result_code,
            settlement.result_desc,
            settlement.receipt_number,
            settlement.amount,
            settlement.transaction_date.as_ref().map(format_ts),
            now_ts(),
            id,
        ],
    )?;
    Ok(count > 0)
}

/// `user_id = None` lists across all users. Newest first.
pub fn list_payments(
    conn: &Connection,
    user_id: Option<i64>,
    status: Option<PaymentStatus>,
    page: &PageParams,
) -> rusqlite::Result<(Vec<Payment>, i64)> {
    let mut filter = Filter::default();
    if let Some(user_id) = user_id {
        filter.push("user_id = ?", user_id);
    }
    if let Some(status) = status {
        filter.push("status = ?", status.as_str().to_string());
    }

    let total = filter.count(conn, "payments")?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        filter.sql()
    ))?;
    let payments = stmt
        .query_map(params_from_iter(filter.page_values(page)), parse_payment_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((payments, total))
}
