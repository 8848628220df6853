use chrono::{Duration, NaiveDateTime, SubsecRound, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::Deserialize;

use crate::db::queries::{self, Settlement};
use crate::db;
use crate::errors::AppError;
use crate::models::{
    AuthContext, Booking, BookingStatus, CallbackMetadata, Page, PageParams, Payment,
    PaymentEvent, PaymentStatus,
};
use crate::services::payments::{normalize_msisdn, PaymentAccepted, PaymentRequest};
use crate::state::AppState;

/// The provider's success sentinel.
pub const RESULT_SUCCESS: i64 = 0;

const SUPERSEDED_DESC: &str = "superseded by a newer payment request";

/// Correlation id prefix of a reservation whose prompt has not been accepted yet.
const UNSENT_PREFIX: &str = "unsent-";

#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePayment {
    pub booking_id: i64,
    pub phone_number: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentFilter {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PaymentFilter {
    fn status(&self) -> Result<Option<PaymentStatus>, AppError> {
        match self.status.as_deref().filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(s) => PaymentStatus::parse(s)
                .map(Some)
                .ok_or_else(|| AppError::InvalidInput(format!("unknown payment status: {s}"))),
        }
    }

    fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// What a callback did. Unknown correlation ids surface as `NotFound`.
#[derive(Debug, Clone)]
pub enum Reconciled {
    /// The payment already carried a provider result; nothing changed.
    Duplicate(Payment),
    Completed {
        payment: Payment,
        booking_confirmed: bool,
    },
    Failed(Payment),
}

impl Reconciled {
    /// The event to publish, if this callback changed anything.
    pub fn event(&self) -> Option<PaymentEvent> {
        let payment = match self {
            Reconciled::Duplicate(_) => return None,
            Reconciled::Completed { payment, .. } | Reconciled::Failed(payment) => payment,
        };
        Some(PaymentEvent {
            payment_id: payment.id,
            user_id: payment.user_id,
            booking_id: payment.booking_id,
            status: payment.status,
            receipt: payment.mpesa_receipt_number.clone(),
            result_desc: payment.result_desc.clone(),
        })
    }
}

/// Checks that `booking_id` can be paid by `ctx` right now. Returns the
/// booking and any stale pending payment that a new one would supersede.
fn check_payable(
    conn: &Connection,
    ctx: &AuthContext,
    booking_id: i64,
    now: NaiveDateTime,
    pending_ttl: Duration,
) -> Result<(Booking, Option<Payment>), AppError> {
    let booking = queries::get_booking(conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
    if booking.user_id != ctx.user_id() {
        return Err(AppError::Unauthorized);
    }
    if booking.status != BookingStatus::Pending {
        return Err(AppError::InvalidStateTransition(format!(
            "booking {} is {}; only pending bookings can be paid",
            booking.booking_reference,
            booking.status.as_str()
        )));
    }
    if booking.total_amount < 1 {
        return Err(AppError::InvalidInput(format!(
            "booking {} has nothing to pay",
            booking.booking_reference
        )));
    }

    let stale = match queries::pending_payment_for_booking(conn, booking_id)? {
        Some(pending) if now - pending.created_at < pending_ttl => {
            return Err(AppError::InvalidStateTransition(format!(
                "a payment request for booking {} is already in progress",
                booking.booking_reference
            )));
        }
        other => other,
    };
    Ok((booking, stale))
}

/// Reserves the booking for one payment request: supersedes a stale
/// pending payment and inserts a pending row under a placeholder
/// correlation id, all before any prompt is sent. The partial unique index
/// on pending payments makes the reservation exclusive.
fn reserve_payment(
    conn: &mut Connection,
    ctx: &AuthContext,
    booking_id: i64,
    phone_number: &str,
    now: NaiveDateTime,
    pending_ttl: Duration,
) -> Result<(Booking, Payment), AppError> {
    let now = now.trunc_subsecs(0);
    db::retry_on_busy(conn, |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (booking, stale) = check_payable(&tx, ctx, booking_id, now, pending_ttl)?;

        if let Some(stale) = stale {
            queries::settle_payment(
                &tx,
                stale.id,
                PaymentStatus::Failed,
                &Settlement {
                    result_desc: Some(SUPERSEDED_DESC),
                    ..Default::default()
                },
            )?;
            tracing::info!(
                payment_id = stale.id,
                booking_id,
                "stale pending payment superseded"
            );
        }

        let mut payment = Payment {
            id: 0,
            user_id: ctx.user_id(),
            adventure_id: booking.adventure_id,
            booking_id: Some(booking.id),
            phone_number: phone_number.to_string(),
            amount: booking.total_amount,
            status: PaymentStatus::Pending,
            checkout_request_id: format!("{UNSENT_PREFIX}{}", uuid::Uuid::new_v4()),
            merchant_request_id: None,
            mpesa_receipt_number: None,
            transaction_date: None,
            result_code: None,
            result_desc: None,
            created_at: now,
            updated_at: now,
        };
        payment.id = queries::insert_payment(&tx, &payment)?;
        tx.commit()?;
        Ok((booking, payment))
    })
}

/// Points a reservation at the prompt the provider accepted.
fn attach_provider_ids(
    conn: &Connection,
    payment_id: i64,
    accepted: &PaymentAccepted,
) -> Result<Payment, AppError> {
    queries::set_provider_ids(
        conn,
        payment_id,
        &accepted.checkout_request_id,
        accepted.merchant_request_id.as_deref(),
    )?;
    reload_payment(conn, payment_id)
}

/// Frees a reservation after the provider refused or never answered.
fn release_reservation(state: &AppState, payment_id: i64) {
    let db = state.db();
    match queries::delete_pending_payment(&db, payment_id) {
        Ok(_) => tracing::debug!(payment_id, "payment reservation released"),
        Err(e) => tracing::error!(error = %e, payment_id, "failed to release payment reservation"),
    }
}

/// Pushes a payment prompt for a pending booking and records the pending
/// payment under the provider's correlation id. The booking is reserved
/// before the prompt goes out, so concurrent requests for one booking
/// cannot both reach the provider.
pub async fn initiate_payment(
    state: &AppState,
    ctx: &AuthContext,
    request: &InitiatePayment,
) -> Result<Payment, AppError> {
    let phone_number = normalize_msisdn(&request.phone_number).ok_or_else(|| {
        AppError::InvalidInput(format!("invalid phone number: {}", request.phone_number))
    })?;
    let pending_ttl = Duration::seconds(state.config.pending_payment_ttl.as_secs() as i64);

    let (booking, reserved) = {
        let mut db = state.db();
        reserve_payment(
            &mut db,
            ctx,
            request.booking_id,
            &phone_number,
            Utc::now().naive_utc(),
            pending_ttl,
        )?
    };

    let payment_request = PaymentRequest {
        phone_number,
        amount: booking.total_amount,
        account_reference: booking.booking_reference.clone(),
        description: format!("Payment for booking {}", booking.booking_reference),
    };

    let timeout = state.config.payment_timeout;
    let accepted =
        match tokio::time::timeout(timeout, state.payments.request_payment(&payment_request)).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                tracing::error!(error = %e, booking_id = booking.id, "payment request failed");
                release_reservation(state, reserved.id);
                return Err(AppError::Provider(format!("{e:#}")));
            }
            Err(_) => {
                tracing::warn!(booking_id = booking.id, "payment request timed out");
                release_reservation(state, reserved.id);
                return Err(AppError::ProviderTimeout(timeout.as_secs()));
            }
        };

    let payment = {
        let db = state.db();
        attach_provider_ids(&db, reserved.id, &accepted)
    };
    let payment = match payment {
        Ok(payment) => payment,
        Err(e) => {
            tracing::error!(
                error = %e,
                payment_id = reserved.id,
                booking_id = booking.id,
                checkout_request_id = %accepted.checkout_request_id,
                "payment prompt sent but could not be recorded"
            );
            return Err(e);
        }
    };

    tracing::info!(
        payment_id = payment.id,
        booking_id = booking.id,
        checkout_request_id = %payment.checkout_request_id,
        amount = payment.amount,
        customer_message = accepted.customer_message.as_deref().unwrap_or(""),
        "payment initiated"
    );
    Ok(payment)
}

/// Applies a provider callback. Runs in one transaction over the payment and
/// its booking; a settled payment is never touched again, so replays and
/// reordered deliveries are harmless.
pub fn reconcile_callback(
    conn: &mut Connection,
    correlation_id: &str,
    result_code: i64,
    result_desc: &str,
    metadata: &CallbackMetadata,
) -> Result<Reconciled, AppError> {
    db::retry_on_busy(conn, |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let payment = queries::get_payment_by_checkout_id(&tx, correlation_id)?
            .ok_or_else(|| AppError::NotFound(format!("payment for checkout {correlation_id}")))?;

        if !payment.awaits_result() {
            tracing::info!(
                payment_id = payment.id,
                checkout_request_id = %correlation_id,
                status = payment.status.as_str(),
                "duplicate callback ignored"
            );
            return Ok(Reconciled::Duplicate(payment));
        }

        if payment.status == PaymentStatus::Failed {
            tracing::warn!(
                payment_id = payment.id,
                checkout_request_id = %correlation_id,
                result_code,
                "result arrived for a superseded payment"
            );
        }

        let outcome = if result_code == RESULT_SUCCESS {
            if let Some(amount) = metadata.amount.filter(|a| *a != payment.amount) {
                tracing::warn!(
                    payment_id = payment.id,
                    expected = payment.amount,
                    received = amount,
                    "callback amount differs from requested amount"
                );
            }
            queries::settle_payment(
                &tx,
                payment.id,
                PaymentStatus::Completed,
                &Settlement {
                    result_code: Some(result_code),
                    result_desc: Some(result_desc),
                    receipt_number: metadata.receipt_number.as_deref(),
                    amount: metadata.amount,
                    transaction_date: metadata.transaction_date,
                },
            )?;
            let booking_confirmed = match payment.booking_id {
                Some(booking_id) => confirm_paid_booking(&tx, booking_id)?,
                None => false,
            };
            Reconciled::Completed {
                payment: reload_payment(&tx, payment.id)?,
                booking_confirmed,
            }
        } else {
            queries::settle_payment(
                &tx,
                payment.id,
                PaymentStatus::Failed,
                &Settlement {
                    result_code: Some(result_code),
                    result_desc: Some(result_desc),
                    ..Default::default()
                },
            )?;
            Reconciled::Failed(reload_payment(&tx, payment.id)?)
        };

        tx.commit()?;
        Ok(outcome)
    })
}

fn reload_payment(conn: &Connection, id: i64) -> Result<Payment, AppError> {
    queries::get_payment(conn, id)?.ok_or_else(|| AppError::NotFound(format!("payment {id}")))
}

/// Confirms a paid booking unless that would overbook its date. Returns
/// whether the booking is now confirmed.
fn confirm_paid_booking(conn: &Connection, booking_id: i64) -> Result<bool, AppError> {
    let Some(booking) = queries::get_booking(conn, booking_id)? else {
        tracing::error!(booking_id, "paid booking no longer exists");
        return Ok(false);
    };
    if booking.status != BookingStatus::Pending {
        tracing::error!(
            booking_id,
            reference = %booking.booking_reference,
            status = booking.status.as_str(),
            "payment completed for a booking that is no longer pending; refund required"
        );
        return Ok(false);
    }

    let capacity = queries::get_adventure(conn, booking.adventure_id)?
        .map(|a| a.max_capacity)
        .unwrap_or(0);
    let confirmed =
        queries::confirmed_people_on_date(conn, booking.adventure_id, booking.adventure_date.date())?;
    if confirmed + booking.number_of_people > capacity {
        tracing::error!(
            booking_id,
            reference = %booking.booking_reference,
            confirmed,
            capacity,
            "paid booking would overbook its date; left pending, refund or reschedule required"
        );
        return Ok(false);
    }

    queries::update_booking_status(conn, booking_id, BookingStatus::Confirmed)?;
    tracing::info!(
        booking_id,
        reference = %booking.booking_reference,
        "booking confirmed by payment"
    );
    Ok(true)
}

pub fn get_payment(conn: &Connection, ctx: &AuthContext, id: i64) -> Result<Payment, AppError> {
    let payment = queries::get_payment(conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("payment {id}")))?;
    if !ctx.can_act_for(payment.user_id) {
        return Err(AppError::Unauthorized);
    }
    Ok(payment)
}

pub fn list_payments(
    conn: &Connection,
    ctx: &AuthContext,
    filter: &PaymentFilter,
) -> Result<Page<Payment>, AppError> {
    let page = filter.page_params();
    let (payments, total) =
        queries::list_payments(conn, Some(ctx.user_id()), filter.status()?, &page)?;
    Ok(Page::new(payments, total, &page))
}

pub fn list_all_payments(
    conn: &Connection,
    ctx: &AuthContext,
    filter: &PaymentFilter,
) -> Result<Page<Payment>, AppError> {
    if !ctx.is_admin() {
        return Err(AppError::Unauthorized);
    }
    let page = filter.page_params();
    let (payments, total) = queries::list_payments(conn, None, filter.status()?, &page)?;
    Ok(Page::new(payments, total, &page))
}
