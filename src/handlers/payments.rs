use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::Json;
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tokio_stream::StreamExt;

use crate::errors::AppError;
use crate::models::{Page, Payment};
use crate::services::accounts;
use crate::services::reconciliation::{self, PaymentFilter};
use crate::state::AppState;

// GET /api/payments
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<PaymentFilter>,
) -> Result<Json<Page<Payment>>, AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let db = state.db();
    Ok(Json(reconciliation::list_payments(&db, &ctx, &filter)?))
}

// GET /api/payments/:id
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Payment>, AppError> {
    let ctx = super::require_user(&state, &headers)?;
    let db = state.db();
    Ok(Json(reconciliation::get_payment(&db, &ctx, id)?))
}

// GET /api/payments/events (SSE)
#[derive(Deserialize)]
pub struct SseQuery {
    pub token: Option<String>,
}

pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Token in the query string: EventSource cannot set headers.
    let ctx = {
        let db = state.db();
        accounts::authenticate(&db, query.token.as_deref().unwrap_or(""))?
    };

    let rx = state.payment_events.subscribe();
    let user_id = ctx.user_id();
    let is_admin = ctx.is_admin();

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if is_admin || event.user_id == user_id => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().data(data).event("payment")))
        }
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, user_id, "payment event subscriber lagged");
            None
        }
    });

    let keepalive_stream = IntervalStream::new(tokio::time::interval(Duration::from_secs(30)))
        .map(|_| Ok(Event::default().comment("keepalive")));

    Ok(Sse::new(StreamExt::merge(live_stream, keepalive_stream)))
}
