use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::StkCallbackEnvelope;
use crate::services::reconciliation;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub token: Option<String>,
}

fn ack() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({"ResultCode": 0, "ResultDesc": "Accepted"})),
    )
        .into_response()
}

fn reject(status: StatusCode, desc: &str) -> Response {
    (
        status,
        Json(serde_json::json!({"ResultCode": 1, "ResultDesc": desc})),
    )
        .into_response()
}

// POST /api/mpesa/callback
pub async fn stk_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> Response {
    // Skip the token check if none is configured (dev mode)
    let expected = &state.config.mpesa.callback_token;
    if !expected.is_empty() && query.token.as_deref() != Some(expected.as_str()) {
        tracing::warn!("M-Pesa callback with missing or wrong token");
        return reject(StatusCode::FORBIDDEN, "Forbidden");
    }

    // Unparseable bodies are acknowledged; the log keeps them for inspection.
    let envelope: StkCallbackEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(
                error = %e,
                body = %String::from_utf8_lossy(&body),
                "unparseable M-Pesa callback acknowledged"
            );
            return ack();
        }
    };
    let callback = envelope.body.stk_callback;
    let metadata = callback.metadata();

    tracing::info!(
        checkout_request_id = %callback.checkout_request_id,
        result_code = callback.result_code,
        result_desc = %callback.result_desc,
        "M-Pesa callback received"
    );

    let result = {
        let mut db = state.db();
        reconciliation::reconcile_callback(
            &mut db,
            &callback.checkout_request_id,
            callback.result_code,
            &callback.result_desc,
            &metadata,
        )
    };

    match result {
        Ok(outcome) => {
            if let Some(event) = outcome.event() {
                // No subscribers is fine.
                let _ = state.payment_events.send(event);
            }
            ack()
        }
        Err(AppError::NotFound(_)) => {
            tracing::warn!(
                checkout_request_id = %callback.checkout_request_id,
                "callback for unknown payment acknowledged"
            );
            ack()
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                checkout_request_id = %callback.checkout_request_id,
                "failed to reconcile M-Pesa callback"
            );
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}
