use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/me", get(handlers::auth::me))
        .route(
            "/api/adventures",
            get(handlers::adventures::list_adventures).post(handlers::adventures::create_adventure),
        )
        .route(
            "/api/adventures/my-adventures",
            get(handlers::adventures::my_adventures),
        )
        .route(
            "/api/adventures/:id",
            get(handlers::adventures::get_adventure)
                .put(handlers::adventures::update_adventure)
                .delete(handlers::adventures::delete_adventure),
        )
        .route(
            "/api/adventures/:id/availability",
            get(handlers::adventures::availability),
        )
        .route(
            "/api/bookings",
            get(handlers::bookings::list_bookings).post(handlers::bookings::create_booking),
        )
        .route(
            "/api/bookings/initiate-payment",
            post(handlers::bookings::initiate_payment),
        )
        .route("/api/bookings/:id", get(handlers::bookings::get_booking))
        .route(
            "/api/bookings/:id/cancel",
            post(handlers::bookings::cancel_booking),
        )
        .route("/api/payments", get(handlers::payments::list_payments))
        .route("/api/payments/events", get(handlers::payments::events_stream))
        .route("/api/payments/:id", get(handlers::payments::get_payment))
        .route("/api/mpesa/callback", post(handlers::mpesa::stk_callback))
        .route("/api/admin/users", get(handlers::admin::get_users))
        .route("/api/admin/users/:id", get(handlers::admin::get_user))
        .route(
            "/api/admin/users/:id/toggle-admin",
            put(handlers::admin::toggle_admin),
        )
        .route("/api/admin/adventures", get(handlers::admin::get_adventures))
        .route(
            "/api/admin/adventures/:id/toggle-status",
            put(handlers::admin::toggle_adventure_status),
        )
        .route("/api/admin/bookings", get(handlers::admin::get_bookings))
        .route("/api/admin/bookings/:id", put(handlers::admin::update_booking))
        .route("/api/admin/payments", get(handlers::admin::get_payments))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
