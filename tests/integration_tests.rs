use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

use adventures::config::{AppConfig, MpesaConfig};
use adventures::db::{self, queries};
use adventures::routes::build_router;
use adventures::services::payments::{PaymentAccepted, PaymentProvider, PaymentRequest};
use adventures::state::AppState;

const ADMIN_TOKEN: &str = "test-admin-token";
const PASSWORD: &str = "safari-pass-123";

// ── Mock Provider ──

#[derive(Clone, Copy)]
enum Behaviour {
    Accept,
    /// Accepts after a delay, leaving the request in flight meanwhile.
    Slow(Duration),
    Reject,
    Hang,
}

struct MockProvider {
    behaviour: Behaviour,
    requests: Arc<Mutex<Vec<PaymentRequest>>>,
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn request_payment(&self, request: &PaymentRequest) -> anyhow::Result<PaymentAccepted> {
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        let accepted = PaymentAccepted {
            checkout_request_id: format!("ws_CO_{n}"),
            merchant_request_id: Some(format!("29115-{n}")),
            customer_message: Some("Success. Request accepted for processing".to_string()),
        };
        match self.behaviour {
            Behaviour::Accept => Ok(accepted),
            Behaviour::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(accepted)
            }
            Behaviour::Reject => anyhow::bail!("Invalid Access Token"),
            Behaviour::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: ADMIN_TOKEN.to_string(),
        payment_provider: "mock".to_string(),
        mpesa: MpesaConfig {
            base_url: "http://localhost".to_string(),
            consumer_key: "".to_string(),
            consumer_secret: "".to_string(),
            passkey: "".to_string(),
            shortcode: "174379".to_string(),
            callback_url: "".to_string(),
            callback_token: "".to_string(), // empty = skip callback token check
        },
        payment_timeout: Duration::from_secs(5),
        pending_payment_ttl: Duration::from_secs(120),
        password_hash_cost: 4,
    }
}

fn test_state_with(
    config: AppConfig,
    behaviour: Behaviour,
) -> (Arc<AppState>, Arc<Mutex<Vec<PaymentRequest>>>) {
    let conn = db::init_db(":memory:").unwrap();
    queries::upsert_admin(&conn, ADMIN_TOKEN).unwrap();
    let requests = Arc::new(Mutex::new(vec![]));
    let (payment_events, _) = broadcast::channel(16);
    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        payments: Box::new(MockProvider {
            behaviour,
            requests: Arc::clone(&requests),
        }),
        payment_events,
    });
    (state, requests)
}

fn test_state() -> Arc<AppState> {
    test_state_with(test_config(), Behaviour::Accept).0
}

async fn call(
    state: &Arc<AppState>,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let res = build_router(Arc::clone(state)).oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// A start time 30 days out, fixed to 07:00 UTC so repeated calls land on one date.
fn trip_date() -> String {
    (chrono::Utc::now() + chrono::Duration::days(30))
        .format("%Y-%m-%dT07:00:00Z")
        .to_string()
}

async fn register(state: &Arc<AppState>, username: &str) -> (i64, String) {
    let (status, json) = call(
        state,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": PASSWORD,
            "phone_number": "0712345678",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    (
        json["user"]["id"].as_i64().unwrap(),
        json["api_token"].as_str().unwrap().to_string(),
    )
}

async fn create_adventure(state: &Arc<AppState>, price: i64, capacity: i64) -> i64 {
    let (status, json) = call(
        state,
        "POST",
        "/api/adventures",
        Some(ADMIN_TOKEN),
        Some(json!({
            "title": "Mount Kenya summit trek",
            "location": "Nanyuki",
            "price": price,
            "max_capacity": capacity,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["id"].as_i64().unwrap()
}

async fn book(
    state: &Arc<AppState>,
    token: &str,
    adventure_id: i64,
    people: i64,
) -> (StatusCode, Value) {
    call(
        state,
        "POST",
        "/api/bookings",
        Some(token),
        Some(json!({
            "adventure_id": adventure_id,
            "adventure_date": trip_date(),
            "number_of_people": people,
            "special_requests": "vegetarian meals",
        })),
    )
    .await
}

async fn initiate(state: &Arc<AppState>, token: &str, booking_id: i64) -> (StatusCode, Value) {
    call(
        state,
        "POST",
        "/api/bookings/initiate-payment",
        Some(token),
        Some(json!({"booking_id": booking_id, "phone_number": "0712 345 678"})),
    )
    .await
}

fn success_callback(checkout_request_id: &str, amount: i64) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": amount},
                        {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                        {"Name": "TransactionDate", "Value": 20250601102115_i64},
                        {"Name": "PhoneNumber", "Value": 254712345678_i64}
                    ]
                }
            }
        }
    })
}

fn failure_callback(checkout_request_id: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }
        }
    })
}

async fn callback(state: &Arc<AppState>, uri: &str, body: Value) -> (StatusCode, Value) {
    call(state, "POST", uri, None, Some(body)).await
}

/// Books `people` on a fresh adventure and pays for it; returns (booking, payment).
async fn booked_and_paid(
    state: &Arc<AppState>,
    token: &str,
    adventure_id: i64,
    people: i64,
) -> (Value, Value) {
    let (status, booking) = book(state, token, adventure_id, people).await;
    assert_eq!(status, StatusCode::CREATED, "{booking}");
    let (status, payment) = initiate(state, token, booking["id"].as_i64().unwrap()).await;
    assert_eq!(status, StatusCode::CREATED, "{payment}");
    (booking, payment)
}

// ── Health & Auth ──

#[tokio::test]
async fn test_health() {
    let state = test_state();
    let (status, json) = call(&state, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_requires_auth() {
    let state = test_state();

    let (status, _) = call(&state, "GET", "/api/bookings", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&state, "GET", "/api/bookings", Some("wrong-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&state, "GET", "/api/payments/events", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_and_me() {
    let state = test_state();
    let (user_id, token) = register(&state, "wanjiru").await;

    let (status, json) = call(&state, "GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], user_id);
    assert_eq!(json["username"], "wanjiru");
    assert_eq!(json["phone_number"], "254712345678");
    assert_eq!(json["is_admin"], false);
    assert!(json.get("api_token").is_none());

    let (status, json) = call(
        &state,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"username": "wanjiru", "email": "other@example.com", "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("already registered"));
}

#[tokio::test]
async fn test_password_login_issues_fresh_token() {
    let state = test_state();
    let (user_id, first_token) = register(&state, "kendi").await;

    let (status, json) = call(
        &state,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"username": "kendi", "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["user"]["id"], user_id);
    let token = json["api_token"].as_str().unwrap().to_string();
    assert_ne!(token, first_token);

    let (status, me) = call(&state, "GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "kendi");
    let (status, _) = call(&state, "GET", "/api/auth/me", Some(&first_token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Email works as the identifier too, in any case.
    let (status, _) = call(
        &state,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"username": "KENDI@example.com", "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_password_login_rejects_bad_credentials() {
    let state = test_state();
    register(&state, "koech").await;

    for (username, password) in [
        ("koech", "wrong-password"),
        ("nobody", PASSWORD),
        ("admin", PASSWORD),
    ] {
        let (status, _) = call(
            &state,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"username": username, "password": password})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{username}");
    }

    let (status, _) = call(
        &state,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"username": "koech", "password": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &state,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"username": "shortpw", "email": "shortpw@example.com", "password": "abc"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_endpoints_forbidden_for_users() {
    let state = test_state();
    let (_, token) = register(&state, "kamau").await;

    for uri in [
        "/api/admin/users",
        "/api/admin/adventures",
        "/api/admin/bookings",
        "/api/admin/payments",
    ] {
        let (status, _) = call(&state, "GET", uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
    }
}

// ── Booking & Payment Flow ──

#[tokio::test]
async fn test_full_booking_and_payment_flow() {
    let (state, requests) = test_state_with(test_config(), Behaviour::Accept);
    let (_, token) = register(&state, "achieng").await;
    let adventure_id = create_adventure(&state, 2500, 5).await;

    let (status, booking) = book(&state, &token, adventure_id, 2).await;
    assert_eq!(status, StatusCode::CREATED, "{booking}");
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["total_amount"], 5000);
    assert_eq!(booking["customer_name"], "achieng");
    assert_eq!(booking["customer_email"], "achieng@example.com");
    assert_eq!(booking["special_requests"], "vegetarian meals");
    let reference = booking["booking_reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with("BK") && reference.len() == 10);
    let booking_id = booking["id"].as_i64().unwrap();

    let (status, payment) = initiate(&state, &token, booking_id).await;
    assert_eq!(status, StatusCode::CREATED, "{payment}");
    assert_eq!(payment["status"], "pending");
    assert_eq!(payment["amount"], 5000);
    assert_eq!(payment["checkout_request_id"], "ws_CO_1");
    assert_eq!(payment["phone_number"], "254712345678");

    {
        let sent = requests.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].amount, 5000);
        assert_eq!(sent[0].account_reference, reference);
        assert_eq!(sent[0].phone_number, "254712345678");
    }

    let mut events = state.payment_events.subscribe();
    let (status, ack) = callback(&state, "/api/mpesa/callback", success_callback("ws_CO_1", 5000)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);

    let event = events.try_recv().unwrap();
    assert_eq!(event.booking_id, Some(booking_id));
    assert_eq!(event.receipt.as_deref(), Some("NLJ7RT61SV"));

    let (_, booking) = call(&state, "GET", &format!("/api/bookings/{booking_id}"), Some(&token), None).await;
    assert_eq!(booking["status"], "confirmed");

    let payment_id = payment["id"].as_i64().unwrap();
    let (status, payment) = call(&state, "GET", &format!("/api/payments/{payment_id}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["status"], "completed");
    assert_eq!(payment["mpesa_receipt_number"], "NLJ7RT61SV");
    assert_eq!(payment["result_code"], 0);

    let (_, page) = call(&state, "GET", "/api/payments?status=completed", Some(&token), None).await;
    assert_eq!(page["total"], 1);
}

#[tokio::test]
async fn test_capacity_is_enforced() {
    let state = test_state();
    let (_, first) = register(&state, "otieno").await;
    let (_, second) = register(&state, "njeri").await;
    let adventure_id = create_adventure(&state, 1000, 5).await;

    let (_, payment) = booked_and_paid(&state, &first, adventure_id, 3).await;
    let checkout = payment["checkout_request_id"].as_str().unwrap().to_string();
    callback(&state, "/api/mpesa/callback", success_callback(&checkout, 3000)).await;

    let (status, json) = book(&state, &second, adventure_id, 3).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["available_slots"], 2);

    let (status, _) = book(&state, &second, adventure_id, 2).await;
    assert_eq!(status, StatusCode::CREATED);

    let date = &trip_date()[..10];
    let (_, availability) = call(
        &state,
        "GET",
        &format!("/api/adventures/{adventure_id}/availability?date={date}"),
        None,
        None,
    )
    .await;
    assert_eq!(availability["confirmed_people"], 3);
    assert_eq!(availability["available"], 2);
}

#[tokio::test]
async fn test_failed_callback_then_retry() {
    let state = test_state();
    let (_, token) = register(&state, "mwangi").await;
    let adventure_id = create_adventure(&state, 1500, 10).await;
    let (booking, payment) = booked_and_paid(&state, &token, adventure_id, 1).await;
    let booking_id = booking["id"].as_i64().unwrap();

    let checkout = payment["checkout_request_id"].as_str().unwrap();
    let (status, _) = callback(&state, "/api/mpesa/callback", failure_callback(checkout)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, booking) = call(&state, "GET", &format!("/api/bookings/{booking_id}"), Some(&token), None).await;
    assert_eq!(booking["status"], "pending");

    let (status, retry) = initiate(&state, &token, booking_id).await;
    assert_eq!(status, StatusCode::CREATED);
    let retry_checkout = retry["checkout_request_id"].as_str().unwrap();
    assert_ne!(retry_checkout, checkout);

    callback(&state, "/api/mpesa/callback", success_callback(retry_checkout, 1500)).await;
    let (_, booking) = call(&state, "GET", &format!("/api/bookings/{booking_id}"), Some(&token), None).await;
    assert_eq!(booking["status"], "confirmed");
}

#[tokio::test]
async fn test_duplicate_callback_is_idempotent() {
    let state = test_state();
    let (_, token) = register(&state, "chebet").await;
    let adventure_id = create_adventure(&state, 1500, 10).await;
    let (_, payment) = booked_and_paid(&state, &token, adventure_id, 1).await;
    let checkout = payment["checkout_request_id"].as_str().unwrap();
    let payment_id = payment["id"].as_i64().unwrap();

    callback(&state, "/api/mpesa/callback", success_callback(checkout, 1500)).await;
    let (_, first) = call(&state, "GET", &format!("/api/payments/{payment_id}"), Some(&token), None).await;

    let mut events = state.payment_events.subscribe();
    let (status, ack) = callback(&state, "/api/mpesa/callback", success_callback(checkout, 1500)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);
    let (status, _) = callback(&state, "/api/mpesa/callback", failure_callback(checkout)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(events.try_recv().is_err());

    let (_, second) = call(&state, "GET", &format!("/api/payments/{payment_id}"), Some(&token), None).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unknown_and_garbled_callbacks_acknowledged() {
    let state = test_state();

    let (status, ack) = callback(&state, "/api/mpesa/callback", success_callback("ws_CO_nobody", 10)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);

    let (status, ack) = callback(&state, "/api/mpesa/callback", json!({"unexpected": true})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);
}

#[tokio::test]
async fn test_callback_token_guard() {
    let mut config = test_config();
    config.mpesa.callback_token = "s3cret".to_string();
    let (state, _) = test_state_with(config, Behaviour::Accept);
    let (_, token) = register(&state, "kiptoo").await;
    let adventure_id = create_adventure(&state, 800, 4).await;
    let (booking, payment) = booked_and_paid(&state, &token, adventure_id, 1).await;
    let checkout = payment["checkout_request_id"].as_str().unwrap();

    let (status, _) = callback(&state, "/api/mpesa/callback", success_callback(checkout, 800)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = callback(&state, "/api/mpesa/callback?token=wrong", success_callback(checkout, 800)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let booking_id = booking["id"].as_i64().unwrap();
    let (_, still_pending) = call(&state, "GET", &format!("/api/bookings/{booking_id}"), Some(&token), None).await;
    assert_eq!(still_pending["status"], "pending");

    let (status, _) = callback(&state, "/api/mpesa/callback?token=s3cret", success_callback(checkout, 800)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, confirmed) = call(&state, "GET", &format!("/api/bookings/{booking_id}"), Some(&token), None).await;
    assert_eq!(confirmed["status"], "confirmed");
}

#[tokio::test]
async fn test_second_payment_request_rejected_while_first_pending() {
    let state = test_state();
    let (_, token) = register(&state, "auma").await;
    let adventure_id = create_adventure(&state, 1200, 6).await;
    let (booking, _) = booked_and_paid(&state, &token, adventure_id, 2).await;

    let (status, _) = initiate(&state, &token, booking["id"].as_i64().unwrap()).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_concurrent_payment_requests_send_one_prompt() {
    let (state, requests) =
        test_state_with(test_config(), Behaviour::Slow(Duration::from_millis(200)));
    let (_, token) = register(&state, "mutua").await;
    let adventure_id = create_adventure(&state, 1200, 6).await;
    let (_, booking) = book(&state, &token, adventure_id, 2).await;
    let booking_id = booking["id"].as_i64().unwrap();

    let ((first, _), (second, _)) = tokio::join!(
        initiate(&state, &token, booking_id),
        initiate(&state, &token, booking_id)
    );
    let mut statuses = [first, second];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);
    assert_eq!(requests.lock().unwrap().len(), 1);

    let (_, page) = call(&state, "GET", "/api/payments", Some(&token), None).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["checkout_request_id"], "ws_CO_1");
}

#[tokio::test]
async fn test_superseded_prompt_can_still_be_paid() {
    let mut config = test_config();
    config.pending_payment_ttl = Duration::from_secs(0);
    let (state, _) = test_state_with(config, Behaviour::Accept);
    let (_, token) = register(&state, "nyambura").await;
    let adventure_id = create_adventure(&state, 1500, 6).await;
    let (booking, first) = booked_and_paid(&state, &token, adventure_id, 1).await;
    let booking_id = booking["id"].as_i64().unwrap();

    let (status, second) = initiate(&state, &token, booking_id).await;
    assert_eq!(status, StatusCode::CREATED);
    let first_id = first["id"].as_i64().unwrap();
    let (_, superseded) = call(&state, "GET", &format!("/api/payments/{first_id}"), Some(&token), None).await;
    assert_eq!(superseded["status"], "failed");

    let mut events = state.payment_events.subscribe();
    let checkout = first["checkout_request_id"].as_str().unwrap();
    let (status, ack) = callback(&state, "/api/mpesa/callback", success_callback(checkout, 1500)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);
    assert_eq!(events.try_recv().unwrap().payment_id, first_id);

    let (_, paid) = call(&state, "GET", &format!("/api/payments/{first_id}"), Some(&token), None).await;
    assert_eq!(paid["status"], "completed");
    assert_eq!(paid["mpesa_receipt_number"], "NLJ7RT61SV");
    let (_, booking) = call(&state, "GET", &format!("/api/bookings/{booking_id}"), Some(&token), None).await;
    assert_eq!(booking["status"], "confirmed");

    // The newer prompt was left outstanding; paying it too is recorded.
    let checkout = second["checkout_request_id"].as_str().unwrap();
    let (status, _) = callback(&state, "/api/mpesa/callback", success_callback(checkout, 1500)).await;
    assert_eq!(status, StatusCode::OK);
    let second_id = second["id"].as_i64().unwrap();
    let (_, also_paid) = call(&state, "GET", &format!("/api/payments/{second_id}"), Some(&token), None).await;
    assert_eq!(also_paid["status"], "completed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_never_overbook() {
    let state = test_state();
    let adventure_id = create_adventure(&state, 1000, 5).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let state = Arc::clone(&state);
        tasks.push(tokio::spawn(async move {
            let (_, token) = register(&state, &format!("hiker{i}")).await;
            let (status, booking) = book(&state, &token, adventure_id, 2).await;
            if status != StatusCode::CREATED {
                assert_eq!(status, StatusCode::CONFLICT, "{booking}");
                return;
            }
            let (status, payment) = initiate(&state, &token, booking["id"].as_i64().unwrap()).await;
            assert_eq!(status, StatusCode::CREATED, "{payment}");
            let checkout = payment["checkout_request_id"].as_str().unwrap();
            let (status, _) =
                callback(&state, "/api/mpesa/callback", success_callback(checkout, 2000)).await;
            assert_eq!(status, StatusCode::OK);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let date = &trip_date()[..10];
    let (_, availability) = call(
        &state,
        "GET",
        &format!("/api/adventures/{adventure_id}/availability?date={date}"),
        None,
        None,
    )
    .await;
    // Parties of two on five seats: exactly two settle into confirmed.
    assert_eq!(availability["confirmed_people"], 4);
    assert_eq!(availability["available"], 1);

    let (_, confirmed) = call(
        &state,
        "GET",
        "/api/admin/bookings?status=confirmed",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    let people: i64 = confirmed["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["number_of_people"].as_i64().unwrap())
        .sum();
    assert!(people <= 5);
}

#[tokio::test]
async fn test_provider_failure_and_timeout() {
    let (state, _) = test_state_with(test_config(), Behaviour::Reject);
    let (_, token) = register(&state, "wafula").await;
    let adventure_id = create_adventure(&state, 1200, 6).await;
    let (_, booking) = book(&state, &token, adventure_id, 1).await;
    let booking_id = booking["id"].as_i64().unwrap();

    let (status, _) = initiate(&state, &token, booking_id).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let (_, page) = call(&state, "GET", "/api/payments", Some(&token), None).await;
    assert_eq!(page["total"], 0);

    let mut config = test_config();
    config.payment_timeout = Duration::from_millis(50);
    let (state, _) = test_state_with(config, Behaviour::Hang);
    let (_, token) = register(&state, "wafula").await;
    let adventure_id = create_adventure(&state, 1200, 6).await;
    let (_, booking) = book(&state, &token, adventure_id, 1).await;

    let (status, _) = initiate(&state, &token, booking["id"].as_i64().unwrap()).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_payment_only_by_owner_for_pending_booking() {
    let state = test_state();
    let (_, owner) = register(&state, "halima").await;
    let (_, stranger) = register(&state, "juma").await;
    let adventure_id = create_adventure(&state, 1200, 6).await;
    let (_, booking) = book(&state, &owner, adventure_id, 1).await;
    let booking_id = booking["id"].as_i64().unwrap();

    let (status, _) = initiate(&state, &stranger, booking_id).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    call(&state, "POST", &format!("/api/bookings/{booking_id}/cancel"), Some(&owner), None).await;
    let (status, _) = initiate(&state, &owner, booking_id).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = initiate(&state, &owner, 9999).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Booking Lifecycle ──

#[tokio::test]
async fn test_cancel_rules() {
    let state = test_state();
    let (_, owner) = register(&state, "zawadi").await;
    let (_, stranger) = register(&state, "imani").await;
    let adventure_id = create_adventure(&state, 500, 8).await;
    let (_, booking) = book(&state, &owner, adventure_id, 2).await;
    let uri = format!("/api/bookings/{}/cancel", booking["id"]);

    let (status, _) = call(&state, "POST", &uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = call(&state, "POST", &uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "cancelled");

    let (status, _) = call(&state, "POST", &uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_booking_validation() {
    let state = test_state();
    let (_, token) = register(&state, "salim").await;
    let adventure_id = create_adventure(&state, 500, 8).await;

    let (status, _) = call(
        &state,
        "POST",
        "/api/bookings",
        Some(&token),
        Some(json!({
            "adventure_id": adventure_id,
            "adventure_date": "2001-01-01T07:00:00Z",
            "number_of_people": 1,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = book(&state, &token, adventure_id, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = book(&state, &token, 4242, 1).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bookings_paginated() {
    let state = test_state();
    let (_, token) = register(&state, "rehema").await;
    let adventure_id = create_adventure(&state, 500, 50).await;
    for _ in 0..3 {
        book(&state, &token, adventure_id, 1).await;
    }

    let (status, page) = call(&state, "GET", "/api/bookings?per_page=2&page=2", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["pages"], 2);
    assert_eq!(page["current_page"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);

    let (status, _) = call(&state, "GET", "/api/bookings?status=refunded", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_huge_page_number_returns_empty_page() {
    let state = test_state();
    let (_, token) = register(&state, "baraka").await;
    let adventure_id = create_adventure(&state, 500, 10).await;
    book(&state, &token, adventure_id, 1).await;

    let huge = i64::MAX;
    for (uri, token) in [
        (format!("/api/bookings?page={huge}"), token.as_str()),
        (format!("/api/payments?page={huge}&per_page=100"), token.as_str()),
        (format!("/api/admin/users?page={huge}"), ADMIN_TOKEN),
    ] {
        let (status, page) = call(&state, "GET", &uri, Some(token), None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert!(page["items"].as_array().unwrap().is_empty(), "{uri}");
        assert_eq!(page["current_page"], huge);
    }
}

// ── Admin API ──

#[tokio::test]
async fn test_admin_booking_and_catalog_management() {
    let state = test_state();
    let (user_id, token) = register(&state, "nafula").await;
    let adventure_id = create_adventure(&state, 700, 10).await;
    let (_, booking) = book(&state, &token, adventure_id, 2).await;
    let booking_uri = format!("/api/admin/bookings/{}", booking["id"]);

    let (status, _) = call(&state, "PUT", &booking_uri, Some(ADMIN_TOKEN), Some(json!({"status": "completed"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = call(&state, "PUT", &booking_uri, Some(ADMIN_TOKEN), Some(json!({"status": "confirmed"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "confirmed");

    let (_, page) = call(&state, "GET", "/api/admin/bookings?status=confirmed", Some(ADMIN_TOKEN), None).await;
    assert_eq!(page["total"], 1);

    // Confirmed bookings freeze the listing, but it can still be deactivated.
    let (status, _) = call(
        &state,
        "PUT",
        &format!("/api/adventures/{adventure_id}"),
        Some(ADMIN_TOKEN),
        Some(json!({"price": 900})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = call(
        &state,
        "PUT",
        &format!("/api/admin/adventures/{adventure_id}/toggle-status"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_active"], false);

    let (_, public) = call(&state, "GET", "/api/adventures", None, None).await;
    assert!(public.as_array().unwrap().is_empty());
    let (status, _) = call(&state, "GET", &format!("/api/adventures/{adventure_id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, inactive) = call(&state, "GET", "/api/admin/adventures?status=inactive", Some(ADMIN_TOKEN), None).await;
    assert_eq!(inactive.as_array().unwrap().len(), 1);

    let (status, json) = call(
        &state,
        "PUT",
        &format!("/api/admin/users/{user_id}/toggle-admin"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_admin"], true);

    let (_, users) = call(&state, "GET", "/api/admin/users?search=nafula", Some(ADMIN_TOKEN), None).await;
    assert_eq!(users["total"], 1);
}

#[tokio::test]
async fn test_adventure_owner_can_edit_and_delete() {
    let state = test_state();
    let (_, guide) = register(&state, "guide").await;
    let (_, other) = register(&state, "other").await;

    let (status, adventure) = call(
        &state,
        "POST",
        "/api/adventures",
        Some(&guide),
        Some(json!({"title": "Hell's Gate cycling", "price": 1800})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(adventure["max_capacity"], 10);
    let uri = format!("/api/adventures/{}", adventure["id"]);

    let (status, _) = call(&state, "PUT", &uri, Some(&other), Some(json!({"price": 1})) ).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = call(&state, "PUT", &uri, Some(&guide), Some(json!({"price": 2000}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["price"], 2000);

    let (status, json) = call(&state, "DELETE", &uri, Some(&guide), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_active"], false);

    let (status, _) = call(
        &state,
        "POST",
        "/api/adventures",
        Some(&guide),
        Some(json!({"title": "Free walk", "price": -1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_my_adventures_and_admin_user_detail() {
    let state = test_state();
    let (guide_id, guide) = register(&state, "ruto").await;
    let (_, other) = register(&state, "langat").await;

    for title in ["Ngong Hills ridge walk", "Lake Naivasha boat ride"] {
        let (status, _) = call(
            &state,
            "POST",
            "/api/adventures",
            Some(&guide),
            Some(json!({"title": title, "price": 1500, "max_capacity": 4})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, mine) = call(&state, "GET", "/api/adventures/my-adventures", Some(&guide), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 2);
    let (_, theirs) = call(&state, "GET", "/api/adventures/my-adventures", Some(&other), None).await;
    assert!(theirs.as_array().unwrap().is_empty());
    let (status, _) = call(&state, "GET", "/api/adventures/my-adventures", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let uri = format!("/api/admin/users/{guide_id}");
    let (status, detail) = call(&state, "GET", &uri, Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["username"], "ruto");
    assert_eq!(detail["statistics"]["adventures_created"], 2);
    assert_eq!(detail["statistics"]["total_spent"], 0);
    assert!(detail.get("api_token").is_none());

    let (status, _) = call(&state, "GET", &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&state, "GET", "/api/admin/users/9999", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
