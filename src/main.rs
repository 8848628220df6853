use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use adventures::config::AppConfig;
use adventures::db::{self, queries};
use adventures::routes::build_router;
use adventures::services::payments::mock::MockPaymentProvider;
use adventures::services::payments::mpesa::MpesaStkProvider;
use adventures::services::payments::PaymentProvider;
use adventures::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;
    if config.admin_token.is_empty() {
        tracing::warn!("ADMIN_TOKEN not set; no admin account bootstrapped");
    } else {
        queries::upsert_admin(&conn, &config.admin_token)?;
    }

    let payments: Box<dyn PaymentProvider> = match config.payment_provider.as_str() {
        "mpesa" => {
            tracing::info!(
                base_url = %config.mpesa.base_url,
                shortcode = %config.mpesa.shortcode,
                "using M-Pesa STK push provider"
            );
            Box::new(MpesaStkProvider::new(
                config.mpesa.clone(),
                config.payment_timeout,
            )?)
        }
        "mock" => {
            tracing::warn!("using mock payment provider; callbacks must be posted by hand");
            Box::new(MockPaymentProvider)
        }
        other => anyhow::bail!("unknown PAYMENT_PROVIDER '{other}', expected mpesa or mock"),
    };

    let (payment_events, _) = broadcast::channel(256);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        payments,
        payment_events,
    });

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
