use std::env;
use std::time::Duration;

const MPESA_SANDBOX_URL: &str = "https://sandbox.safaricom.co.ke";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub payment_provider: String,
    pub mpesa: MpesaConfig,
    pub payment_timeout: Duration,
    pub pending_payment_ttl: Duration,
    /// bcrypt work factor for new password hashes.
    pub password_hash_cost: u32,
}

#[derive(Clone, Debug)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub passkey: String,
    pub shortcode: String,
    pub callback_url: String,
    /// Shared secret expected as `?token=` on the callback. Empty disables the check.
    pub callback_token: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mpesa = MpesaConfig::from_env();
        let payment_provider = env::var("PAYMENT_PROVIDER").unwrap_or_else(|_| {
            if mpesa.consumer_key.is_empty() {
                "mock".to_string()
            } else {
                "mpesa".to_string()
            }
        });

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "adventures.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_default(),
            payment_provider,
            mpesa,
            payment_timeout: Duration::from_secs(secs_from_env("PAYMENT_TIMEOUT_SECS", 15)),
            pending_payment_ttl: Duration::from_secs(secs_from_env("PENDING_PAYMENT_TTL_SECS", 120)),
            password_hash_cost: env::var("PASSWORD_HASH_COST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(bcrypt::DEFAULT_COST),
        }
    }
}

impl MpesaConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env::var("MPESA_BASE_URL").unwrap_or_else(|_| MPESA_SANDBOX_URL.to_string()),
            consumer_key: env::var("MPESA_CONSUMER_KEY").unwrap_or_default(),
            consumer_secret: env::var("MPESA_CONSUMER_SECRET").unwrap_or_default(),
            passkey: env::var("MPESA_PASSKEY").unwrap_or_default(),
            shortcode: env::var("MPESA_SHORTCODE").unwrap_or_else(|_| "174379".to_string()),
            callback_url: env::var("MPESA_CALLBACK_URL").unwrap_or_default(),
            callback_token: env::var("MPESA_CALLBACK_TOKEN").unwrap_or_default(),
        }
    }
}

fn secs_from_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
