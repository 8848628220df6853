use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{PaymentAccepted, PaymentProvider, PaymentRequest};
use crate::config::MpesaConfig;

/// Daraja timestamps are East Africa Time.
const EAT_OFFSET_HOURS: i64 = 3;

pub struct MpesaStkProvider {
    config: MpesaConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    customer_message: Option<String>,
}

impl MpesaStkProvider {
    pub fn new(config: MpesaConfig, timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.consumer_key.is_empty() && !config.consumer_secret.is_empty(),
            "MPESA_CONSUMER_KEY and MPESA_CONSUMER_SECRET must be set"
        );
        anyhow::ensure!(!config.passkey.is_empty(), "MPESA_PASSKEY must be set");
        anyhow::ensure!(!config.callback_url.is_empty(), "MPESA_CALLBACK_URL must be set");

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build M-Pesa HTTP client")?;
        Ok(Self { config, client })
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let token: TokenResponse = self
            .client
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .context("failed to request M-Pesa access token")?
            .error_for_status()
            .context("M-Pesa OAuth returned error")?
            .json()
            .await
            .context("failed to parse M-Pesa OAuth response")?;
        Ok(token.access_token)
    }

    fn callback_url(&self) -> String {
        if self.config.callback_token.is_empty() {
            return self.config.callback_url.clone();
        }
        let separator = if self.config.callback_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}token={}",
            self.config.callback_url, self.config.callback_token
        )
    }
}

pub fn stk_timestamp(now_utc: NaiveDateTime) -> String {
    (now_utc + chrono::Duration::hours(EAT_OFFSET_HOURS))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

/// `base64(shortcode + passkey + timestamp)`.
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

#[async_trait]
impl PaymentProvider for MpesaStkProvider {
    async fn request_payment(&self, request: &PaymentRequest) -> anyhow::Result<PaymentAccepted> {
        let access_token = self.access_token().await?;
        let timestamp = stk_timestamp(Utc::now().naive_utc());
        let password = stk_password(&self.config.shortcode, &self.config.passkey, &timestamp);

        let body = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": request.amount,
            "PartyA": request.phone_number,
            "PartyB": self.config.shortcode,
            "PhoneNumber": request.phone_number,
            "CallBackURL": self.callback_url(),
            "AccountReference": request.account_reference,
            "TransactionDesc": request.description,
        });

        let resp = self
            .client
            .post(format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url))
            .bearer_auth(&access_token)
            .json(&body)
            .send()
            .await
            .context("failed to call M-Pesa STK push")?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .context("failed to read M-Pesa STK push response")?;
        if !status.is_success() {
            anyhow::bail!("M-Pesa STK push error ({status}): {text}");
        }

        let data: StkPushResponse =
            serde_json::from_str(&text).context("failed to parse M-Pesa STK push response")?;
        if data.response_code.as_deref() != Some("0") {
            anyhow::bail!(
                "M-Pesa STK push rejected: {}",
                data.response_description.as_deref().unwrap_or(&text)
            );
        }

        let checkout_request_id = data
            .checkout_request_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing CheckoutRequestID in M-Pesa response"))?;

        tracing::info!(
            checkout_request_id = %checkout_request_id,
            reference = %request.account_reference,
            "STK push accepted"
        );

        Ok(PaymentAccepted {
            checkout_request_id,
            merchant_request_id: data.merchant_request_id,
            customer_message: data.customer_message,
        })
    }
}
