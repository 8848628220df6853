pub mod mock;
pub mod mpesa;

use async_trait::async_trait;

/// A customer-facing payment prompt to push to a phone.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// MSISDN in `2547XXXXXXXX` form.
    pub phone_number: String,
    /// Whole shillings.
    pub amount: i64,
    pub account_reference: String,
    pub description: String,
}

/// The provider's acknowledgement that a prompt was sent.
#[derive(Debug, Clone)]
pub struct PaymentAccepted {
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub customer_message: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn request_payment(&self, request: &PaymentRequest) -> anyhow::Result<PaymentAccepted>;
}

/// Normalises a Kenyan mobile number to `254XXXXXXXXX`.
pub fn normalize_msisdn(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let msisdn = if let Some(rest) = digits.strip_prefix('0') {
        format!("254{rest}")
    } else if digits.len() == 9 && (digits.starts_with('7') || digits.starts_with('1')) {
        format!("254{digits}")
    } else {
        digits
    };

    (msisdn.len() == 12 && msisdn.starts_with("254")).then_some(msisdn)
}
