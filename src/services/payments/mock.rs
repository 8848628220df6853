use async_trait::async_trait;

use super::{PaymentAccepted, PaymentProvider, PaymentRequest};

/// Accepts every request without contacting anyone. Callbacks for its
/// `MOCK_` ids have to be posted by hand.
pub struct MockPaymentProvider;

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn request_payment(&self, request: &PaymentRequest) -> anyhow::Result<PaymentAccepted> {
        let checkout_request_id = format!("MOCK_{}", uuid::Uuid::new_v4().simple());
        tracing::info!(
            phone = %request.phone_number,
            amount = request.amount,
            reference = %request.account_reference,
            checkout_request_id = %checkout_request_id,
            "mock payment prompt"
        );
        Ok(PaymentAccepted {
            checkout_request_id,
            merchant_request_id: None,
            customer_message: Some("Mock payment request accepted".to_string()),
        })
    }
}
