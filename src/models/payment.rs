use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub adventure_id: i64,
    pub booking_id: Option<i64>,
    pub phone_number: String,
    pub amount: i64,
    pub status: PaymentStatus,
    /// Provider correlation id; the only key a callback carries.
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<NaiveDateTime>,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Payment {
    /// True until the provider has reported a result. A payment failed
    /// locally when superseded still awaits one: its prompt may yet be paid.
    pub fn awaits_result(&self) -> bool {
        match self.status {
            PaymentStatus::Pending => true,
            PaymentStatus::Failed => self.result_code.is_none(),
            PaymentStatus::Completed => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Published after a callback settles a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_id: i64,
    pub user_id: i64,
    pub booking_id: Option<i64>,
    pub status: PaymentStatus,
    pub receipt: Option<String>,
    pub result_desc: Option<String>,
}
