use chrono::NaiveDateTime;
use serde::Deserialize;

/// Body M-Pesa posts to the STK callback URL.
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<RawMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
}

/// Settlement details extracted from a successful callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackMetadata {
    pub receipt_number: Option<String>,
    pub amount: Option<i64>,
    pub transaction_date: Option<NaiveDateTime>,
    pub phone_number: Option<String>,
}

impl CallbackMetadata {
    pub fn from_items(items: &[MetadataItem]) -> Self {
        let mut meta = CallbackMetadata::default();
        for item in items {
            match item.name.as_str() {
                "MpesaReceiptNumber" => meta.receipt_number = value_as_string(&item.value),
                "Amount" => meta.amount = item.value.as_f64().map(|a| a.round() as i64),
                "TransactionDate" => {
                    meta.transaction_date = value_as_string(&item.value).and_then(|s| {
                        NaiveDateTime::parse_from_str(&s, "%Y%m%d%H%M%S").ok()
                    })
                }
                "PhoneNumber" => meta.phone_number = value_as_string(&item.value),
                _ => {}
            }
        }
        meta
    }
}

impl StkCallback {
    pub fn metadata(&self) -> CallbackMetadata {
        self.callback_metadata
            .as_ref()
            .map(|raw| CallbackMetadata::from_items(&raw.items))
            .unwrap_or_default()
    }
}

fn value_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
