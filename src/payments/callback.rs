//! Daraja STK callback payload

use serde::Deserialize;
use serde_json::Value;

use super::daraja::parse_result_code;

#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    pub result_code: Value,
    #[serde(default)]
    pub result_desc: Option<String>,
    #[serde(default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

/// Final outcome carried by a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_description: String,
    pub receipt: Option<String>,
    pub amount: Option<i64>,
}

impl StkCallback {
    pub fn into_result(self) -> Option<CallbackResult> {
        let result_code = parse_result_code(&self.result_code)?;
        let metadata = self.callback_metadata.map(|m| m.items).unwrap_or_default();
        let item = |name: &str| {
            metadata
                .iter()
                .find(|item| item.name == name)
                .and_then(|item| item.value.clone())
        };

        let receipt = item("MpesaReceiptNumber").and_then(|v| match v {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let amount = item("Amount").and_then(|v| v.as_f64()).map(|a| a as i64);

        Some(CallbackResult {
            checkout_request_id: self.checkout_request_id,
            result_code,
            result_description: self.result_desc.unwrap_or_default(),
            receipt,
            amount,
        })
    }
}
