//! Payment gateway seam and the simulated sandbox gateway

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

/// Push (STK) request sent to the customer's handset
#[derive(Debug, Clone, Serialize)]
pub struct PushRequest {
    pub phone_number: String,
    pub amount: i64,
    pub account_reference: String,
    pub description: String,
}

/// Gateway acknowledgement of a push
#[derive(Debug, Clone, Serialize)]
pub struct PushAccepted {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub customer_message: Option<String>,
}

/// Answer to a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    /// The customer has not acted yet
    Pending,
    Completed {
        result_code: i64,
        result_description: String,
        receipt: Option<String>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway rate limit hit")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Gateway unreachable: {0}")]
    Transport(String),

    #[error("Gateway rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn push(&self, request: &PushRequest) -> Result<PushAccepted, GatewayError>;

    async fn query(&self, checkout_request_id: &str) -> Result<QueryStatus, GatewayError>;
}

/// Simulated gateway used when no Daraja credentials are configured. Every
/// push answers pending once, then succeeds with a generated receipt.
#[derive(Default)]
pub struct SandboxGateway {
    queries: Mutex<HashMap<String, u32>>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

fn random_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn push(&self, request: &PushRequest) -> Result<PushAccepted, GatewayError> {
        let checkout_request_id = format!("ws_CO_SANDBOX_{}", random_token(16));
        self.queries
            .lock()
            .await
            .insert(checkout_request_id.clone(), 0);

        tracing::info!(
            phone = %request.phone_number,
            amount = request.amount,
            checkout_request_id = %checkout_request_id,
            "Sandbox push accepted"
        );

        Ok(PushAccepted {
            merchant_request_id: format!("SANDBOX-{}", random_token(8)),
            checkout_request_id,
            customer_message: Some("Success. Request accepted for processing".to_string()),
        })
    }

    async fn query(&self, checkout_request_id: &str) -> Result<QueryStatus, GatewayError> {
        let mut queries = self.queries.lock().await;
        let Some(count) = queries.get_mut(checkout_request_id) else {
            return Err(GatewayError::Rejected(format!(
                "Unknown checkout request {}",
                checkout_request_id
            )));
        };
        *count += 1;

        if *count < 2 {
            return Ok(QueryStatus::Pending);
        }
        Ok(QueryStatus::Completed {
            result_code: 0,
            result_description: "The service request is processed successfully.".to_string(),
            receipt: Some(random_token(10)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sandbox_confirms_on_second_query() {
        let gateway = SandboxGateway::new();
        let accepted = gateway
            .push(&PushRequest {
                phone_number: "254712345678".into(),
                amount: 100,
                account_reference: "LOAN".into(),
                description: "Loan Payment".into(),
            })
            .await
            .unwrap();

        assert_eq!(
            gateway.query(&accepted.checkout_request_id).await.unwrap(),
            QueryStatus::Pending
        );
        assert!(matches!(
            gateway.query(&accepted.checkout_request_id).await.unwrap(),
            QueryStatus::Completed { result_code: 0, .. }
        ));
        assert!(gateway.query("ws_CO_unknown").await.is_err());
    }
}
