//! M-Pesa Daraja client (STK push and push status query)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use super::gateway::{GatewayError, PaymentGateway, PushAccepted, PushRequest, QueryStatus};
use crate::config::DarajaConfig;

/// Tokens are valid for an hour; refresh a little early
const TOKEN_TTL: Duration = Duration::from_secs(55 * 60);

/// Query error returned while the customer has not yet acted on the push
const STILL_PROCESSING: &str = "500.001.1001";

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    fetched_at: Instant,
}

pub struct DarajaClient {
    http: reqwest::Client,
    config: DarajaConfig,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushBody<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
    customer_message: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryBody<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

impl DarajaClient {
    pub fn new(config: DarajaConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    fn base_url(&self) -> &'static str {
        if self.config.production {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        }
    }

    /// Timestamp and password for a request. Daraja expects East Africa time.
    fn credentials(&self) -> (String, String) {
        let timestamp = (Utc::now() + chrono::Duration::hours(3))
            .format("%Y%m%d%H%M%S")
            .to_string();
        let password = STANDARD.encode(format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        ));
        (timestamp, password)
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.fetched_at.elapsed() < TOKEN_TTL {
                return Ok(token.value.clone());
            }
        }

        tracing::debug!("Requesting new Daraja access token");
        let response = self
            .http
            .get(format!(
                "{}/oauth/v1/generate?grant_type=client_credentials",
                self.base_url()
            ))
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let response = check_status(response)?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("Invalid token response: {}", e)))?;

        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            fetched_at: Instant::now(),
        });
        Ok(body.access_token)
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Status handling for the OAuth endpoint
fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    match response.status() {
        StatusCode::TOO_MANY_REQUESTS => Err(GatewayError::RateLimited {
            retry_after: retry_after(&response),
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::Rejected(
            format!("Daraja refused credentials ({})", response.status()),
        )),
        s if s.is_success() => Ok(response),
        s => Err(GatewayError::Transport(format!("Daraja returned HTTP {}", s))),
    }
}

/// `ResultCode` arrives as a string from the query endpoint and as a number
/// in callbacks
pub(crate) fn parse_result_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for DarajaClient {
    async fn push(&self, request: &PushRequest) -> Result<PushAccepted, GatewayError> {
        let token = self.access_token().await?;
        let (timestamp, password) = self.credentials();

        let body = StkPushBody {
            business_short_code: &self.config.shortcode,
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: request.amount,
            party_a: &request.phone_number,
            party_b: &self.config.shortcode,
            phone_number: &request.phone_number,
            callback_url: &self.config.callback_url,
            account_reference: &request.account_reference,
            transaction_desc: &request.description,
        };

        let response = self
            .http
            .post(format!("{}/mpesa/stkpush/v1/processrequest", self.base_url()))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited {
                retry_after: retry_after(&response),
            });
        }
        let status = response.status();
        let parsed: StkPushResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("Invalid push response ({}): {}", status, e)))?;

        match (parsed.response_code.as_deref(), parsed.checkout_request_id) {
            (Some("0"), Some(checkout_request_id)) => Ok(PushAccepted {
                checkout_request_id,
                merchant_request_id: parsed.merchant_request_id.unwrap_or_default(),
                customer_message: parsed.customer_message,
            }),
            _ => Err(GatewayError::Rejected(
                parsed
                    .error_message
                    .or(parsed.response_description)
                    .unwrap_or_else(|| format!("STK push failed with HTTP {}", status)),
            )),
        }
    }

    async fn query(&self, checkout_request_id: &str) -> Result<QueryStatus, GatewayError> {
        let token = self.access_token().await?;
        let (timestamp, password) = self.credentials();

        let body = StkQueryBody {
            business_short_code: &self.config.shortcode,
            password,
            timestamp,
            checkout_request_id,
        };

        let response = self
            .http
            .post(format!("{}/mpesa/stkpushquery/v1/query", self.base_url()))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited {
                retry_after: retry_after(&response),
            });
        }
        let status = response.status();
        let data: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("Invalid query response ({}): {}", status, e)))?;

        if data.get("errorCode").and_then(Value::as_str) == Some(STILL_PROCESSING) {
            return Ok(QueryStatus::Pending);
        }

        match data.get("ResultCode").and_then(parse_result_code) {
            Some(result_code) => Ok(QueryStatus::Completed {
                result_code,
                result_description: data
                    .get("ResultDesc")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                receipt: None,
            }),
            None => Err(GatewayError::Transport(
                data.get("errorMessage")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Unexpected query response with HTTP {}", status)),
            )),
        }
    }
}
