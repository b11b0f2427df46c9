//! HTTP surface: routing, response envelopes and error bodies

mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::{completed, Harness};
use herdbook_server::routes::app_router;
use herdbook_server::state::AppState;

const SECRET: &str = "callback-secret";

fn app(h: &Harness) -> Router {
    app_router(AppState::new(
        Arc::new(h.loans.clone()),
        Arc::new(h.investors.clone()),
        Arc::new(h.ownership.clone()),
        Arc::new(h.payments.clone()),
        h.store.clone(),
        Some(SECRET.to_string()),
    ))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn disburse(app: &Router, principal: i64) -> Value {
    let (status, body) = send(
        app,
        post(
            "/api/loans/disburse",
            json!({
                "client_id": Uuid::new_v4(),
                "principal": principal,
                "funding_source": "company"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn test_health_reports_store() {
    let h = Harness::new();
    let (status, body) = send(&app(&h), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
}

#[tokio::test]
async fn test_disburse_returns_account_and_transaction() {
    let h = Harness::new();
    let app = app(&h);

    let body = disburse(&app, 10_000).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["account"]["principal_current"], 10_000);
    assert_eq!(body["data"]["account"]["expected_interest"], 3_000);
    assert_eq!(body["data"]["account"]["balance"], 13_000);
    assert_eq!(body["data"]["transaction"]["type"], "disbursement");

    let id = body["data"]["account"]["id"].as_str().unwrap().to_string();
    let (status, body) = send(&app, get(&format!("/api/loans/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["classification"], "active");

    let (status, body) = send(&app, get("/api/loans/summary")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["open_loans"], 1);
    assert_eq!(body["data"]["total_lent"], 10_000);
}

#[tokio::test]
async fn test_business_rule_rejection_carries_error_kind() {
    let h = Harness::new();
    let app = app(&h);
    let body = disburse(&app, 10_000).await;
    let id = body["data"]["account"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        post(
            &format!("/api/loans/{}/payments", id),
            json!({ "amount": 20_000, "payment_type": "principal", "method": "cash" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "AMOUNT_EXCEEDS_PRINCIPAL");

    let (status, body) = send(
        &app,
        post(
            &format!("/api/loans/{}/payments", id),
            json!({ "amount": 0, "payment_type": "principal", "method": "cash" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = send(&app, get(&format!("/api/loans/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_investor_endpoints() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(
        &app,
        post(
            "/api/investors",
            json!({ "name": "Njeri Wambui", "phone_number": "0722000111" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["account_status"], "pending");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        post(
            &format!("/api/investors/{}/invest", id),
            json!({ "amount": 100_000, "method": "bank" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["transaction"]["type"], "initial_investment");
    assert_eq!(body["data"]["account"]["account_status"], "active");

    let (status, body) = send(&app, get(&format!("/api/investors/{}/returns/quote", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["can_process"], false);
    assert_eq!(body["data"]["estimated_amount"], 40_000);

    let (status, body) = send(
        &app,
        post(
            &format!("/api/investors/{}/returns", id),
            json!({ "method": "mpesa" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "RETURN_NOT_YET_DUE");
}

#[tokio::test]
async fn test_push_and_poll_over_http() {
    let h = Harness::new();
    let app = app(&h);
    let body = disburse(&app, 10_000).await;
    let loan_id = body["data"]["account"]["id"].as_str().unwrap().to_string();
    h.gateway.script(vec![completed(0, Some("QKHTTP"))]).await;

    let (status, body) = send(
        &app,
        post(
            "/api/payments/push",
            json!({
                "loan_id": loan_id,
                "amount": 2_500,
                "phone_number": "0712345678",
                "payment_type": "principal"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["state"], "initiated");
    let checkout = body["data"]["checkout_request_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get(&format!("/api/payments/{}", checkout))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "confirmed");

    let (_, body) = send(&app, get(&format!("/api/loans/{}", loan_id))).await;
    assert_eq!(body["data"]["principal_current"], 7_500);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/payments/{}/watch", checkout))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_callback_requires_secret_and_acknowledges() {
    let h = Harness::new();
    let app = app(&h);
    let body = disburse(&app, 10_000).await;
    let loan_id: Uuid = body["data"]["account"]["id"].as_str().unwrap().parse().unwrap();

    let session = h
        .payments
        .initiate_push(herdbook_server::payments::InitiatePushRequest {
            loan_id,
            amount: 1_000,
            phone_number: "0712345678".to_string(),
            payment_type: herdbook_server::models::PaymentType::Principal,
        })
        .await
        .unwrap();

    let payload = json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": session.merchant_request_id,
                "CheckoutRequestID": session.checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": 1000 },
                        { "Name": "MpesaReceiptNumber", "Value": "QKCB998877" },
                        { "Name": "PhoneNumber", "Value": 254712345678u64 }
                    ]
                }
            }
        }
    });

    let (status, _) = send(&app, post("/api/payments/callback", payload.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = post("/api/payments/callback", payload);
    request
        .headers_mut()
        .insert("X-Webhook-Secret", SECRET.parse().unwrap());
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ResultCode"], 0);

    let session = h.payments.session(&session.checkout_request_id).await.unwrap();
    assert_eq!(session.receipt.as_deref(), Some("QKCB998877"));
    assert!(session.transaction_id.is_some());
}
