//! Push payment handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::models::ApiResponse;
use crate::payments::{
    InitiatePushRequest, PaymentError, PaymentService, PaymentSession, StkCallbackEnvelope,
};
use crate::state::AppState;

pub async fn initiate_push(
    State(service): State<Arc<PaymentService>>,
    Json(request): Json<InitiatePushRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<PaymentSession>>)> {
    request.validate()?;
    let session = service.initiate_push(request).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::ok(session))))
}

/// Run one status query and return the session
pub async fn poll_status(
    State(service): State<Arc<PaymentService>>,
    Path(checkout_request_id): Path<String>,
) -> ApiResult<Json<ApiResponse<PaymentSession>>> {
    let session = service.poll_status(&checkout_request_id).await?;
    Ok(Json(ApiResponse::ok(session)))
}

pub async fn cancel_watch(
    State(service): State<Arc<PaymentService>>,
    Path(checkout_request_id): Path<String>,
) -> ApiResult<Json<ApiResponse<PaymentSession>>> {
    let session = service.cancel_watch(&checkout_request_id).await?;
    Ok(Json(ApiResponse::ok(session)))
}

/// Gateway result callback. Authenticated results are always acknowledged
/// so the gateway does not redeliver them.
pub async fn payment_callback(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    match &app_state.callback_secret {
        Some(secret) if !secret.is_empty() => {
            let provided = headers
                .get("X-Webhook-Secret")
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default();

            if provided != secret {
                return Err(ApiError::Unauthorized(
                    "Unauthorized callback request".to_string(),
                ));
            }
        }
        _ => {
            // Fail closed without a configured secret
            tracing::error!("Callback secret not configured - rejecting request");
            return Err(ApiError::ServiceUnavailable(
                "Callback endpoint is not configured".to_string(),
            ));
        }
    }

    let envelope: StkCallbackEnvelope = serde_json::from_value(payload)?;
    let result = envelope.body.stk_callback.into_result().ok_or_else(|| {
        ApiError::BadRequest("Callback carries no usable result code".to_string())
    })?;

    match app_state.payment_service.handle_callback(result).await {
        Ok(session) => {
            tracing::debug!(
                checkout_request_id = %session.checkout_request_id,
                state = ?session.state,
                "Callback applied"
            );
        }
        Err(PaymentError::SessionNotFound(id)) => {
            tracing::warn!(checkout_request_id = %id, "Callback ignored; session expired or unknown");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" })))
}
