//! Collateral ownership handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::collateral::service::{ApprovedLoan, ClaimedLoan};
use crate::collateral::{ApproveLoanRequest, Collateral, OwnershipService};
use crate::error::ApiResult;
use crate::ledger::Posting;
use crate::models::ApiResponse;

/// Approve an application and pledge its livestock
pub async fn approve_loan(
    State(service): State<Arc<OwnershipService>>,
    Json(request): Json<ApproveLoanRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Posting<ApprovedLoan>>>)> {
    request.validate()?;
    let posting = service.approve_loan(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(posting))))
}

pub async fn claim_ownership(
    State(service): State<Arc<OwnershipService>>,
    Path(loan_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Posting<ClaimedLoan>>>> {
    let posting = service.claim_ownership(loan_id).await?;
    Ok(Json(ApiResponse::ok(posting)))
}

pub async fn list_inventory(
    State(service): State<Arc<OwnershipService>>,
) -> ApiResult<Json<ApiResponse<Vec<Collateral>>>> {
    let inventory = service.list_inventory().await?;
    Ok(Json(ApiResponse::ok(inventory)))
}
