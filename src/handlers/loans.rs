//! Loan account handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::ledger::Posting;
use crate::loan::{
    AdjustRequest, DisburseRequest, ListLoansQuery, LoanService, LoanStatement, LoanView,
    PaymentRequest, PortfolioSummary, TopupRequest,
};
use crate::models::ApiResponse;

pub async fn disburse_loan(
    State(service): State<Arc<LoanService>>,
    Json(request): Json<DisburseRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Posting<LoanView>>>)> {
    request.validate()?;
    let posting = service.disburse(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(posting))))
}

pub async fn apply_payment(
    State(service): State<Arc<LoanService>>,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<PaymentRequest>,
) -> ApiResult<Json<ApiResponse<Posting<LoanView>>>> {
    request.validate()?;
    let posting = service.apply_payment(loan_id, request).await?;
    Ok(Json(ApiResponse::ok(posting)))
}

pub async fn topup_loan(
    State(service): State<Arc<LoanService>>,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<TopupRequest>,
) -> ApiResult<Json<ApiResponse<Posting<LoanView>>>> {
    request.validate()?;
    let posting = service.topup(loan_id, request).await?;
    Ok(Json(ApiResponse::ok(posting)))
}

pub async fn adjust_loan(
    State(service): State<Arc<LoanService>>,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<AdjustRequest>,
) -> ApiResult<Json<ApiResponse<Posting<LoanView>>>> {
    request.validate()?;
    let posting = service.adjust(loan_id, request).await?;
    Ok(Json(ApiResponse::ok(posting)))
}

pub async fn get_loan(
    State(service): State<Arc<LoanService>>,
    Path(loan_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<LoanView>>> {
    let loan = service.get_loan(loan_id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn list_loans(
    State(service): State<Arc<LoanService>>,
    Query(query): Query<ListLoansQuery>,
) -> ApiResult<Json<ApiResponse<Vec<LoanView>>>> {
    let loans = service.list_loans(&query).await?;
    Ok(Json(ApiResponse::ok(loans)))
}

pub async fn loan_statement(
    State(service): State<Arc<LoanService>>,
    Path(loan_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<LoanStatement>>> {
    let statement = service.loan_statement(loan_id).await?;
    Ok(Json(ApiResponse::ok(statement)))
}

/// Admin dashboard figures
pub async fn portfolio_summary(
    State(service): State<Arc<LoanService>>,
) -> ApiResult<Json<ApiResponse<PortfolioSummary>>> {
    let summary = service.portfolio_summary().await?;
    Ok(Json(ApiResponse::ok(summary)))
}
