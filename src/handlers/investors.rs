//! Investor capital handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::investor::{
    AdjustInvestmentRequest, InvestRequest, Investor, InvestorService, InvestorSummary,
    OpenInvestorRequest, ProcessReturnRequest, ReturnQuote,
};
use crate::ledger::Posting;
use crate::models::ApiResponse;

pub async fn open_investor(
    State(service): State<Arc<InvestorService>>,
    Json(request): Json<OpenInvestorRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Investor>>)> {
    request.validate()?;
    let investor = service.open_investor(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(investor))))
}

pub async fn get_investor(
    State(service): State<Arc<InvestorService>>,
    Path(investor_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Investor>>> {
    let investor = service.get_investor(investor_id).await?;
    Ok(Json(ApiResponse::ok(investor)))
}

pub async fn invest(
    State(service): State<Arc<InvestorService>>,
    Path(investor_id): Path<Uuid>,
    Json(request): Json<InvestRequest>,
) -> ApiResult<Json<ApiResponse<Posting<Investor>>>> {
    request.validate()?;
    let posting = service.invest(investor_id, request).await?;
    Ok(Json(ApiResponse::ok(posting)))
}

pub async fn adjust_investment(
    State(service): State<Arc<InvestorService>>,
    Path(investor_id): Path<Uuid>,
    Json(request): Json<AdjustInvestmentRequest>,
) -> ApiResult<Json<ApiResponse<Posting<Investor>>>> {
    request.validate()?;
    let posting = service.adjust_investment(investor_id, request).await?;
    Ok(Json(ApiResponse::ok(posting)))
}

pub async fn return_quote(
    State(service): State<Arc<InvestorService>>,
    Path(investor_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<ReturnQuote>>> {
    let quote = service.compute_return(investor_id).await?;
    Ok(Json(ApiResponse::ok(quote)))
}

pub async fn process_return(
    State(service): State<Arc<InvestorService>>,
    Path(investor_id): Path<Uuid>,
    Json(request): Json<ProcessReturnRequest>,
) -> ApiResult<Json<ApiResponse<Posting<Investor>>>> {
    let posting = service.process_return(investor_id, request).await?;
    Ok(Json(ApiResponse::ok(posting)))
}

pub async fn investor_summary(
    State(service): State<Arc<InvestorService>>,
    Path(investor_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<InvestorSummary>>> {
    let summary = service.investor_summary(investor_id).await?;
    Ok(Json(ApiResponse::ok(summary)))
}
