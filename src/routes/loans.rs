//! Loan route definitions

use axum::{routing::get, routing::post, Router};

use crate::handlers::*;
use crate::state::AppState;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans", get(list_loans))
        .route("/api/loans/summary", get(portfolio_summary))
        .route("/api/loans/disburse", post(disburse_loan))
        .route("/api/loans/:id", get(get_loan))
        .route("/api/loans/:id/statement", get(loan_statement))
        .route("/api/loans/:id/payments", post(apply_payment))
        .route("/api/loans/:id/topup", post(topup_loan))
        .route("/api/loans/:id/adjust", post(adjust_loan))
}
