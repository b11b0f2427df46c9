//! Investor route definitions

use axum::{routing::get, routing::post, Router};

use crate::handlers::*;
use crate::state::AppState;

pub fn investor_routes() -> Router<AppState> {
    Router::new()
        .route("/api/investors", post(open_investor))
        .route("/api/investors/:id", get(get_investor))
        .route("/api/investors/:id/invest", post(invest))
        .route("/api/investors/:id/adjust", post(adjust_investment))
        .route("/api/investors/:id/returns", post(process_return))
        .route("/api/investors/:id/returns/quote", get(return_quote))
        .route("/api/investors/:id/summary", get(investor_summary))
}
