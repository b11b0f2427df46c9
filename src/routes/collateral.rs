//! Collateral ownership route definitions

use axum::{routing::get, routing::post, Router};

use crate::handlers::*;
use crate::state::AppState;

pub fn collateral_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans/approve", post(approve_loan))
        .route("/api/loans/:id/claim", post(claim_ownership))
        .route("/api/collateral/available", get(list_inventory))
}
