//! Route definitions for the ledger API

mod collateral;
mod investors;
mod loans;
mod payments;

use axum::{routing::get, Router};

pub use collateral::collateral_routes;
pub use investors::investor_routes;
pub use loans::loan_routes;
pub use payments::payment_routes;

use crate::handlers::health_check;
use crate::state::AppState;

/// Every API route plus `/health`, bound to the shared state
pub fn app_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(loan_routes())
        .merge(collateral_routes())
        .merge(investor_routes())
        .merge(payment_routes())
        .with_state(app_state)
}
