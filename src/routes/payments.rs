//! Push payment route definitions

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/push", post(initiate_push))
        .route("/api/payments/callback", post(payment_callback))
        .route("/api/payments/:checkout_request_id", get(poll_status))
        .route(
            "/api/payments/:checkout_request_id/watch",
            delete(cancel_watch),
        )
}
