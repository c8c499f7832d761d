//! Route table.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{health_check, live, loans, readiness_check};
use crate::state::AppState;

/// Build the application router.
///
/// ```text
/// GET  /health                  liveness
/// GET  /health/ready            readiness (store + hub)
/// POST /api/loans               borrow
/// POST /api/loans/:id/return    return
/// GET  /api/loans/me            caller's loans
/// GET  /api/loans/stats         aggregate counts
/// GET  /ws                      live feed (WebSocket)
/// ```
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/loans", post(loans::borrow))
        .route("/loans/me", get(loans::my_loans))
        .route("/loans/stats", get(loans::stats))
        .route("/loans/:id/return", post(loans::return_loan));

    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .route("/ws", get(live::live))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
