//! Health check endpoints.
//!
//! Used by load balancers and monitoring systems to verify service health.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::state::AppState;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
}

/// Liveness check. Does not touch dependencies.
///
/// ```text
/// GET /health
/// {"status":"ok","version":"0.1.0"}
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// Readiness response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// Overall readiness
    pub ready: bool,
    /// Inventory store answered a read
    pub database: bool,
    /// Live hub task is running
    pub live_hub: bool,
    /// Connected live viewers, when the hub is running
    pub connected_clients: Option<usize>,
}

/// Readiness check: the store answers and the live hub is running.
///
/// ```text
/// GET /health/ready
/// {"ready":true,"database":true,"live_hub":true,"connected_clients":3}
/// ```
///
/// Returns 503 when any dependency is down.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = match state.loans.stats().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: store check failed");
            false
        },
    };
    let connected_clients = state.hub.connected_count().await.ok();
    let live_hub = connected_clients.is_some();
    let ready = database && live_hub;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            database,
            live_hub,
            connected_clients,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, Json(body)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
    }
}
