//! Application state for the HTTP server.

use lending_runtime::{LiveHub, LoanManager};
use std::sync::Arc;

use crate::auth::TokenVerifier;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply via `Arc`) for each request.
#[derive(Clone)]
pub struct AppState {
    /// Loan lifecycle operations
    pub loans: Arc<LoanManager>,

    /// Live broadcast hub for WebSocket viewers
    pub hub: LiveHub,

    /// Verifies bearer tokens on loan routes and the live endpoint
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(loans: Arc<LoanManager>, hub: LiveHub, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { loans, hub, verifier }
    }
}
