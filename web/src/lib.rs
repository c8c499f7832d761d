//! HTTP and WebSocket boundary of the lending engine.
//!
//! Handlers stay thin: authenticate, parse, call the [`LoanManager`] or the
//! [`LiveHub`], map the outcome to a status.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Authenticate** the bearer token into a borrower id
//! 3. **Extract data** from the request (JSON body, path)
//! 4. **Call** the loan manager, which commits one store transaction
//! 5. **Map result** to an HTTP response via [`AppError`]
//!
//! Lifecycle events are published after commit by the manager; nothing here
//! waits on the event bus.
//!
//! # Example
//!
//! ```ignore
//! use lending_web::{AppState, JwtVerifier, build_router};
//!
//! let state = AppState::new(loans, hub, Arc::new(JwtVerifier::new(secret.as_bytes())));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, build_router(state)).await?;
//! ```
//!
//! [`LoanManager`]: lending_runtime::LoanManager
//! [`LiveHub`]: lending_runtime::LiveHub

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use auth::{AuthenticatedBorrower, BearerToken, Claims, JwtVerifier, TokenError, TokenVerifier};
pub use error::AppError;
pub use router::build_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
