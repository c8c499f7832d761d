//! HTTP request handlers.

pub mod health;
pub mod live;
pub mod loans;

pub use health::{health_check, readiness_check};
