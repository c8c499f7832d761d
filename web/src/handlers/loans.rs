//! Loan API endpoints.
//!
//! - POST /api/loans - Borrow an item
//! - POST /api/loans/:id/return - Return a loan
//! - GET /api/loans/me - The caller's loans, newest first
//! - GET /api/loans/stats - Aggregate loan counts
//!
//! Every route requires a bearer token; the borrower is always the token's
//! `user_id`, never a request field.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use lending_core::types::{ItemId, Loan, LoanDetails, LoanId, LoanStats};
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedBorrower;
use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to borrow an item.
#[derive(Debug, Deserialize)]
pub struct BorrowRequest {
    /// Item to borrow
    pub book_id: i64,
}

/// Response after returning a loan.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReturnResponse {
    /// Returned loan
    pub loan_id: LoanId,
    /// Always `"returned"`
    pub status: String,
    /// Human-readable confirmation
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Borrow an item for the authenticated borrower.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/loans \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"book_id": 42}'
/// ```
///
/// # Errors
///
/// 422 for a non-positive id, 404 for a missing item, 409 when out of stock or
/// already borrowed by the caller.
pub async fn borrow(
    State(state): State<AppState>,
    AuthenticatedBorrower(borrower): AuthenticatedBorrower,
    Json(request): Json<BorrowRequest>,
) -> Result<(StatusCode, Json<LoanDetails>), AppError> {
    let details = state.loans.borrow(borrower, ItemId::new(request.book_id)).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

/// Return one of the caller's loans.
///
/// # Errors
///
/// 404 for a missing loan, 403 when the loan belongs to someone else, 409 when
/// it was already returned.
pub async fn return_loan(
    State(state): State<AppState>,
    AuthenticatedBorrower(borrower): AuthenticatedBorrower,
    Path(loan_id): Path<i64>,
) -> Result<Json<ReturnResponse>, AppError> {
    let loan_id = LoanId::new(loan_id);
    state.loans.return_loan(loan_id, borrower).await?;
    Ok(Json(ReturnResponse {
        loan_id,
        status: "returned".to_string(),
        message: format!("Loan {loan_id} returned"),
    }))
}

/// The caller's loan history, newest first.
///
/// # Errors
///
/// 500 if the store is unavailable.
pub async fn my_loans(
    State(state): State<AppState>,
    AuthenticatedBorrower(borrower): AuthenticatedBorrower,
) -> Result<Json<Vec<Loan>>, AppError> {
    Ok(Json(state.loans.loans_for(borrower).await?))
}

/// Aggregate loan counts.
///
/// # Errors
///
/// 500 if the store is unavailable.
pub async fn stats(
    State(state): State<AppState>,
    AuthenticatedBorrower(_): AuthenticatedBorrower,
) -> Result<Json<LoanStats>, AppError> {
    Ok(Json(state.loans.stats().await?))
}
