//! Token verification and authentication extractors.
//!
//! Tokens are issued elsewhere; this service only verifies them. A valid token
//! is an HS256 JWT whose `user_id` claim names the borrower.
//!
//! - [`BearerToken`]: raw token from `Authorization: Bearer <token>`
//! - [`AuthenticatedBorrower`]: verified borrower id, rejects with 401

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use lending_core::types::BorrowerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;
use crate::state::AppState;

/// Why a token was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Signature, expiry or structure check failed
    #[error("invalid token: {0}")]
    Invalid(String),

    /// The token verified but names no usable borrower
    #[error("token carries no valid user_id")]
    MissingBorrower,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Borrower the token was issued to
    pub user_id: i64,
    /// Expiry, seconds since the Unix epoch
    pub exp: u64,
}

/// Turns a bearer token into a borrower id.
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return the borrower it was issued to.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the token is not valid.
    fn verify(&self, token: &str) -> Result<BorrowerId, TokenError>;
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Verify tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<BorrowerId, TokenError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        let borrower = BorrowerId::new(data.claims.user_id);
        if borrower.is_valid() {
            Ok(borrower)
        } else {
            Err(TokenError::MissingBorrower)
        }
    }
}

/// Bearer token extracted from `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl BearerToken {
    /// Read the bearer token from request headers, if present and well formed.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Self(token.to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers).ok_or_else(|| {
            AppError::unauthorized("Missing or malformed authorization header. Expected 'Bearer <token>'")
        })
    }
}

/// The borrower named by a verified bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedBorrower(pub BorrowerId);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedBorrower {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let bearer = BearerToken::from_request_parts(parts, state).await?;
        authenticate(state, &bearer.0).map(Self)
    }
}

/// Verify `token` against the state's verifier, mapping failures to 401.
pub(crate) fn authenticate(state: &AppState, token: &str) -> Result<BorrowerId, AppError> {
    state.verifier.verify(token).map_err(|e| {
        tracing::debug!(error = %e, "Token rejected");
        AppError::unauthorized("Invalid or expired token")
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &[u8] = b"test-secret";

    fn token(user_id: i64, exp: u64, secret: &[u8]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &Claims { user_id, exp },
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn far_future() -> u64 {
        4_102_444_800 // 2100-01-01
    }

    #[test]
    fn accepts_signed_token() {
        let verifier = JwtVerifier::new(SECRET);
        assert_eq!(
            verifier.verify(&token(7, far_future(), SECRET)).unwrap(),
            BorrowerId::new(7)
        );
    }

    #[test]
    fn rejects_wrong_signature() {
        let verifier = JwtVerifier::new(SECRET);
        let err = verifier.verify(&token(7, far_future(), b"other")).unwrap_err();
        assert!(matches!(err, TokenError::Invalid(_)));
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(verifier.verify(&token(7, 1_000, SECRET)).is_err());
    }

    #[test]
    fn rejects_non_positive_user_id() {
        let verifier = JwtVerifier::new(SECRET);
        assert_eq!(
            verifier.verify(&token(0, far_future(), SECRET)).unwrap_err(),
            TokenError::MissingBorrower
        );
    }

    #[test]
    fn rejects_garbage() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(verifier.verify("not-a-jwt").is_err());
    }
}
