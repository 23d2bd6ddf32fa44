//! Bearer token authentication.
//!
//! Tokens are HS256 JWTs whose `uid` claim is the user id. The WebSocket
//! upgrade accepts the token in the `token` query parameter (browsers cannot
//! set headers on an upgrade) or an `Authorization: Bearer` header; the REST
//! routes take the header.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{AuthError, Authenticator, UserId};
use tracing::debug;

use crate::handlers::AppState;

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub uid: UserId,
    pub exp: u64,
}

/// Validates HS256 access tokens.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims.uid)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Mint a token for `user_id` valid for `ttl`. Used by tooling and tests;
/// production tokens come from the identity service.
///
/// # Errors
///
/// Returns an error if the token cannot be signed.
pub fn issue_token(
    secret: &str,
    user_id: UserId,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = chrono::Utc::now().timestamp().max(0).unsigned_abs() + ttl.as_secs();
    encode(
        &Header::new(Algorithm::HS256),
        &Claims { uid: user_id, exp },
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// The bearer token in an `Authorization` header, if any.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// An authenticated REST caller.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).unwrap_or_default();
        match state.authenticator.authenticate(token) {
            Ok(user_id) => Ok(AuthUser(user_id)),
            Err(e) => {
                debug!(error = %e, "Rejected REST request");
                Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
            }
        }
    }
}
