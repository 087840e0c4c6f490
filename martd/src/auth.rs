//! Session tokens and password hashing.
//!
//! Tokens are JWTs signed with an HMAC secret from configuration. Passwords
//! are hashed with Argon2id in PHC string format. Handlers accept the token
//! either as an `Authorization: Bearer` header or a `token` cookie.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::api::AppState;

// =============================================================================
// Errors
// =============================================================================

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token encoding failed
    #[error("Failed to encode token: {0}")]
    Encoding(String),

    /// Token is expired or malformed
    #[error("Invalid token")]
    InvalidToken,

    /// Password hashing failed
    #[error("Failed to hash password: {0}")]
    Hash(String),

    /// Stored hash is not a valid PHC string
    #[error("Invalid password hash format")]
    InvalidHash,
}

// =============================================================================
// Token keys
// =============================================================================

/// Token claims.
///
/// `sub` carries the user id; `exp` is seconds since the Unix epoch.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
}

/// Signing and verification keys for session tokens.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenKeys {
    /// Create keys from an HMAC secret.
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Issue a token for the given user id.
    pub fn issue(&self, user_id: i64) -> Result<String, AuthError> {
        let exp = chrono::Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or_default();
        let claims = Claims {
            sub: user_id,
            exp: exp.timestamp() as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Encoding(e.to_string()))
    }

    /// Verify a token and return the user id it was issued for.
    pub fn verify(&self, token: &str) -> Result<i64, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims.sub)
            .map_err(|_| AuthError::InvalidToken)
    }
}

// =============================================================================
// Password hashing
// =============================================================================

/// Hash a password with Argon2id.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
    use argon2::Argon2;

    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// Verify a password against a stored PHC-format hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    use argon2::password_hash::PasswordVerifier;
    use argon2::{Argon2, PasswordHash};

    let parsed = PasswordHash::new(hash).map_err(|_| AuthError::InvalidHash)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::Hash(e.to_string())),
    }
}

// =============================================================================
// Request authentication
// =============================================================================

/// Authenticated user id, inserted into request extensions by [`require_auth`].
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub i64);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .copied()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Middleware guarding the `/api/user/*` routes.
///
/// Looks for a bearer token in the `Authorization` header, then for a `token`
/// cookie. Requests without a valid token get 401.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_token(&request).ok_or(StatusCode::UNAUTHORIZED)?;

    let user_id = state
        .tokens
        .verify(&token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(CurrentUser(user_id));
    Ok(next.run(request).await)
}

fn extract_token(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(header::AUTHORIZATION) {
        let value = value.to_str().ok()?;
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    let cookies = request.headers().get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let pair = pair.trim();
        if let Some(token) = pair.strip_prefix("token=") {
            return Some(token.to_string());
        }
    }

    None
}

// =============================================================================
// Tests
// =============================================================================
