//! Session token service: HS256 verification and dev minting.
//!
//! DESIGN
//! ======
//! Tokens are compact JWS values signed with the shared `AUTH_SECRET`.
//! The same verifier backs the HTTP `Authorization` header and the realtime
//! handshake, so both boundaries reject the same tokens.
//!
//! Expiry is checked here rather than by `jsonwebtoken` so the comparison is
//! exact (`now > exp` rejects, no leeway) and testable at a fixed clock.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("session token missing")]
    Missing,
    #[error("session token invalid: {0}")]
    Invalid(jsonwebtoken::errors::Error),
    #[error("session token expired at {exp}")]
    Expired { exp: i64 },
    #[error("session token encode failed: {0}")]
    Encode(jsonwebtoken::errors::Error),
}

impl ErrorCode for TokenError {
    fn error_code(&self) -> &'static str {
        "E_UNAUTHORIZED"
    }
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Decoded identity attached to a request or connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

impl From<SessionClaims> for Identity {
    fn from(claims: SessionClaims) -> Self {
        Self { id: claims.sub, name: claims.name, email: claims.email, avatar: claims.picture }
    }
}

// =============================================================================
// KEYS
// =============================================================================

/// Signing and verification keys derived from the shared secret.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenKeys {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token against the current wall clock.
    ///
    /// # Errors
    ///
    /// See [`TokenKeys::verify_at`].
    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        self.verify_at(token, now_secs())
    }

    /// Verify signature and expiry at a fixed `now` (seconds since epoch).
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Missing`] for an empty token,
    /// [`TokenError::Invalid`] for a malformed or mis-signed token, and
    /// [`TokenError::Expired`] when `now > exp`.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Identity, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Missing);
        }

        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(TokenError::Invalid)?;

        if now > data.claims.exp {
            return Err(TokenError::Expired { exp: data.claims.exp });
        }

        Ok(data.claims.into())
    }

    /// Mint a token for `identity` valid for `ttl_secs` from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Encode`] if signing fails.
    pub fn mint(&self, identity: &Identity, ttl_secs: i64, now: i64) -> Result<String, TokenError> {
        let claims = SessionClaims {
            sub: identity.id,
            name: identity.name.clone(),
            email: identity.email.clone(),
            picture: identity.avatar.clone(),
            exp: now.saturating_add(ttl_secs),
            iat: Some(now),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(TokenError::Encode)
    }
}

/// Current time as seconds since Unix epoch.
#[must_use]
pub fn now_secs() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_secs()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[path = "token_test.rs"]
mod tests;
