//! Auth routes: bearer extraction and the dev token issuer.

use axum::extract::{FromRef, State};
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use events::CONNECTION_ID_HEADER;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::services::token::{Identity, TokenError, now_secs};
use crate::state::AppState;

/// `Authorization: Bearer <token>`, scheme matched case-insensitively.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// Connection to skip when relaying the caller's own mutation.
pub(crate) fn origin_connection(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(CONNECTION_ID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub(crate) fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": "unauthorized" }))).into_response()
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated caller extracted from the bearer token.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub identity: Identity,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(&parts.headers).ok_or(TokenError::Missing);
        match token.and_then(|token| app_state.tokens.verify(token)) {
            Ok(identity) => Ok(Self { identity }),
            Err(e) => {
                warn!(error = %e, code = e.error_code(), path = %parts.uri.path(), "auth: rejected");
                Err(unauthorized())
            }
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct DevTokenRequest {
    pub sub: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub picture: Option<String>,
}

/// `POST /api/dev/token`: mint a session token without a login flow.
///
/// Enabled only when `DEV_TOKEN_ISSUER=true`.
pub async fn dev_token(State(state): State<AppState>, body: Result<Json<DevTokenRequest>, JsonRejection>) -> Response {
    if !state.settings.dev_token_issuer {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Ok(Json(body)) = body else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "invalid token request" }))).into_response();
    };

    let identity = Identity { id: body.sub, name: body.name, email: body.email, avatar: body.picture };
    match state
        .tokens
        .mint(&identity, state.settings.token_ttl_secs, now_secs())
    {
        Ok(token) => {
            info!(user_id = %identity.id, "auth: dev token minted");
            Json(serde_json::json!({ "sessionToken": token })).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "auth: dev token mint failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "internal server error" })))
                .into_response()
        }
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
