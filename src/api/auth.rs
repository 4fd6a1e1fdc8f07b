// Bearer-token session extractor + login/logout
//
// Every `/api/v1` handler except login takes a `Session`. The token's SHA-256
// hash is looked up in `auth_tokens`; the client IP comes from X-Forwarded-For
// (first hop) or X-Real-IP and ends up in audit entries.

use super::{blocking, json_body, ApiResult, AppState};
use crate::context::SessionContext;
use crate::entities::{LoginRequest, LoginResponse, User};
use crate::envelope::{ApiResponse, LoggedOut};
use crate::error::{Error, Result};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap},
    Json,
};

/// Authenticated caller of one request
#[derive(Debug, Clone)]
pub struct Session(pub SessionContext);

#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = bearer_token(&parts.headers)?;
        let ip = client_ip(&parts.headers);

        let service = state.service.clone();
        let ctx = blocking(move || service.authenticate(&token, ip)).await?;
        Ok(Session(ctx))
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<String> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| Error::Unauthorized("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| Error::Unauthorized("malformed Authorization header".to_string()))?;

    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Error::Unauthorized("expected 'Bearer <token>'".to_string()))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded.or_else(real_ip).map(str::to_string)
}

/// GET /api/v1/auth/me
pub(crate) async fn me(Session(ctx): Session) -> ApiResult<User> {
    Ok(Json(ApiResponse::ok(ctx.user)))
}

/// POST /api/v1/auth/login
pub(crate) async fn login(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let request = json_body(payload)?;
    let service = state.service.clone();
    let response = blocking(move || service.login(&request.username, &request.password)).await?;
    Ok(Json(ApiResponse::ok(response)))
}

/// POST /api/v1/auth/logout; revokes the presented token
pub(crate) async fn logout(
    State(state): State<AppState>,
    Session(ctx): Session,
    headers: HeaderMap,
) -> ApiResult<LoggedOut> {
    let token = bearer_token(&headers)?;
    let service = state.service.clone();
    blocking(move || service.logout(&ctx, &token)).await?;
    Ok(Json(ApiResponse::ok(LoggedOut { logged_out: true })))
}
