//! HTTP API (axum)
//!
//! Routes live under `/api/v1` and answer with the `{success, data?, error?}`
//! envelope; `/health` sits at the root and, like `/auth/login`, needs no
//! token. Handlers are thin: they parse the request, hand it to [`Service`]
//! on the blocking pool and wrap the result.

mod admin;
mod auth;
mod health;
mod pumps;
mod stations;
mod verifications;

pub use auth::Session;

use crate::envelope::{ApiResponse, ErrorBody};
use crate::error::{Error, Result};
use crate::pagination::{self, PageSettings};
use crate::service::Service;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Service,
    pub pages: PageSettings,
}

impl AppState {
    pub fn new(service: Service, pages: PageSettings) -> Self {
        AppState { service, pages }
    }
}

/// Build the full router: `/health` plus everything under `/api/v1`
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route(
            "/stations",
            get(stations::list_stations).post(stations::create_station),
        )
        .route(
            "/stations/:id",
            get(stations::get_station)
                .put(stations::update_station)
                .delete(stations::delete_station),
        )
        .route(
            "/stations/:id/pumps",
            get(pumps::list_station_pumps).post(pumps::create_pump),
        )
        .route("/pumps", get(pumps::list_pumps))
        .route(
            "/pumps/:id",
            get(pumps::get_pump)
                .put(pumps::update_pump)
                .delete(pumps::delete_pump),
        )
        .route("/pumps/:id/verify", post(verifications::verify_pump))
        .route(
            "/pumps/:id/verifications",
            get(verifications::pump_history),
        )
        .route(
            "/admin/verifications/all",
            get(verifications::all_verifications),
        )
        .route("/admin/audit-logs", get(admin::audit_logs))
        .route("/admin/analytics", get(admin::analytics))
        .route("/admin/stations/:id/logs", get(admin::station_activity))
        .route("/admin/users", get(admin::list_users).post(admin::create_user));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// ERROR -> RESPONSE
// ============================================================================

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidTag(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) | Error::InvalidState(_) => StatusCode::CONFLICT,
        Error::Network(_) | Error::Remote { .. } => StatusCode::BAD_GATEWAY,
        Error::Database(_)
        | Error::Serialization(_)
        | Error::Csv(_)
        | Error::Io(_)
        | Error::Config(_)
        | Error::Toml(_)
        | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }

        let body = ApiResponse::<()>::err(ErrorBody::from(&self));
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// HANDLER HELPERS
// ============================================================================

pub(crate) type ApiResult<T> = Result<Json<ApiResponse<T>>>;

/// Run blocking service work off the async executor
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("worker task failed: {}", e)))?
}

pub(crate) fn path_id(path: std::result::Result<Path<i64>, PathRejection>) -> Result<i64> {
    let Path(id) = path.map_err(|e| Error::Validation(e.body_text()))?;
    Ok(id)
}

pub(crate) fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    let Json(body) = payload.map_err(|e| Error::Validation(e.body_text()))?;
    Ok(body)
}

pub(crate) fn query<T>(params: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    let Query(params) = params.map_err(|e| Error::Validation(e.body_text()))?;
    Ok(params)
}

/// Parse an optional enum-valued query parameter
pub(crate) fn parse_opt<T>(raw: Option<&str>) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = Error>,
{
    raw.filter(|s| !s.is_empty()).map(str::parse).transpose()
}

/// `startDate` / `endDate` into a `[from, until)` range
pub(crate) fn date_range(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let from = start
        .filter(|s| !s.is_empty())
        .map(pagination::parse_start)
        .transpose()?;
    let until = end
        .filter(|s| !s.is_empty())
        .map(pagination::parse_end)
        .transpose()?;
    Ok((from, until))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::InvalidTag("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::Unauthorized("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&Error::Forbidden("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&Error::InvalidState("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&Error::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_date_range() {
        let (from, until) = date_range(Some("2025-01-01"), Some("2025-01-31")).unwrap();
        assert!(from.unwrap() < until.unwrap());
        assert_eq!(date_range(None, Some("")).unwrap(), (None, None));
        assert!(date_range(Some("soon"), None).is_err());
    }
}
