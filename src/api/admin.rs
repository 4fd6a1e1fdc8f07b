use super::{
    blocking, date_range, json_body, parse_opt, path_id, query, ApiResult, AppState, Session,
};
use crate::analytics::{DashboardStats, StationActivity};
use crate::audit::{AuditFilter, AuditLogEntry};
use crate::entities::{IssuedUser, NewUser, User};
use crate::envelope::ApiResponse;
use crate::pagination::PageRequest;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;

/// Entries shown per station on the activity page
const STATION_ACTIVITY_LIMIT: i64 = 50;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuditQuery {
    action: Option<String>,
    entity_type: Option<String>,
    entity_id: Option<i64>,
    user_id: Option<i64>,
    start_date: Option<String>,
    end_date: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

/// GET /api/v1/admin/audit-logs?action=&entityType=&userId=&startDate=&endDate=&page=&limit=
pub(crate) async fn audit_logs(
    State(state): State<AppState>,
    Session(ctx): Session,
    params: Result<Query<AuditQuery>, QueryRejection>,
) -> ApiResult<Vec<AuditLogEntry>> {
    let params = query(params)?;
    let (from, until) = date_range(params.start_date.as_deref(), params.end_date.as_deref())?;
    let filter = AuditFilter {
        action: parse_opt(params.action.as_deref())?,
        entity_type: parse_opt(params.entity_type.as_deref())?,
        entity_id: params.entity_id,
        user_id: params.user_id,
        from,
        until,
    };
    let page = PageRequest::new(params.page, params.limit, &state.pages);

    let service = state.service.clone();
    let listing = blocking(move || service.audit_logs(&ctx, &filter, Some(page.window()))).await?;
    Ok(Json(ApiResponse::paged(listing.items, page.meta(listing.total))))
}

/// GET /api/v1/admin/analytics
pub(crate) async fn analytics(
    State(state): State<AppState>,
    Session(ctx): Session,
) -> ApiResult<DashboardStats> {
    let service = state.service.clone();
    let stats = blocking(move || service.analytics(&ctx)).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// GET /api/v1/admin/stations/:id/logs
pub(crate) async fn station_activity(
    State(state): State<AppState>,
    Session(ctx): Session,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<StationActivity> {
    let station_id = path_id(id)?;
    let service = state.service.clone();
    let activity = blocking(move || {
        service.station_activity(&ctx, station_id, STATION_ACTIVITY_LIMIT)
    })
    .await?;
    Ok(Json(ApiResponse::ok(activity)))
}

/// GET /api/v1/admin/users
pub(crate) async fn list_users(
    State(state): State<AppState>,
    Session(ctx): Session,
) -> ApiResult<Vec<User>> {
    let service = state.service.clone();
    let users = blocking(move || service.list_users(&ctx)).await?;
    Ok(Json(ApiResponse::ok(users)))
}

/// POST /api/v1/admin/users; the token in the response is never shown again
pub(crate) async fn create_user(
    State(state): State<AppState>,
    Session(ctx): Session,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> crate::error::Result<(StatusCode, Json<ApiResponse<IssuedUser>>)> {
    let new = json_body(payload)?;
    let service = state.service.clone();
    let issued = blocking(move || service.create_user(&ctx, &new)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(issued))))
}
