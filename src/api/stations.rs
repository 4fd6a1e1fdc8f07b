use super::{blocking, json_body, parse_opt, path_id, query, ApiResult, AppState, Session};
use crate::entities::{GasStation, NewStation, StationUpdate};
use crate::envelope::{ApiResponse, Deleted};
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

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StationQuery {
    status: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

/// GET /api/v1/stations?status=&page=&limit=
pub(crate) async fn list_stations(
    State(state): State<AppState>,
    Session(_ctx): Session,
    params: Result<Query<StationQuery>, QueryRejection>,
) -> ApiResult<Vec<GasStation>> {
    let params = query(params)?;
    let status = parse_opt(params.status.as_deref())?;
    let page = PageRequest::new(params.page, params.limit, &state.pages);

    let service = state.service.clone();
    let listing = blocking(move || service.list_stations(status, Some(page.window()))).await?;
    Ok(Json(ApiResponse::paged(listing.items, page.meta(listing.total))))
}

/// POST /api/v1/stations
pub(crate) async fn create_station(
    State(state): State<AppState>,
    Session(ctx): Session,
    payload: Result<Json<NewStation>, JsonRejection>,
) -> crate::error::Result<(StatusCode, Json<ApiResponse<GasStation>>)> {
    let new = json_body(payload)?;
    let service = state.service.clone();
    let station = blocking(move || service.create_station(&ctx, &new)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(station))))
}

/// GET /api/v1/stations/:id
pub(crate) async fn get_station(
    State(state): State<AppState>,
    Session(_ctx): Session,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<GasStation> {
    let id = path_id(id)?;
    let service = state.service.clone();
    let station = blocking(move || service.get_station(id)).await?;
    Ok(Json(ApiResponse::ok(station)))
}

/// PUT /api/v1/stations/:id
pub(crate) async fn update_station(
    State(state): State<AppState>,
    Session(ctx): Session,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<StationUpdate>, JsonRejection>,
) -> ApiResult<GasStation> {
    let id = path_id(id)?;
    let update = json_body(payload)?;
    let service = state.service.clone();
    let station = blocking(move || service.update_station(&ctx, id, &update)).await?;
    Ok(Json(ApiResponse::ok(station)))
}

/// DELETE /api/v1/stations/:id
pub(crate) async fn delete_station(
    State(state): State<AppState>,
    Session(ctx): Session,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Deleted> {
    let id = path_id(id)?;
    let service = state.service.clone();
    blocking(move || service.delete_station(&ctx, id)).await?;
    Ok(Json(ApiResponse::ok(Deleted { deleted: true })))
}
