use super::{blocking, json_body, parse_opt, path_id, query, ApiResult, AppState, Session};
use crate::entities::{NewPump, Pump, PumpUpdate};
use crate::envelope::{ApiResponse, Deleted};
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
pub(crate) struct PumpQuery {
    status: Option<String>,
}

/// GET /api/v1/pumps?status=
pub(crate) async fn list_pumps(
    State(state): State<AppState>,
    Session(_ctx): Session,
    params: Result<Query<PumpQuery>, QueryRejection>,
) -> ApiResult<Vec<Pump>> {
    let params = query(params)?;
    let status = parse_opt(params.status.as_deref())?;
    let service = state.service.clone();
    let pumps = blocking(move || service.list_pumps(status)).await?;
    Ok(Json(ApiResponse::ok(pumps)))
}

/// GET /api/v1/stations/:id/pumps
pub(crate) async fn list_station_pumps(
    State(state): State<AppState>,
    Session(_ctx): Session,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Vec<Pump>> {
    let station_id = path_id(id)?;
    let service = state.service.clone();
    let pumps = blocking(move || service.list_station_pumps(station_id)).await?;
    Ok(Json(ApiResponse::ok(pumps)))
}

/// POST /api/v1/stations/:id/pumps
pub(crate) async fn create_pump(
    State(state): State<AppState>,
    Session(ctx): Session,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<NewPump>, JsonRejection>,
) -> crate::error::Result<(StatusCode, Json<ApiResponse<Pump>>)> {
    let station_id = path_id(id)?;
    let new = json_body(payload)?;
    let service = state.service.clone();
    let pump = blocking(move || service.create_pump(&ctx, station_id, &new)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(pump))))
}

/// GET /api/v1/pumps/:id
pub(crate) async fn get_pump(
    State(state): State<AppState>,
    Session(_ctx): Session,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Pump> {
    let id = path_id(id)?;
    let service = state.service.clone();
    let pump = blocking(move || service.get_pump(id)).await?;
    Ok(Json(ApiResponse::ok(pump)))
}

/// PUT /api/v1/pumps/:id
pub(crate) async fn update_pump(
    State(state): State<AppState>,
    Session(ctx): Session,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<PumpUpdate>, JsonRejection>,
) -> ApiResult<Pump> {
    let id = path_id(id)?;
    let update = json_body(payload)?;
    let service = state.service.clone();
    let pump = blocking(move || service.update_pump(&ctx, id, &update)).await?;
    Ok(Json(ApiResponse::ok(pump)))
}

/// DELETE /api/v1/pumps/:id
pub(crate) async fn delete_pump(
    State(state): State<AppState>,
    Session(ctx): Session,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Deleted> {
    let id = path_id(id)?;
    let service = state.service.clone();
    blocking(move || service.delete_pump(&ctx, id)).await?;
    Ok(Json(ApiResponse::ok(Deleted { deleted: true })))
}
