use super::{
    blocking, date_range, json_body, path_id, query, ApiResult, AppState, Session,
};
use crate::envelope::ApiResponse;
use crate::error::{Error, Result};
use crate::pagination::PageRequest;
use crate::reconciliation::Verdict;
use crate::verification::{VerificationFilter, VerificationRequest, VerificationSession};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryQuery {
    result: Option<String>,
    station_id: Option<i64>,
    start_date: Option<String>,
    end_date: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

impl HistoryQuery {
    fn filter(&self) -> Result<VerificationFilter> {
        let result = self
            .result
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|raw| {
                Verdict::parse(raw).ok_or_else(|| {
                    Error::Validation(format!("result must be 'success' or 'failed', got '{}'", raw))
                })
            })
            .transpose()?;
        let (from, until) = date_range(self.start_date.as_deref(), self.end_date.as_deref())?;

        Ok(VerificationFilter {
            pump_id: None,
            station_id: self.station_id,
            result,
            from,
            until,
        })
    }
}

/// POST /api/v1/pumps/:id/verify
pub(crate) async fn verify_pump(
    State(state): State<AppState>,
    Session(ctx): Session,
    id: std::result::Result<Path<i64>, PathRejection>,
    payload: std::result::Result<Json<VerificationRequest>, JsonRejection>,
) -> ApiResult<VerificationSession> {
    let pump_id = path_id(id)?;
    let request = json_body(payload)?;
    let service = state.service.clone();
    let session = blocking(move || service.verify(&ctx, pump_id, &request)).await?;
    Ok(Json(ApiResponse::ok(session)))
}

/// GET /api/v1/pumps/:id/verifications?result=&page=&limit=&startDate=&endDate=
pub(crate) async fn pump_history(
    State(state): State<AppState>,
    Session(_ctx): Session,
    id: std::result::Result<Path<i64>, PathRejection>,
    params: std::result::Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Vec<VerificationSession>> {
    let pump_id = path_id(id)?;
    let params = query(params)?;
    let filter = params.filter()?;
    let page = PageRequest::new(params.page, params.limit, &state.pages);

    let service = state.service.clone();
    let listing =
        blocking(move || service.pump_history(pump_id, filter, Some(page.window()))).await?;
    Ok(Json(ApiResponse::paged(listing.items, page.meta(listing.total))))
}

/// GET /api/v1/admin/verifications/all?result=&stationId=&startDate=&endDate=&page=&limit=
pub(crate) async fn all_verifications(
    State(state): State<AppState>,
    Session(ctx): Session,
    params: std::result::Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Vec<VerificationSession>> {
    let params = query(params)?;
    let filter = params.filter()?;
    let page = PageRequest::new(params.page, params.limit, &state.pages);

    let service = state.service.clone();
    let listing =
        blocking(move || service.all_verifications(&ctx, &filter, Some(page.window()))).await?;
    Ok(Json(ApiResponse::paged(listing.items, page.meta(listing.total))))
}
