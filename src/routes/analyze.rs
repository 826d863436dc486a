use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{map_db_error, validation_error};
use crate::services::jobs::{
    AnalyzeCreateResponse, AnalyzeDetail, AnalyzeHistoryResponse, AnalyzeRequest, SubmitError,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

#[utoipa::path(
    post,
    path = "/api/analyze",
    tag = "analyze",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Analysis accepted; poll the id for the result", body = AnalyzeCreateResponse),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid request; no job was created")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn submit(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeCreateResponse>, (StatusCode, String)> {
    let request_id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let analysis_id = state
        .analyze_jobs
        .submit(request, user.id, request_id)
        .await
        .map_err(|err| match err {
            SubmitError::Validation(err) => validation_error(err),
            SubmitError::Store(err) => map_db_error(err),
        })?;

    Ok(Json(AnalyzeCreateResponse {
        analysis_id,
        status: "ok".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/analyze/history",
    tag = "analyze",
    params(
        ("page" = Option<u32>, Query, description = "1-based page"),
        ("page_size" = Option<u32>, Query, description = "Page size (1-100)")
    ),
    responses(
        (status = 200, description = "Newest-first analysis history", body = AnalyzeHistoryResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<AnalyzeHistoryResponse>, (StatusCode, String)> {
    let page = query.page.max(1);
    let page_size = query
        .page_size
        .clamp(1, crate::services::jobs::MAX_PAGE_SIZE);

    let (items, total) = state
        .analyze_jobs
        .history(user.id, page, page_size)
        .await
        .map_err(map_db_error)?;

    Ok(Json(AnalyzeHistoryResponse {
        page,
        page_size,
        total,
        items: items.iter().map(|row| row.to_history_item()).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/analyze/{id}",
    tag = "analyze",
    params(("id" = String, Path, description = "Analysis id (uuid)")),
    responses(
        (status = 200, description = "Analysis status and, once terminal, its result", body = AnalyzeDetail),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown id (or not owned by the caller)")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn get_analysis(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<AnalyzeDetail>, (StatusCode, String)> {
    let analysis_id = Uuid::parse_str(&id)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid analysis id".to_string()))?;

    let job = state
        .analyze_jobs
        .get_for_owner(analysis_id, user.id)
        .await
        .map_err(map_db_error)?
        .ok_or((StatusCode::NOT_FOUND, "Analysis not found".to_string()))?;

    Ok(Json(job.to_detail()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analyze", post(submit))
        .route("/analyze/history", get(history))
        .route("/analyze/{id}", get(get_analysis))
}
