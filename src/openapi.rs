use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "climate-server-rs",
        description = "Historical weather unusualness analysis API"
    ),
    paths(
        crate::routes::health::healthz_handler,
        crate::routes::auth::register,
        crate::routes::auth::login,
        crate::routes::auth::me,
        crate::routes::analyze::submit,
        crate::routes::analyze::history,
        crate::routes::analyze::get_analysis,
    ),
    components(schemas(
        crate::routes::health::HealthResponse,
        crate::factors::Factor,
        crate::services::jobs::AnalyzeStatus,
        crate::services::jobs::AnalyzeRequest,
        crate::services::jobs::AnalyzeCreateResponse,
        crate::services::jobs::AnalyzeDetail,
        crate::services::jobs::AnalyzeHistoryItem,
        crate::services::jobs::AnalyzeHistoryResponse,
    )),
    tags(
        (name = "analyze", description = "Asynchronous historical weather analysis jobs"),
        (name = "auth", description = "Session tokens")
    )
)]
struct ApiDoc;

pub fn openapi_json() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(serve_openapi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_the_analyze_paths() {
        let doc = serde_json::to_value(openapi_json()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/api/analyze"));
        assert!(paths.contains_key("/api/analyze/history"));
        assert!(paths.contains_key("/api/analyze/{id}"));
        assert!(paths.contains_key("/healthz"));
    }
}
