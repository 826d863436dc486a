pub mod analyze;
pub mod auth;
pub mod health;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(analyze::router())
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}

#[cfg(test)]
mod auth_gaps_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{get, post};
    use std::sync::OnceLock;
    use tower::ServiceExt;

    static STATE: OnceLock<AppState> = OnceLock::new();

    fn state() -> AppState {
        STATE.get_or_init(crate::test_support::test_state).clone()
    }

    #[tokio::test]
    async fn analyze_submit_requires_bearer_auth() {
        let app = Router::new()
            .route("/api/analyze", post(analyze::submit))
            .with_state(state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/analyze")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn analyze_detail_requires_bearer_auth() {
        let app = Router::new()
            .route("/api/analyze/{id}", get(analyze::get_analysis))
            .with_state(state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/analyze/3f7b0dbe-0000-0000-0000-000000000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn analyze_history_requires_bearer_auth() {
        let app = Router::new()
            .route("/api/analyze/history", get(analyze::history))
            .with_state(state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/analyze/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn healthz_is_open() {
        let app = router(state());
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }
}
