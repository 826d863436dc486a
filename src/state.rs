use crate::auth::AuthManager;
use crate::config::ClimateConfig;
use crate::services::jobs::AnalyzeJobService;
use axum::extract::FromRef;
use reqwest::Client;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: ClimateConfig,
    pub db: PgPool,
    pub auth: Arc<AuthManager>,
    pub analyze_jobs: Arc<AnalyzeJobService>,
    pub http: Client,
}

impl FromRef<AppState> for Arc<AuthManager> {
    fn from_ref(state: &AppState) -> Arc<AuthManager> {
        state.auth.clone()
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.db.clone()
    }
}
