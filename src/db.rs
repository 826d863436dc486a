use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub fn connect_lazy(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(8))
        .connect_lazy(database_url)
        .with_context(|| format!("Failed to create lazy database pool for {database_url}"))
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'user',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_login TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS analyze_results (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id),
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        duration_ms BIGINT,
        params_json JSONB NOT NULL,
        result_json JSONB,
        result_hash TEXT,
        model_version TEXT NOT NULL,
        dataset_version TEXT NOT NULL,
        request_id TEXT,
        response_status INTEGER
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_analyze_results_user_created
    ON analyze_results (user_id, created_at DESC)
    "#,
];

/// Idempotent startup bootstrap so a fresh database serves requests without a
/// separate migration step.
pub async fn ensure_schema(db: &PgPool) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(db)
            .await
            .context("failed to apply schema statement")?;
    }
    Ok(())
}
