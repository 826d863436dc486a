use anyhow::{Context, Result};
use clap::Parser;
use climate_server_rs::{auth, cli, config, db, openapi, routes, services, state};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind climate-server-rs listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind climate-server-rs listener on {addr}"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    if args.print_openapi {
        println!("{}", serde_json::to_string_pretty(&openapi::openapi_json())?);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::ClimateConfig::from_env()?;
    let pool = db::connect_lazy(&config.database_url)?;
    if let Err(err) = db::ensure_schema(&pool).await {
        tracing::warn!("failed to ensure database schema: {err:#}");
    }

    let auth = Arc::new(auth::AuthManager::new(config.session_ttl_hours));
    let http = reqwest::Client::new();
    let power = Arc::new(services::power::PowerClient::new(
        http.clone(),
        config.power_base_url.clone(),
        config.power_community.clone(),
        config.power_timeout(),
        config.retry_policy(),
    ));
    let store = Arc::new(services::jobs::PgResultStore::new(pool.clone()));
    let analyze_jobs = Arc::new(services::jobs::AnalyzeJobService::new(store, power));

    let state = state::AppState {
        config,
        db: pool,
        auth,
        analyze_jobs,
        http,
    };

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(60)
            .methods(vec![axum::http::Method::POST])
            .use_headers()
            .finish()
            .context("failed to build rate limiter config")?,
    );
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
        governor_limiter.retain_recent();
    });

    let app = routes::router(state)
        .layer(GovernorLayer::new(governor_conf))
        .layer(CorsLayer::permissive());
    let addr = format!("{}:{}", args.host, args.port);
    let listener = bind_listener(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
