use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use gateway_credentials::config::{self, AdminToken, KeyMaterial, StorageBackend};
use gateway_credentials::services::spawn_usage_pruner;
use gateway_credentials::{app, AppServices};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    // Fail fast if key material is missing or malformed
    let material = KeyMaterial::from_env().context("loading key material")?;
    let admin_token = AdminToken::from_env().context("loading admin token")?;
    tracing::info!(
        active_version = material.ring.active_version(),
        retired_versions = ?material.ring.retired_versions(),
        "master key ring loaded"
    );

    let backend = StorageBackend::from_env()?;
    let services = match backend {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; state is lost on restart");
            AppServices::in_memory(&material, admin_token)
        }
        StorageBackend::Postgres => {
            let db_url = config::DATABASE_URL
                .clone()
                .context("DATABASE_URL must be set for the postgres backend")?;
            let pool = PgPoolOptions::new()
                .max_connections(*config::DATABASE_MAX_CONNECTIONS)
                .connect(&db_url)
                .await?;

            if let Err(error) = sqlx::migrate!().run(&pool).await {
                if *config::ALLOW_MIGRATION_FAILURE {
                    tracing::warn!(
                        ?error,
                        "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
                    );
                } else {
                    return Err(error.into());
                }
            }
            AppServices::postgres(pool, &material, admin_token)
        }
    };
    tracing::info!(backend = backend.as_str(), "storage backend ready");
    let services = Arc::new(services);
    spawn_usage_pruner(services.clone());

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let router = Router::new()
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(app(services))
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .context("invalid bind address")?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
