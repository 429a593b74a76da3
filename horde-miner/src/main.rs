//! Horde Miner
//!
//! Accepts jobs from validators, supervises the executors that run them and
//! keeps every job's lifecycle in PostgreSQL.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

use crate::api::AppState;
use crate::config::Config;
use crate::repository::{PgJobRepository, PgValidatorRepository};
use crate::service::{JobTracker, SessionRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "horde_miner=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Horde Miner...");

    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let tracker = JobTracker::new(
        Arc::new(PgJobRepository::new(pool.clone())),
        Arc::new(PgValidatorRepository::new(pool)),
    );

    // Build router with all API endpoints
    let app = api::create_router(AppState {
        tracker: Arc::new(tracker),
        sessions: SessionRegistry::new(),
        payload_poll_interval: config.payload_poll_interval,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Failed to start server")?;

    Ok(())
}
