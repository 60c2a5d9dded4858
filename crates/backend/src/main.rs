use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod cleanup;
mod config;
mod db;
mod extract;
pub mod error;
mod handlers;
mod mailer;
mod models;
mod routes;
mod schema;
mod services;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::mailer::Mailer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
    /// Outbound client for OAuth providers
    pub http: reqwest::Client,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("Starting Teamboard backend server");
    tracing::debug!("Auth configuration: {:?}", config.auth);

    // Establish database connection pool
    let pool = db::establish_connection_pool(&config.database_url, config.database_tls)?;
    tracing::info!(
        "Database connection pool initialized (tls: {})",
        config.database_tls
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("Failed to build HTTP client")?;
    let mailer = mailer::from_config(&config.mail, http.clone());

    // Start session/token cleanup background task
    let cleanup_pool = pool.clone();
    tokio::spawn(async move {
        cleanup::start_cleanup_task(cleanup_pool).await;
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let state = AppState {
        pool,
        config: Arc::new(config),
        mailer,
        http,
    };
    let app = routes::build_router(state);

    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
