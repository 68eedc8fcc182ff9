//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors; request-level errors are
//! `captcha::CaptchaError`.

use axum::Router;
use captcha::{CaptchaConfig, CleanupSweeper, PgCaptchaRepository, captcha_router};
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:31113";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,captcha=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Refuses to start in production without a usable secret
    let captcha_config = CaptchaConfig::from_env()?;

    // Database connection
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set in environment"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("../../../database/migrations")
        .run(&pool)
        .await?;

    tracing::info!("Migrations completed");

    let captcha_store = PgCaptchaRepository::new(pool.clone());

    // Startup cleanup: errors here should not prevent server startup
    let startup_sweeper = CleanupSweeper::new(
        Arc::new(captcha_store.clone()),
        captcha_config.sweeper.clone(),
    );
    match startup_sweeper.sweep_now().await {
        Ok(deleted) => {
            tracing::info!(challenges_deleted = deleted, "Captcha cleanup completed");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Captcha cleanup failed, continuing anyway");
        }
    }

    // Build router
    let app = Router::new()
        .nest("/api/auth/captcha", captcha_router(captcha_store, captcha_config))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = env::var("BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
