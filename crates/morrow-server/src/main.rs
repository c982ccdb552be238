mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use morrow_api::Resolver;
use morrow_db::{Database, SystemClock};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "morrow=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    config.validate()?;
    if config.is_development() {
        info!("Running in development mode");
    }

    // Init database
    let db = Arc::new(Database::open(&config.db_path, Arc::new(SystemClock))?);
    db.migrate()?;
    db.health_check()?;

    let resolver = Arc::new(Resolver::new(db.clone(), Some(config.request_timeout)));

    let app = morrow_api::http::router(resolver)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Morrow server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(db) {
        Ok(db) => db.close()?,
        Err(_) => warn!("Database still in use at shutdown, leaving it to drop"),
    }
    info!("Morrow server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
