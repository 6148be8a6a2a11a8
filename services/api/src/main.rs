//! withme.travel membership API
//!
//! Serves trips, groups and their memberships, the access request workflow
//! and guest sessions over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use withme_api::{
    api,
    config::{self, RateLimitBackend, StoreBackend},
    db::{Database, MemoryStore, Store},
    rate_limit::{FixedWindowLimiter, PgRateLimiter, RateLimiter, GUEST_CREATE_SCOPE},
    state::{AppState, Settings},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to WITHME_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting withme membership API");
    info!(
        listen_addr = %config.listen_addr,
        store = ?config.store,
        rate_limit_backend = ?config.rate_limit_backend,
        "Configuration loaded"
    );

    let db = match config.store {
        StoreBackend::Postgres => {
            let db = match Database::connect(&config.database).await {
                Ok(db) => db,
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            // Run migrations in dev mode
            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = db.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }
            Some(db)
        }
        StoreBackend::Memory => {
            info!("Using in-memory store; data is lost on restart");
            None
        }
    };

    let store: Arc<dyn Store> = match &db {
        Some(db) => Arc::new(db.store()),
        None => Arc::new(MemoryStore::new()),
    };

    let guest_limiter: Arc<dyn RateLimiter> = match (config.rate_limit_backend, &db) {
        (RateLimitBackend::Postgres, Some(db)) => Arc::new(PgRateLimiter::new(
            db.pool().clone(),
            GUEST_CREATE_SCOPE,
            config.guest_create_limit,
            config.guest_create_window,
        )),
        _ => Arc::new(FixedWindowLimiter::new(
            config.guest_create_limit,
            config.guest_create_window,
        )),
    };

    let state = AppState::new(
        store,
        guest_limiter,
        Settings {
            cookie_secure: config.cookie_secure,
            trust_proxy_headers: config.trust_proxy_headers,
        },
    );

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");
    })
    .await?;

    info!("Membership API shutdown complete");
    Ok(())
}
