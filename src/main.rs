//! Blog backend server
//! Mission: Serve account, session, and admin endpoints behind rate limits

use anyhow::{Context, Result};
use blog_backend::{
    auth::{AuthState, JwtHandler, SqliteRevocationStore, UserStore},
    config::{self, Config},
    maintenance,
    middleware::{InMemoryCounterStore, Limiters},
    routes::build_router,
    storage::Database,
};
use clap::Parser;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    config::load_env();
    init_tracing();

    let config = Config::parse();
    config.validate().context("invalid configuration")?;

    info!("🚀 Blog backend starting");

    let jwt_handler = JwtHandler::with_lifetime(config.signing_secret()?, config.token_lifetime()?)
        .context("failed to initialise token issuer")?;

    let db = Database::open(&config.db_path, config.store_timeout())
        .with_context(|| format!("failed to open database at {}", config.db_path))?;
    info!(path = %config.db_path, "📦 Database ready");

    let user_store = Arc::new(
        UserStore::with_hash_cost(db.clone(), config.bcrypt_cost)
            .context("failed to initialise user store")?,
    );
    let revocations = Arc::new(
        SqliteRevocationStore::new(db).context("failed to initialise revocation registry")?,
    );
    let counters = Arc::new(InMemoryCounterStore::new());

    let auth_state = AuthState::new(user_store, Arc::new(jwt_handler), revocations.clone());
    let limiters = Limiters::new(counters.clone());

    maintenance::spawn_sweeper(revocations, counters, config.sweep_interval());

    let app = build_router(auth_state, limiters, config.cors_allow_any);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("🎯 API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blog_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
