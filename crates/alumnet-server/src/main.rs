use std::sync::Arc;
use std::time::Duration;

use alumnet_core::bridge::EventBridge;
use alumnet_core::directory::SqlDirectory;
use alumnet_core::presence_store::{select_backend, PresenceStoreConfig};
use alumnet_core::{AppConfig, AppState, Directories};
use anyhow::Result;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod health;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_tracing(args.log_json);

    let config = config::Config::load(&args.config)?;
    ensure_data_dirs(&config);

    let db = alumnet_db::create_pool(&config.database.url, config.database.max_connections).await?;
    alumnet_db::run_migrations(&db).await?;

    let backend = select_backend(&PresenceStoreConfig {
        redis_url: config.presence.redis_url.clone(),
        key_prefix: config.presence.key_prefix.clone(),
        ttl_secs: config.presence.ttl_secs,
    })
    .await;

    let state = AppState::new(
        AppConfig {
            jwt_secret: config.auth.jwt_secret.clone(),
            jwt_expiry_seconds: config.auth.jwt_expiry_seconds,
            offline_grace: config.offline_grace(),
            ping_interval: config.ping_interval(),
            event_bus_capacity: config.gateway.event_bus_capacity,
        },
        backend.store.clone(),
        Directories::shared(Arc::new(SqlDirectory::new(db))),
    );

    let bridge = match backend.redis {
        Some(client) => match EventBridge::start(
            client,
            state.event_bus.clone(),
            &config.presence.bridge_channel,
        )
        .await
        {
            Ok(bridge) => Some(bridge),
            Err(e) => {
                tracing::warn!("cross-instance event bridge unavailable, events stay local: {e}");
                None
            }
        },
        None => None,
    };

    let app = health::router()
        .merge(alumnet_ws::gateway_router())
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;

    print_startup_banner(
        &config.server.bind_address,
        &config.database.url,
        state.presence.backend_name(),
        bridge.is_some(),
    );

    let shutdown = state.shutdown.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        println!();
        tracing::info!("Shutting down (ctrl-c)...");
        // Tell every live connection to close so clients reconnect elsewhere.
        shutdown.notify_waiters();
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Upgraded sockets outlive the HTTP server; let them record their
    // offline transitions before the process exits.
    if tokio::time::timeout(SHUTDOWN_DRAIN, state.presence.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!("gateway connections still open after {SHUTDOWN_DRAIN:?}, exiting anyway");
    }

    if let Some(bridge) = bridge {
        bridge.shutdown();
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("alumnet=info,tower_http=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Make sure the SQLite file's directory exists before connecting.
fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!("Could not create directory '{}': {}", parent.display(), e);
                }
            }
        }
    }
}

fn print_startup_banner(bind_address: &str, db_url: &str, presence_backend: &str, bridged: bool) {
    println!();
    println!("  alumnet realtime gateway v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Listening:   http://{}", bind_address);
    println!("  Gateway:     ws://{}/socket", bind_address);
    println!("  Database:    {}", db_url);
    println!("  Presence:    {}", presence_backend);
    println!(
        "  Fan-out:     {}",
        if bridged { "redis pub/sub" } else { "local only" }
    );
    println!();
}
