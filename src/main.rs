//! Basta Back binary entrypoint wiring REST, WebSocket, SSE, and storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dao;
mod dto;
mod error;
mod routes;
mod services;
mod state;

use config::AppConfig;
use dao::session_store::SessionStore;
use dao::storage::StorageError;
use state::{AppState, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_state = AppState::new(AppConfig::load());

    let connect_state = app_state.clone();
    tokio::spawn(services::storage_supervisor::run(
        app_state.clone(),
        move || {
            let state = connect_state.clone();
            async move { connect_store(state).await }
        },
    ));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Connect the MongoDB session store and seed the category catalog.
#[cfg(feature = "mongo-store")]
async fn connect_store(state: SharedState) -> Result<Arc<dyn SessionStore>, StorageError> {
    use dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

    let config = MongoConfig::from_env().await?;
    let store: Arc<dyn SessionStore> = Arc::new(MongoSessionStore::connect(config).await?);
    store
        .seed_categories(state.config().categories().to_vec())
        .await?;
    Ok(store)
}

/// Fall back to the in-memory session store; sessions do not survive a
/// restart.
#[cfg(not(feature = "mongo-store"))]
async fn connect_store(state: SharedState) -> Result<Arc<dyn SessionStore>, StorageError> {
    use dao::session_store::memory::MemorySessionStore;

    tracing::warn!("running on the in-memory store; sessions are lost on restart");
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    store
        .seed_categories(state.config().categories().to_vec())
        .await?;
    Ok(store)
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: state::SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
