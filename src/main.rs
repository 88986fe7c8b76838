//! Festival Back binary entrypoint wiring the store, the connection hub, reconciliation and
//! the REST/WebSocket layer.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use festival_back::{
    config::AppConfig,
    dao::festival_store::{FestivalStore, memory::MemoryFestivalStore},
    routes,
    services::reconciliation,
    state::{AppState, Hub, SharedState},
};
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::load());
    let store = connect_store().await?;
    store.health_check().await.context("store health check")?;

    if let Err(err) =
        reconciliation::repair_on_boot(store.as_ref(), &config.reconcile, OffsetDateTime::now_utc())
            .await
    {
        warn!(error = %err, "boot reconciliation failed; the first tick will retry");
    }

    let shutdown = CancellationToken::new();
    let (hub, hub_task) = Hub::spawn(
        config.hub.clone(),
        store.clone(),
        config.operation_timeout(),
        shutdown.clone(),
    );
    let app_state = AppState::new(config, store.clone(), hub, shutdown.clone());
    let reconcile_task = tokio::spawn(reconciliation::run(
        app_state.clone(),
        shutdown.child_token(),
    ));

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
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("serving axum")?;

    // Background writers stop before the store goes away.
    shutdown.cancel();
    if let Err(err) = reconcile_task.await {
        warn!(error = %err, "reconciliation task failed");
    }
    if let Err(err) = hub_task.await {
        warn!(error = %err, "hub task failed");
    }
    store.close().await;
    info!("shutdown complete");

    Ok(())
}

/// Postgres when `DATABASE_URL` is set, the in-memory store otherwise.
async fn connect_store() -> anyhow::Result<Arc<dyn FestivalStore>> {
    if let Some(store) = connect_postgres().await? {
        return Ok(store);
    }
    info!("using in-memory store; data does not survive restarts");
    Ok(Arc::new(MemoryFestivalStore::new()))
}

#[cfg(feature = "postgres-store")]
async fn connect_postgres() -> anyhow::Result<Option<Arc<dyn FestivalStore>>> {
    use festival_back::dao::festival_store::postgres::{PgConfig, PgFestivalStore};

    if env::var("DATABASE_URL").is_err() {
        return Ok(None);
    }
    let config = PgConfig::from_env().context("reading Postgres configuration")?;
    let store = PgFestivalStore::connect(config)
        .await
        .context("connecting to Postgres")?;
    info!("connected to Postgres");
    Ok(Some(Arc::new(store)))
}

#[cfg(not(feature = "postgres-store"))]
async fn connect_postgres() -> anyhow::Result<Option<Arc<dyn FestivalStore>>> {
    if env::var("DATABASE_URL").is_ok() {
        warn!("DATABASE_URL is set but the postgres-store feature is disabled");
    }
    Ok(None)
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state).layer(TraceLayer::new_for_http())
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

/// Wait for Ctrl+C or SIGTERM, then cancel `shutdown` so sessions close before HTTP drains.
async fn shutdown_signal(shutdown: CancellationToken) {
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

    info!("shutdown requested");
    shutdown.cancel();
}
