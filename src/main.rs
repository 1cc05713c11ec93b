use std::sync::Arc;

use anyhow::{Context, Result};
use lifecycle_engine::{
    application::engine_service::EngineService,
    build_router,
    clock::SystemClock,
    config::AppConfig,
    infrastructure::{EntityStore, InMemoryEntityStore, JsonFileEntityStore, StateRepository},
    state::AppState,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env().context("failed to load application configuration")?;
    let rules = config.load_rules()?;

    let store: Arc<dyn EntityStore> = match &config.data_dir {
        Some(data_dir) => {
            info!(data_dir = %data_dir.display(), "storage backend: json files");
            Arc::new(JsonFileEntityStore::open(data_dir).context("failed to open data directory")?)
        }
        None => {
            info!("storage backend: in-memory");
            Arc::new(InMemoryEntityStore::new())
        }
    };

    let engine = EngineService::new(
        StateRepository::new(store),
        Arc::new(rules),
        Arc::new(SystemClock),
    );
    let app = build_router(AppState::new(engine, config.identity_header.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(
        address = %config.bind_addr,
        identity_header = %config.identity_header,
        "lifecycle engine started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lifecycle_engine=debug,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
