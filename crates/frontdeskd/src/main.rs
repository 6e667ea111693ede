use std::sync::Arc;

use anyhow::{Context, Result};
use frontdesk_core::ArcFaceOracle;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;
mod error;
mod photo;
mod store;

use config::{Config, RecognitionMode, StorePolicy};
use store::{JsonFilePersistence, MemoryPersistence, Persistence, StoreHandle};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        store = %config.store,
        recognition = %config.recognition,
        tolerance = config.match_tolerance,
        "frontdeskd starting"
    );

    let persistence: Arc<dyn Persistence> = match config.store {
        StorePolicy::File => {
            let backend = JsonFilePersistence::new(&config.store_path);
            tracing::info!(path = %backend.path().display(), "using JSON file store");
            Arc::new(backend)
        }
        StorePolicy::Memory => {
            tracing::info!("using in-memory store; enrolled faces are lost on restart");
            Arc::new(MemoryPersistence::default())
        }
    };

    // Fail fast if the models are missing rather than serving broken recognition.
    let recognizer = match config.recognition {
        RecognitionMode::Oracle => {
            let oracle = ArcFaceOracle::load(&config.model_dir)
                .with_context(|| {
                    format!("loading face models from {}", config.model_dir.display())
                })?;
            tracing::info!(dir = %config.model_dir.display(), "face models loaded");
            api::Recognizer::Oracle(engine::spawn_engine(Box::new(oracle))?)
        }
        RecognitionMode::Placeholder => {
            tracing::warn!(
                "placeholder recognition enabled: no face comparison is performed and every \
                 recognition returns the most recent visitor"
            );
            api::Recognizer::Placeholder
        }
    };

    let state = api::AppState {
        store: StoreHandle::new(persistence),
        recognizer,
        images_dir: Arc::new(config.images_dir.clone()),
        tolerance: config.match_tolerance,
        persistence: config.store,
    };
    let app = api::router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, images = %config.images_dir.display(), "frontdeskd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("frontdeskd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
