use anyhow::{Context, Result};
use payclaim_ingest::GeminiExtractor;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

mod config;
mod error;
mod intake;
mod routes;

use config::Config;
use routes::AppState;

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let formatting = BunyanFormattingLayer::new("payclaim-server".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(filter)
        .with(JsonStorageLayer)
        .with(formatting);
    tracing::subscriber::set_global_default(subscriber).context("failed to install tracing")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = Config::load()?;
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let pool = payclaim_storage::create_db(&db_path, &config.db_options())
        .await
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    if config.fallback.api_key.is_none() {
        tracing::warn!("no Gemini API key configured; unreadable messages go straight to manual review");
    }
    let fallback = GeminiExtractor::new(config.fallback.api_key.clone(), config.fallback.model.clone());
    let state = AppState::new(pool, config.verify_config(), fallback);

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, db = %db_path.display(), "payclaim server listening");
    axum::serve(listener, routes::app(state)).await?;
    Ok(())
}
