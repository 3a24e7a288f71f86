pub mod ambience;
pub mod clock;
pub mod config;
pub mod db;
pub mod feedback;
pub mod host;
pub mod lifecycle;
pub mod models;
pub mod motion;
pub mod presence;
pub mod session;
pub mod settings;
pub mod stats;
pub mod utils;

use anyhow::{Context, Result};
use log::LevelFilter;

use config::HostConfig;
use db::{Database, KeyValueStore, MemoryStore};
use session::SessionEngine;

pub fn run() -> Result<()> {
    let config = HostConfig::from_env();

    // Defaults to info (debug with FLIPFOCUS_DEBUG); RUST_LOG still wins.
    env_logger::Builder::new()
        .filter_level(if config.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    log::info!("FlipFocus starting up...");

    let initial_url = std::env::args().nth(1);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        if config.ephemeral {
            log::warn!("Ephemeral mode: nothing will be persisted");
            serve(MemoryStore::new(), &config, initial_url).await
        } else {
            let database = Database::new(config.db_path())?;
            serve(database, &config, initial_url).await
        }
    })
}

async fn serve<S: KeyValueStore>(
    store: S,
    config: &HostConfig,
    initial_url: Option<String>,
) -> Result<()> {
    let engine = SessionEngine::new(store, config.engine_config());
    #[cfg(feature = "chime")]
    let engine = match feedback::ChimeFeedback::new() {
        Ok(chime) => engine.with_feedback(std::sync::Arc::new(chime)),
        Err(err) => {
            log::warn!("Audio output unavailable, running silent: {err:#}");
            engine
        }
    };
    #[cfg(feature = "ambience")]
    let engine = match ambience::RodioAmbience::new() {
        Ok(player) => engine.with_ambience(std::sync::Arc::new(player)),
        Err(err) => {
            log::warn!("Ambient sound unavailable: {err:#}");
            engine
        }
    };

    host::serve(engine, initial_url).await
}
