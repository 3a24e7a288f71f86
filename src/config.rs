use std::{path::PathBuf, time::Duration};

use crate::{session::EngineConfig, utils::is_truthy};

pub const DATA_DIR_VAR: &str = "FLIPFOCUS_DATA_DIR";
pub const EPHEMERAL_VAR: &str = "FLIPFOCUS_EPHEMERAL";
pub const DEBUG_VAR: &str = "FLIPFOCUS_DEBUG";
pub const TICK_MS_VAR: &str = "FLIPFOCUS_TICK_MS";

const DEFAULT_TICK_MS: u64 = 1_000;
const MIN_TICK_MS: u64 = 50;
const DB_FILE_NAME: &str = "flipfocus.sqlite3";

/// Process-level configuration for the headless host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub data_dir: PathBuf,
    /// Keep everything in memory; nothing survives the process.
    pub ephemeral: bool,
    pub debug: bool,
    pub tick_interval: Duration,
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup(DATA_DIR_VAR)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let flag = |name: &str| lookup(name).is_some_and(|value| is_truthy(value.trim()));

        let tick_ms = lookup(TICK_MS_VAR)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TICK_MS)
            .max(MIN_TICK_MS);

        Self {
            data_dir,
            ephemeral: flag(EPHEMERAL_VAR),
            debug: flag(DEBUG_VAR),
            tick_interval: Duration::from_millis(tick_ms),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tick_interval: self.tick_interval,
            heartbeat_every_ticks: if self.debug { 1 } else { 10 },
            ..EngineConfig::default()
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("flipfocus")
}
