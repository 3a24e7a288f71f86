use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::{decode_or_default, KeyValueStore};

pub const SETTINGS_KEY: &str = "settings";

pub const DEFAULT_FLIP_SENSITIVITY: f64 = 0.9;
pub const MIN_FLIP_SENSITIVITY: f64 = 0.7;
pub const MAX_FLIP_SENSITIVITY: f64 = 0.95;

/// User preferences. Stored fields are merged over the defaults, so a
/// payload written by an older build still loads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub daily_goal_minutes: u32,
    /// Sessions at or below this length are dropped as accidental.
    pub min_session_seconds: u64,
    pub haptics_enabled: bool,
    pub dark_mode: bool,
    /// z-axis reading above which a Preparing session starts.
    pub flip_sensitivity: f64,
    /// Fields owned by other parts of the app, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            daily_goal_minutes: 120,
            min_session_seconds: 5,
            haptics_enabled: true,
            dark_mode: false,
            flip_sensitivity: DEFAULT_FLIP_SENSITIVITY,
            extra: Map::new(),
        }
    }
}

impl AppSettings {
    pub fn flip_threshold(&self) -> f64 {
        if self.flip_sensitivity.is_finite() && self.flip_sensitivity > 0.0 {
            self.flip_sensitivity
        } else {
            DEFAULT_FLIP_SENSITIVITY
        }
    }

    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(minutes) = patch.daily_goal_minutes {
            self.daily_goal_minutes = minutes;
        }
        if let Some(seconds) = patch.min_session_seconds {
            self.min_session_seconds = seconds;
        }
        if let Some(enabled) = patch.haptics_enabled {
            self.haptics_enabled = enabled;
        }
        if let Some(dark) = patch.dark_mode {
            self.dark_mode = dark;
        }
        if let Some(sensitivity) = patch.flip_sensitivity.filter(|value| value.is_finite()) {
            self.flip_sensitivity = sensitivity.clamp(MIN_FLIP_SENSITIVITY, MAX_FLIP_SENSITIVITY);
        }
    }
}

/// Partial update; `None` leaves the current value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub daily_goal_minutes: Option<u32>,
    pub min_session_seconds: Option<u64>,
    pub haptics_enabled: Option<bool>,
    pub dark_mode: Option<bool>,
    pub flip_sensitivity: Option<f64>,
}

#[derive(Clone)]
pub struct SettingsStore<S> {
    kv: S,
}

impl<S: KeyValueStore> SettingsStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub async fn load(&self) -> Result<AppSettings> {
        let raw = self
            .kv
            .get(SETTINGS_KEY)
            .await
            .context("failed to load settings")?;
        Ok(decode_or_default(SETTINGS_KEY, raw))
    }

    pub async fn update(&self, patch: SettingsPatch) -> Result<AppSettings> {
        let mut settings = self.load().await?;
        settings.apply(patch);
        let payload = serde_json::to_string(&settings).context("failed to serialize settings")?;
        self.kv
            .set(SETTINGS_KEY, payload)
            .await
            .context("failed to save settings")?;
        Ok(settings)
    }
}
