use std::{fmt, str::FromStr};

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Background sound looped while a session is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbientSound {
    #[default]
    None,
    WhiteNoise,
    BrownNoise,
    Rain,
    Lofi,
}

impl AmbientSound {
    pub const ALL: [AmbientSound; 5] = [
        AmbientSound::None,
        AmbientSound::WhiteNoise,
        AmbientSound::BrownNoise,
        AmbientSound::Rain,
        AmbientSound::Lofi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AmbientSound::None => "none",
            AmbientSound::WhiteNoise => "white_noise",
            AmbientSound::BrownNoise => "brown_noise",
            AmbientSound::Rain => "rain",
            AmbientSound::Lofi => "lofi",
        }
    }

    pub fn is_silent(&self) -> bool {
        *self == AmbientSound::None
    }
}

impl fmt::Display for AmbientSound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AmbientSound {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match AmbientSound::ALL
            .into_iter()
            .find(|sound| sound.as_str() == normalized)
        {
            Some(sound) => Ok(sound),
            None => bail!("unknown ambient sound: {s}"),
        }
    }
}
