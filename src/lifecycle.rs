use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};

/// Host visibility transitions, delivered in the order they happened.
///
/// Locking the device walks `Inactive` then `Background`; unlocking and
/// reopening the app ends in `Active`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleSignal {
    Active,
    /// Leaving the foreground; the process still has full privileges here.
    Inactive,
    Background,
}

impl LifecycleSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleSignal::Active => "active",
            LifecycleSignal::Inactive => "inactive",
            LifecycleSignal::Background => "background",
        }
    }

    pub fn is_leaving_foreground(&self) -> bool {
        matches!(self, LifecycleSignal::Inactive | LifecycleSignal::Background)
    }
}

impl fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleSignal {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" | "foreground" => Ok(LifecycleSignal::Active),
            "inactive" => Ok(LifecycleSignal::Inactive),
            "background" => Ok(LifecycleSignal::Background),
            other => Err(anyhow!("unknown lifecycle signal '{other}'")),
        }
    }
}

/// Intent carried by `flipfocus://start-session` and by the voice shortcut.
pub const START_SESSION_INTENT: &str = "start-session";

/// True when the link routes to the start-session intent: the final segment
/// of host plus path, ignoring scheme, query and fragment.
pub fn is_start_session_link(url: &str) -> bool {
    let rest = url
        .trim()
        .split_once("://")
        .map_or(url.trim(), |(_, rest)| rest);
    let route = rest.split(['?', '#']).next().unwrap_or_default();
    route
        .split('/')
        .rfind(|segment| !segment.is_empty())
        .is_some_and(|segment| segment.eq_ignore_ascii_case(START_SESSION_INTENT))
}
