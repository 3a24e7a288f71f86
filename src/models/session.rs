use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Completed,
    /// The process went away mid-session and the session was closed on the next start.
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Completed => "completed",
            SessionStatus::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionTag {
    #[default]
    Work,
    Study,
    Reading,
    Creative,
    Exercise,
    Other,
}

impl SessionTag {
    pub const ALL: [SessionTag; 6] = [
        SessionTag::Work,
        SessionTag::Study,
        SessionTag::Reading,
        SessionTag::Creative,
        SessionTag::Exercise,
        SessionTag::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionTag::Work => "work",
            SessionTag::Study => "study",
            SessionTag::Reading => "reading",
            SessionTag::Creative => "creative",
            SessionTag::Exercise => "exercise",
            SessionTag::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionTag::Work => "Work",
            SessionTag::Study => "Study",
            SessionTag::Reading => "Reading",
            SessionTag::Creative => "Creative",
            SessionTag::Exercise => "Exercise",
            SessionTag::Other => "Other",
        }
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionTag {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        SessionTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == lowered)
            .ok_or_else(|| anyhow!("unknown session tag '{value}'"))
    }
}

/// One entry of the completed-session history.
///
/// Timestamps are epoch milliseconds, `duration` is whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: u64,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<SessionTag>,
}

impl FocusSession {
    /// Builds a history entry whose id is derived from the end time.
    ///
    /// Two records ending at the same millisecond share an id; history
    /// readers must tolerate that.
    pub fn ended_at(
        start_time: i64,
        end_time: i64,
        duration: u64,
        status: SessionStatus,
        tag: Option<SessionTag>,
    ) -> Self {
        Self {
            id: session_id_for(end_time),
            start_time,
            end_time,
            duration,
            status,
            tag,
        }
    }
}

pub fn session_id_for(end_time: i64) -> String {
    end_time.to_string()
}
