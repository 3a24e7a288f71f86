use serde::Serialize;

use crate::{models::FocusSession, motion::Orientation};

use super::SessionState;

/// Everything the engine tells its observers about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    PhaseChanged {
        state: SessionState,
    },
    /// Display tick while Focusing.
    Tick {
        #[serde(rename = "elapsedSeconds")]
        elapsed_seconds: u64,
    },
    /// A session made it into history.
    SessionCompleted {
        session: FocusSession,
    },
    HistoryUpdated {
        count: usize,
    },
    /// Face-down/face-up edge seen outside Preparing.
    Orientation {
        orientation: Orientation,
    },
}
