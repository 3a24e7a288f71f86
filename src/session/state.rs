use serde::{Deserialize, Serialize};

use crate::{
    clock::elapsed_seconds,
    models::{ActiveSessionRecord, AmbientSound, SessionTag, StartTrigger},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Idle,
    /// The user asked to focus and has not put the phone away yet.
    Preparing,
    Focusing,
    /// Showing the result of the session that just ended.
    Summary,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub start_time: i64,
    pub end_time: i64,
    pub duration_seconds: u64,
    pub tag: SessionTag,
    pub trigger: Option<StartTrigger>,
    /// Set once the session has been appended to history.
    pub recorded: bool,
    /// The session was closed on process start rather than by the user.
    pub recovered: bool,
}

/// The single authoritative copy of where the session lifecycle stands.
///
/// Every method is a guarded transition: it checks the current phase and
/// returns without side effects when the transition does not apply.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub phase: SessionPhase,
    pub start_time: Option<i64>,
    pub started_via: Option<StartTrigger>,
    pub elapsed_seconds: u64,
    pub selected_tag: SessionTag,
    /// Looped while Focusing; kept across sessions.
    pub selected_sound: AmbientSound,
    pub summary: Option<SessionSummary>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle -> Preparing.
    pub fn prepare(&mut self) -> bool {
        if self.phase != SessionPhase::Idle {
            return false;
        }
        self.phase = SessionPhase::Preparing;
        true
    }

    /// Preparing -> Idle.
    pub fn cancel_preparing(&mut self) -> bool {
        if self.phase != SessionPhase::Preparing {
            return false;
        }
        self.phase = SessionPhase::Idle;
        true
    }

    /// Preparing -> Focusing. Only the first trigger wins.
    pub fn begin_focus(&mut self, now_ms: i64, trigger: StartTrigger) -> bool {
        if self.phase != SessionPhase::Preparing {
            return false;
        }
        self.phase = SessionPhase::Focusing;
        self.start_time = Some(now_ms);
        self.started_via = Some(trigger);
        self.elapsed_seconds = 0;
        true
    }

    /// Focusing -> Summary.
    pub fn finish_focus(&mut self, end_ms: i64) -> Option<SessionSummary> {
        if self.phase != SessionPhase::Focusing {
            return None;
        }
        let Some(start_time) = self.start_time else {
            self.phase = SessionPhase::Idle;
            return None;
        };

        let summary = SessionSummary {
            start_time,
            end_time: end_ms,
            duration_seconds: elapsed_seconds(start_time, end_ms),
            tag: self.selected_tag,
            trigger: self.started_via,
            recorded: false,
            recovered: false,
        };
        self.enter_summary(summary.clone());
        Some(summary)
    }

    /// Idle -> Summary for a session left behind by a previous process.
    pub fn recover(&mut self, record: &ActiveSessionRecord, end_ms: i64) -> Option<SessionSummary> {
        if self.phase != SessionPhase::Idle {
            return None;
        }

        let summary = SessionSummary {
            start_time: record.start_time,
            end_time: end_ms,
            duration_seconds: elapsed_seconds(record.start_time, end_ms),
            tag: record.tag.unwrap_or(self.selected_tag),
            trigger: Some(record.started_via),
            recorded: false,
            recovered: true,
        };
        self.enter_summary(summary.clone());
        Some(summary)
    }

    /// Summary -> Idle.
    pub fn dismiss(&mut self) -> bool {
        if self.phase != SessionPhase::Summary {
            return false;
        }
        self.phase = SessionPhase::Idle;
        self.summary = None;
        true
    }

    pub fn mark_recorded(&mut self, start_time: i64, end_time: i64) {
        if let Some(summary) = self.summary.as_mut() {
            if summary.start_time == start_time && summary.end_time == end_time {
                summary.recorded = true;
            }
        }
    }

    pub fn sync_elapsed(&mut self, now_ms: i64) {
        if let (SessionPhase::Focusing, Some(start_time)) = (self.phase, self.start_time) {
            self.elapsed_seconds = elapsed_seconds(start_time, now_ms);
        }
    }

    fn enter_summary(&mut self, summary: SessionSummary) {
        self.phase = SessionPhase::Summary;
        self.start_time = None;
        self.started_via = None;
        self.elapsed_seconds = 0;
        self.summary = Some(summary);
    }
}
