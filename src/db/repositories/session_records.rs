use anyhow::{Context, Result};
use log::warn;

use crate::{
    db::{decode_or_default, KeyValueStore},
    models::{ActiveSessionRecord, PendingCompletedRecord},
};

pub const ACTIVE_SESSION_KEY: &str = "active_session";
pub const PENDING_COMPLETED_KEY: &str = "pending_completed";

/// Crash-safety record of the running session plus the queue of sessions
/// ended outside the engine.
#[derive(Clone)]
pub struct SessionRecordStore<S> {
    kv: S,
}

impl<S: KeyValueStore> SessionRecordStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub async fn save_active(&self, record: &ActiveSessionRecord) -> Result<()> {
        let payload =
            serde_json::to_string(record).context("failed to serialize active session")?;
        self.kv
            .set(ACTIVE_SESSION_KEY, payload)
            .await
            .context("failed to save active session")
    }

    pub async fn load_active(&self) -> Result<Option<ActiveSessionRecord>> {
        let raw = self
            .kv
            .get(ACTIVE_SESSION_KEY)
            .await
            .context("failed to load active session")?;
        Ok(decode_or_default(ACTIVE_SESSION_KEY, raw))
    }

    pub async fn clear_active(&self) -> Result<()> {
        self.kv
            .remove(ACTIVE_SESSION_KEY)
            .await
            .context("failed to clear active session")
    }

    /// Appends to the pending queue. This is the external actor's side of the
    /// protocol; the engine itself only drains.
    pub async fn push_pending(&self, record: PendingCompletedRecord) -> Result<()> {
        let mut queue = self.load_pending().await?;
        queue.push(record);
        let payload =
            serde_json::to_string(&queue).context("failed to serialize pending queue")?;
        self.kv
            .set(PENDING_COMPLETED_KEY, payload)
            .await
            .context("failed to save pending completed session")
    }

    /// Entries are decoded one by one; a malformed entry is logged and
    /// skipped without hiding the rest of the queue.
    pub async fn load_pending(&self) -> Result<Vec<PendingCompletedRecord>> {
        let raw = self
            .kv
            .get(PENDING_COMPLETED_KEY)
            .await
            .context("failed to load pending completed sessions")?;
        let entries: Vec<serde_json::Value> = decode_or_default(PENDING_COMPLETED_KEY, raw);

        Ok(entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                match serde_json::from_value::<PendingCompletedRecord>(entry) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        warn!("Skipping malformed pending session #{index}: {err}");
                        None
                    }
                }
            })
            .collect())
    }

    pub async fn clear_pending(&self) -> Result<()> {
        self.kv
            .remove(PENDING_COMPLETED_KEY)
            .await
            .context("failed to clear pending completed sessions")
    }
}
