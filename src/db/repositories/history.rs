use anyhow::{Context, Result};

use crate::{
    db::{decode_or_default, KeyValueStore},
    models::FocusSession,
};

pub const SESSIONS_KEY: &str = "sessions";

/// Completed-session log, stored newest-first as one JSON array.
///
/// Every write rewrites the whole array.
#[derive(Clone)]
pub struct HistoryStore<S> {
    kv: S,
}

impl<S: KeyValueStore> HistoryStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub async fn list(&self) -> Result<Vec<FocusSession>> {
        let raw = self
            .kv
            .get(SESSIONS_KEY)
            .await
            .context("failed to load session history")?;
        Ok(decode_or_default(SESSIONS_KEY, raw))
    }

    /// Prepends `session` and returns the updated history.
    ///
    /// Duplicate ids are kept; a replayed pending record lands twice.
    pub async fn append(&self, session: FocusSession) -> Result<Vec<FocusSession>> {
        let mut sessions = self.list().await?;
        sessions.insert(0, session);
        self.write(&sessions).await?;
        Ok(sessions)
    }

    /// Removes every entry carrying `id` and returns what is left.
    pub async fn delete(&self, id: &str) -> Result<Vec<FocusSession>> {
        let mut sessions = self.list().await?;
        let before = sessions.len();
        sessions.retain(|session| session.id != id);
        if sessions.len() != before {
            self.write(&sessions).await?;
        }
        Ok(sessions)
    }

    pub async fn clear(&self) -> Result<()> {
        self.kv
            .remove(SESSIONS_KEY)
            .await
            .context("failed to clear session history")
    }

    async fn write(&self, sessions: &[FocusSession]) -> Result<()> {
        let payload =
            serde_json::to_string(sessions).context("failed to serialize session history")?;
        self.kv
            .set(SESSIONS_KEY, payload)
            .await
            .context("failed to save session history")
    }
}
