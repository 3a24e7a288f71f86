use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use anyhow::{bail, Result};
use tokio::sync::Mutex;

use super::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    Remove,
}

#[derive(Default)]
struct MemoryInner {
    values: Mutex<HashMap<String, String>>,
    failures: StdMutex<HashSet<(StoreOp, String)>>,
    latency: StdMutex<Duration>,
    writes: StdMutex<Vec<(StoreOp, String)>>,
}

/// In-process key-value store.
///
/// Backs ephemeral runs and tests. Failures can be switched on per
/// operation and key, and every successful write is journaled so callers
/// can count how often a key was touched.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `op` on `key` fail until [`MemoryStore::heal`] is called.
    pub fn fail(&self, op: StoreOp, key: &str) {
        lock(&self.inner.failures).insert((op, key.to_string()));
    }

    pub fn heal(&self, op: StoreOp, key: &str) {
        lock(&self.inner.failures).remove(&(op, key.to_string()));
    }

    /// Delay applied before every operation.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.inner.latency) = latency;
    }

    /// Successful writes (`Set` or `Remove`) to `key` so far.
    pub fn write_count(&self, op: StoreOp, key: &str) -> usize {
        lock(&self.inner.writes)
            .iter()
            .filter(|(logged_op, logged_key)| *logged_op == op && logged_key == key)
            .count()
    }

    pub async fn raw(&self, key: &str) -> Option<String> {
        self.inner.values.lock().await.get(key).cloned()
    }

    /// Writes straight into the map, bypassing failure switches and the journal.
    pub async fn put_raw(&self, key: &str, value: impl Into<String>) {
        self.inner
            .values
            .lock()
            .await
            .insert(key.to_string(), value.into());
    }

    async fn before(&self, op: StoreOp, key: &str) -> Result<()> {
        let latency = *lock(&self.inner.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if lock(&self.inner.failures).contains(&(op, key.to_string())) {
            bail!("injected {op:?} failure for '{key}'");
        }
        Ok(())
    }

    fn journal(&self, op: StoreOp, key: &str) {
        lock(&self.inner.writes).push((op, key.to_string()));
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.before(StoreOp::Get, key).await?;
        Ok(self.inner.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.before(StoreOp::Set, key).await?;
        self.inner.values.lock().await.insert(key.to_string(), value);
        self.journal(StoreOp::Set, key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.before(StoreOp::Remove, key).await?;
        self.inner.values.lock().await.remove(key);
        self.journal(StoreOp::Remove, key);
        Ok(())
    }
}
