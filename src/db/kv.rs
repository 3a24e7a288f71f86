use std::future::Future;

use anyhow::Result;
use log::warn;
use serde::de::DeserializeOwned;

/// Async string store keyed by name.
///
/// Implementations must serialize operations on one key; callers do
/// read-modify-write of whole values and rely on that.
pub trait KeyValueStore: Clone + Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<()>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Decodes a stored JSON value, falling back to `T::default()` when the key
/// is absent or its payload does not parse.
///
/// A corrupt payload is logged and then overwritten by the next write.
pub fn decode_or_default<T>(key: &str, raw: Option<String>) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(raw) = raw else {
        return T::default();
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!("Discarding malformed value under '{key}': {err}");
            T::default()
        }
    }
}
