//! Hot tier: exact-match, short-TTL cache keyed by rounded coordinates.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::CacheBackendError;

/// Boxed future returned by cache-store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheBackendError>> + Send + 'a>>;

/// Key/value store with per-entry expiry.
///
/// Implementations may live in another process. Callers treat every error
/// as a cache miss.
pub trait HotStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    fn set_with_expiry<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> StoreFuture<'a, ()>;

    /// Returns whether a live entry was removed.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;
}

/// Hot-tier key for a coordinate.
///
/// Two decimals (about 1.1 km) when the proximity radius is 5 km or less,
/// one decimal otherwise, so a hot key never spans more ground than the
/// warm lookup that would have served it.
pub fn hot_key(latitude: f64, longitude: f64, radius_km: f64) -> String {
    let (latitude, longitude) = if radius_km <= 5.0 {
        ((latitude * 100.0).round() / 100.0, (longitude * 100.0).round() / 100.0)
    } else {
        ((latitude * 10.0).round() / 10.0, (longitude * 10.0).round() / 10.0)
    };
    let precision = if radius_km <= 5.0 { 2 } else { 1 };
    // -0.0 and 0.0 must share a key.
    format!(
        "model:{:.precision$}:{:.precision$}",
        latitude + 0.0,
        longitude + 0.0
    )
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local hot store.
#[derive(Debug, Clone, Default)]
pub struct MemoryHotStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryHotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many went.
    pub async fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl HotStore for MemoryHotStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries
                .get(key)
                .filter(|entry| Instant::now() < entry.expires_at)
                .map(|entry| entry.value.clone()))
        })
    }

    fn set_with_expiry<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if ttl.is_zero() {
                return Ok(());
            }
            let entry = Entry {
                value,
                expires_at: Instant::now() + ttl,
            };
            self.entries.write().await.insert(key.to_owned(), entry);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let removed = self.entries.write().await.remove(key);
            Ok(removed.is_some_and(|entry| Instant::now() < entry.expires_at))
        })
    }
}
