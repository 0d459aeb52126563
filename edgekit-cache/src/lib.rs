//! Cache managers for the edgekit dispatcher.
//!
//! A [`CacheManager`] stores JSON-shaped values under string keys with an
//! optional per-entry life time (`None` = cached until cleared). The
//! in-memory manager evicts lazily on access; the signal-based manager
//! wraps another manager and resets it when its [`CacheSignaler`] fires.
//! [`Cached::wrap`] caches a compiled handler's results transparently,
//! before the dispatcher ever sees the handler.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use edgekit_core::di::injection::{HandlerFuture, HandlerResult, HandlerSpec, InvokeFn};
use edgekit_core::di::ServiceKey;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Key/value cache with per-entry life times.
pub trait CacheManager: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<Value>;

    /// Store a value. `life_time` of `None` caches until cleared.
    fn set(&self, key: &str, value: Value, life_time: Option<Duration>);

    /// Drop one key. Returns whether it was present.
    fn clear(&self, key: &str) -> bool;

    /// Drop everything.
    fn reset(&self);
}

/// No-op manager used when caching is not configured.
pub struct NoCache;

impl ServiceKey for NoCache {}

impl CacheManager for NoCache {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    fn set(&self, _key: &str, _value: Value, _life_time: Option<Duration>) {}

    fn clear(&self, _key: &str) -> bool {
        false
    }

    fn reset(&self) {}
}

/// Thread-safe in-memory cache with lazy, per-entry TTL eviction.
pub struct InMemoryCache {
    entries: DashMap<String, (Value, Instant, Option<Duration>)>,
}

impl ServiceKey for InMemoryCache {}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Remove all expired entries.
    pub fn evict_expired(&self) {
        self.entries
            .retain(|_, (_, inserted, life_time)| match life_time {
                Some(ttl) => inserted.elapsed() < *ttl,
                None => true,
            });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheManager for InMemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            let (value, inserted, life_time) = entry.value();
            match life_time {
                Some(ttl) if inserted.elapsed() >= *ttl => {
                    drop(entry);
                    self.entries.remove(key);
                    None
                }
                _ => Some(value.clone()),
            }
        } else {
            None
        }
    }

    fn set(&self, key: &str, value: Value, life_time: Option<Duration>) {
        self.entries
            .insert(key.to_string(), (value, Instant::now(), life_time));
    }

    fn clear(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn reset(&self) {
        self.entries.clear();
    }
}

// ── Signal-based manager ────────────────────────────────────────────────

/// Source of cache-invalidation signals. `start` runs until the token is
/// cancelled, calling `on_signal` with a key to clear or `None` for a full
/// reset.
pub trait CacheSignaler: Send + Sync + 'static {
    fn start(&self, on_signal: Arc<dyn Fn(Option<&str>) + Send + Sync>, token: CancellationToken);
}

/// Signaler that requests a full reset on a fixed interval.
pub struct TimeSignaler {
    interval: Duration,
}

impl TimeSignaler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl CacheSignaler for TimeSignaler {
    fn start(&self, on_signal: Arc<dyn Fn(Option<&str>) + Send + Sync>, token: CancellationToken) {
        let interval = self.interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => on_signal(None),
                }
            }
        });
    }
}

/// Manager that delegates storage to an inner manager and clears it when
/// the signaler fires.
pub struct SignalCache {
    inner: Arc<dyn CacheManager>,
    token: CancellationToken,
}

impl ServiceKey for SignalCache {}

impl SignalCache {
    pub fn new(inner: Arc<dyn CacheManager>, signaler: &dyn CacheSignaler) -> Self {
        let token = CancellationToken::new();
        let target = inner.clone();
        signaler.start(
            Arc::new(move |key| match key {
                Some(key) => {
                    target.clear(key);
                }
                None => target.reset(),
            }),
            token.clone(),
        );
        Self { inner, token }
    }
}

impl Drop for SignalCache {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl CacheManager for SignalCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: Value, life_time: Option<Duration>) {
        self.inner.set(key, value, life_time);
    }

    fn clear(&self, key: &str) -> bool {
        self.inner.clear(key)
    }

    fn reset(&self) {
        self.inner.reset();
    }
}

// ── Factory ─────────────────────────────────────────────────────────────

/// Build a manager from the `cache` config section.
///
/// Recognized shapes: absent → [`NoCache`]; `{"type": "memory"}` →
/// [`InMemoryCache`], with an optional `"reset_interval"` in seconds that
/// wraps it in a time-signaled [`SignalCache`]; `{"type": "none"}` →
/// [`NoCache`].
pub fn from_config(options: Option<&Value>) -> Arc<dyn CacheManager> {
    let Some(options) = options else {
        return Arc::new(NoCache);
    };
    let cache_type = options
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("memory");
    match cache_type {
        "memory" => {
            let inner: Arc<dyn CacheManager> = Arc::new(InMemoryCache::new());
            match options.get("reset_interval").and_then(Value::as_u64) {
                Some(seconds) if seconds > 0 => {
                    let signaler = TimeSignaler::new(Duration::from_secs(seconds));
                    Arc::new(SignalCache::new(inner, &signaler))
                }
                _ => inner,
            }
        }
        "none" => Arc::new(NoCache),
        other => {
            tracing::warn!(cache_type = other, "unknown cache type, caching disabled");
            Arc::new(NoCache)
        }
    }
}

// ── Handler-result caching ──────────────────────────────────────────────

/// Wraps a compiled handler so its results are cached.
///
/// `life_time` of zero seconds caches until cleared. With no explicit key
/// the cache key is derived from the context URL and the effective values,
/// so distinct requests cache independently. Wrapping happens before
/// registration, transparently to dispatch.
pub struct Cached;

impl Cached {
    pub fn wrap(
        manager: Arc<dyn CacheManager>,
        key: Option<String>,
        life_time: Duration,
        spec: HandlerSpec,
    ) -> HandlerSpec {
        let (plan, invoke) = spec.into_parts();
        let life_time = if life_time.is_zero() {
            None
        } else {
            Some(life_time)
        };
        let cached_invoke: InvokeFn = Arc::new(move |ctx, values| {
            let cache_key = match &key {
                Some(key) => key.clone(),
                None => {
                    let mut hasher = DefaultHasher::new();
                    ctx.url().unwrap_or("").hash(&mut hasher);
                    ctx.url_segments()
                        .into_iter()
                        .collect::<std::collections::BTreeMap<_, _>>()
                        .hash(&mut hasher);
                    format!("handler:{:x}", hasher.finish())
                }
            };
            if let Some(hit) = manager.get(&cache_key) {
                if let Ok(result) = serde_json::from_value::<HandlerResult>(hit) {
                    return Box::pin(std::future::ready(Ok(result))) as HandlerFuture;
                }
            }
            let manager = manager.clone();
            let future = invoke(ctx, values);
            Box::pin(async move {
                let result = future.await?;
                if let Ok(serialized) = serde_json::to_value(&result) {
                    manager.set(&cache_key, serialized, life_time);
                }
                Ok(result)
            }) as HandlerFuture
        });
        HandlerSpec::new(plan, cached_invoke)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn entries_expire_after_life_time() {
        tokio::time::pause();
        let cache = InMemoryCache::new();
        cache.set("k", json!(1), Some(Duration::from_secs(60)));
        assert_eq!(cache.get("k"), Some(json!(1)));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn zero_life_time_means_forever() {
        let cache = InMemoryCache::new();
        cache.set("k", json!("v"), None);
        assert_eq!(cache.get("k"), Some(json!("v")));
        assert!(cache.clear("k"));
        assert_eq!(cache.get("k"), None);
        assert!(!cache.clear("k"));
    }

    #[test]
    fn reset_drops_everything() {
        let cache = InMemoryCache::new();
        cache.set("a", json!(1), None);
        cache.set("b", json!(2), None);
        cache.reset();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn time_signaler_resets_inner_cache() {
        let inner: Arc<dyn CacheManager> = Arc::new(InMemoryCache::new());
        let signaler = TimeSignaler::new(Duration::from_millis(20));
        let cache = SignalCache::new(inner, &signaler);
        cache.set("k", json!(1), None);
        assert_eq!(cache.get("k"), Some(json!(1)));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn factory_selects_manager() {
        assert!(from_config(None).get("x").is_none());
        let memory = from_config(Some(&json!({"type": "memory"})));
        memory.set("x", json!(1), None);
        assert_eq!(memory.get("x"), Some(json!(1)));
        let none = from_config(Some(&json!({"type": "none"})));
        none.set("x", json!(1), None);
        assert!(none.get("x").is_none());
    }
}
