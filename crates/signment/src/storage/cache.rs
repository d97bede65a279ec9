//! Cache layer: Redis when `REDIS_URL` points at a reachable server,
//! otherwise a process-local in-memory store with the same semantics.
//!
//! The fallback keeps a single-process deployment fully functional; what
//! is lost without Redis is only cross-process sharing (a separately
//! launched worker would not see the web tier's queue).
//!
//! Key families:
//! - `shipment:{tn}` - cached shipment details JSON (TTL 1 h)
//! - `paused_simulations` - hash tn -> "true"
//! - `sim_speed_multipliers` - hash tn -> f64
//! - `route_templates` - route template JSON (TTL 24 h)
//! - `geocode:{location}` - geocoding result JSON (TTL 24 h)
//! - `batch:{chat_id}` - set of tracking numbers selected in the bot menu
//! - `notification_queue` - list of serialized notifications

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::metrics;
use crate::core::validation;

/// In-memory stand-in for the Redis structures we use.
#[derive(Default)]
struct MemoryStore {
    kv: DashMap<String, (String, Option<Instant>)>,
    hashes: DashMap<String, HashMap<String, String>>,
    sets: DashMap<String, HashSet<String>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
}

#[derive(Clone)]
enum Backend {
    Redis(ConnectionManager),
    Memory(Arc<MemoryStore>),
}

/// Shared cache handle. Cloning is cheap in both backends.
#[derive(Clone)]
pub struct ShipmentCache {
    backend: Backend,
}

impl ShipmentCache {
    /// Connects to Redis and falls back to the in-memory store when the
    /// URL is unset or the server does not answer a PING.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        if let Some(url) = redis_url {
            match Self::try_redis(url).await {
                Ok(manager) => {
                    log::info!("Redis connection successful");
                    return Self {
                        backend: Backend::Redis(manager),
                    };
                }
                Err(e) => {
                    log::error!("Redis connection failed: {}. Falling back to in-memory cache", e);
                }
            }
        } else {
            log::warn!("REDIS_URL not set, using in-memory cache");
        }

        Self::in_memory()
    }

    /// Purely in-process backend. Also used by tests.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(MemoryStore::default())),
        }
    }

    async fn try_redis(url: &str) -> AppResult<ConnectionManager> {
        let client = redis::Client::open(url)?;
        let mut manager = client.get_connection_manager().await?;
        redis::cmd("PING").query_async::<()>(&mut manager).await?;
        Ok(manager)
    }

    /// True when backed by a live Redis connection at construction time.
    pub fn is_redis(&self) -> bool {
        matches!(self.backend, Backend::Redis(_))
    }

    /// Round-trips a PING; the memory backend is always healthy.
    pub async fn ping(&self) -> AppResult<()> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                redis::cmd("PING").query_async::<()>(&mut conn).await?;
                Ok(())
            }
            Backend::Memory(_) => Ok(()),
        }
    }

    // ── generic operations ────────────────────────────────────────────

    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.get(key).await?)
            }
            Backend::Memory(store) => {
                if let Some(entry) = store.kv.get(key) {
                    let (value, expiry) = entry.value().clone();
                    drop(entry);
                    if let Some(expiry) = expiry {
                        if Instant::now() >= expiry {
                            store.kv.remove(key);
                            return Ok(None);
                        }
                    }
                    return Ok(Some(value));
                }
                Ok(None)
            }
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
                Ok(())
            }
            Backend::Memory(store) => {
                let expiry = Instant::now() + Duration::from_secs(ttl_secs);
                store.kv.insert(key.to_string(), (value.to_string(), Some(expiry)));
                Ok(())
            }
        }
    }

    pub async fn del(&self, key: &str) -> AppResult<()> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.del::<_, ()>(key).await?;
                Ok(())
            }
            Backend::Memory(store) => {
                store.kv.remove(key);
                store.hashes.remove(key);
                store.sets.remove(key);
                store.lists.lock().await.remove(key);
                Ok(())
            }
        }
    }

    pub async fn hget(&self, key: &str, field: &str) -> AppResult<Option<String>> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.hget(key, field).await?)
            }
            Backend::Memory(store) => Ok(store.hashes.get(key).and_then(|h| h.get(field).cloned())),
        }
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> AppResult<()> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.hset::<_, _, _, ()>(key, field, value).await?;
                Ok(())
            }
            Backend::Memory(store) => {
                store
                    .hashes
                    .entry(key.to_string())
                    .or_default()
                    .insert(field.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    pub async fn hdel(&self, key: &str, field: &str) -> AppResult<()> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.hdel::<_, _, ()>(key, field).await?;
                Ok(())
            }
            Backend::Memory(store) => {
                if let Some(mut hash) = store.hashes.get_mut(key) {
                    hash.remove(field);
                }
                Ok(())
            }
        }
    }

    pub async fn sadd(&self, key: &str, member: &str) -> AppResult<()> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.sadd::<_, _, ()>(key, member).await?;
                Ok(())
            }
            Backend::Memory(store) => {
                store.sets.entry(key.to_string()).or_default().insert(member.to_string());
                Ok(())
            }
        }
    }

    pub async fn srem(&self, key: &str, member: &str) -> AppResult<()> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.srem::<_, _, ()>(key, member).await?;
                Ok(())
            }
            Backend::Memory(store) => {
                if let Some(mut set) = store.sets.get_mut(key) {
                    set.remove(member);
                }
                Ok(())
            }
        }
    }

    pub async fn smembers(&self, key: &str) -> AppResult<Vec<String>> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.smembers(key).await?)
            }
            Backend::Memory(store) => Ok(store
                .sets
                .get(key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()),
        }
    }

    pub async fn lpush(&self, key: &str, value: &str) -> AppResult<()> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.lpush::<_, _, ()>(key, value).await?;
                Ok(())
            }
            Backend::Memory(store) => {
                store
                    .lists
                    .lock()
                    .await
                    .entry(key.to_string())
                    .or_default()
                    .push_front(value.to_string());
                Ok(())
            }
        }
    }

    /// Pop from the tail of a list, blocking up to `timeout`. Returns
    /// `None` on timeout. The memory backend polls.
    pub async fn brpop(&self, key: &str, timeout: Duration) -> AppResult<Option<String>> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let popped: Option<(String, String)> = conn.brpop(key, timeout.as_secs_f64()).await?;
                Ok(popped.map(|(_, value)| value))
            }
            Backend::Memory(store) => {
                let deadline = Instant::now() + timeout;
                loop {
                    {
                        let mut lists = store.lists.lock().await;
                        if let Some(list) = lists.get_mut(key) {
                            if let Some(value) = list.pop_back() {
                                return Ok(Some(value));
                            }
                        }
                    }
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub async fn llen(&self, key: &str) -> AppResult<usize> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.llen(key).await?)
            }
            Backend::Memory(store) => Ok(store.lists.lock().await.get(key).map(VecDeque::len).unwrap_or(0)),
        }
    }

    // ── shipment details cache ────────────────────────────────────────

    pub async fn get_cached_shipment(&self, tracking_number: &str) -> Option<String> {
        match self.get(&format!("shipment:{}", tracking_number)).await {
            Ok(value) => {
                metrics::record_cache_lookup("shipment", value.is_some());
                value
            }
            Err(e) => {
                log::warn!("Cache read failed for {}: {}", tracking_number, e);
                None
            }
        }
    }

    pub async fn cache_shipment(&self, tracking_number: &str, details_json: &str) {
        if let Err(e) = self
            .set_ex(
                &format!("shipment:{}", tracking_number),
                details_json,
                config::cache_ttl::SHIPMENT_SECS,
            )
            .await
        {
            log::warn!("Failed to cache shipment {}: {}", tracking_number, e);
        }
    }

    /// Drops the cached details for a shipment. Pause and speed flags
    /// are control state, not cache, and survive invalidation.
    pub async fn invalidate_shipment(&self, tracking_number: &str) {
        if let Err(e) = self.del(&format!("shipment:{}", tracking_number)).await {
            log::warn!("Failed to invalidate cache for {}: {}", tracking_number, e);
        }
    }

    // ── simulation control flags ──────────────────────────────────────

    pub async fn is_paused(&self, tracking_number: &str) -> bool {
        matches!(
            self.hget("paused_simulations", tracking_number).await,
            Ok(Some(value)) if value == "true"
        )
    }

    pub async fn set_paused(&self, tracking_number: &str, paused: bool) -> AppResult<()> {
        if paused {
            self.hset("paused_simulations", tracking_number, "true").await
        } else {
            self.hdel("paused_simulations", tracking_number).await
        }
    }

    /// Current speed multiplier, clamped to the configured range.
    pub async fn speed_multiplier(&self, tracking_number: &str) -> f64 {
        let raw = self
            .hget("sim_speed_multipliers", tracking_number)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(1.0);
        raw.clamp(
            config::simulation::MIN_SPEED_MULTIPLIER,
            config::simulation::MAX_SPEED_MULTIPLIER,
        )
    }

    /// Stores a clamped speed multiplier and returns the stored value.
    pub async fn set_speed_multiplier(&self, tracking_number: &str, multiplier: f64) -> AppResult<f64> {
        let clamped = multiplier.clamp(
            config::simulation::MIN_SPEED_MULTIPLIER,
            config::simulation::MAX_SPEED_MULTIPLIER,
        );
        self.hset("sim_speed_multipliers", tracking_number, &clamped.to_string())
            .await?;
        Ok(clamped)
    }

    pub async fn clear_speed_multiplier(&self, tracking_number: &str) -> AppResult<()> {
        self.hdel("sim_speed_multipliers", tracking_number).await
    }

    // ── route templates ───────────────────────────────────────────────

    pub async fn cache_route_templates(&self, templates_json: &str) -> AppResult<()> {
        self.set_ex("route_templates", templates_json, config::cache_ttl::ROUTE_TEMPLATES_SECS)
            .await
    }

    pub async fn get_route_templates(&self) -> Option<String> {
        match self.get("route_templates").await {
            Ok(value) => {
                metrics::record_cache_lookup("route_templates", value.is_some());
                value
            }
            Err(e) => {
                log::warn!("Route template cache read failed: {}", e);
                None
            }
        }
    }

    // ── geocoding cache ───────────────────────────────────────────────

    pub async fn get_geocode(&self, location: &str) -> Option<String> {
        match self.get(&format!("geocode:{}", location)).await {
            Ok(value) => {
                metrics::record_cache_lookup("geocode", value.is_some());
                value
            }
            Err(_) => None,
        }
    }

    pub async fn set_geocode(&self, location: &str, coord_json: &str) {
        if let Err(e) = self
            .set_ex(&format!("geocode:{}", location), coord_json, config::cache_ttl::GEOCODE_SECS)
            .await
        {
            log::warn!("Failed to cache geocode result for {}: {}", location, e);
        }
    }

    // ── bot batch selection ───────────────────────────────────────────

    /// Toggles a tracking number in the chat's batch selection.
    /// Returns true when the number is now selected.
    pub async fn toggle_batch_selection(&self, chat_id: i64, tracking_number: &str) -> AppResult<bool> {
        let key = format!("batch:{}", chat_id);
        let selected = self.smembers(&key).await?;
        if selected.iter().any(|tn| tn == tracking_number) {
            self.srem(&key, tracking_number).await?;
            Ok(false)
        } else {
            self.sadd(&key, tracking_number).await?;
            Ok(true)
        }
    }

    pub async fn batch_selection(&self, chat_id: i64) -> AppResult<Vec<String>> {
        let mut members = self.smembers(&format!("batch:{}", chat_id)).await?;
        // Guard against junk that was selected before validation tightened
        members.retain(|tn| validation::sanitize_tracking_number(tn).is_some());
        members.sort();
        Ok(members)
    }

    pub async fn clear_batch_selection(&self, chat_id: i64) -> AppResult<()> {
        self.del(&format!("batch:{}", chat_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_kv_roundtrip_and_ttl() {
        let cache = ShipmentCache::in_memory();
        cache.set_ex("k", "v", 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        cache.del("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kv_expiry() {
        let cache = ShipmentCache::in_memory();
        cache.set_ex("k", "v", 1).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pause_flags() {
        let cache = ShipmentCache::in_memory();
        assert!(!cache.is_paused("TRK1").await);
        cache.set_paused("TRK1", true).await.unwrap();
        assert!(cache.is_paused("TRK1").await);
        cache.set_paused("TRK1", false).await.unwrap();
        assert!(!cache.is_paused("TRK1").await);
    }

    #[tokio::test]
    async fn test_speed_multiplier_clamped() {
        let cache = ShipmentCache::in_memory();
        assert_eq!(cache.speed_multiplier("TRK1").await, 1.0);
        assert_eq!(cache.set_speed_multiplier("TRK1", 50.0).await.unwrap(), 10.0);
        assert_eq!(cache.speed_multiplier("TRK1").await, 10.0);
        assert_eq!(cache.set_speed_multiplier("TRK1", 0.01).await.unwrap(), 0.1);
    }

    #[tokio::test]
    async fn test_invalidate_keeps_control_flags() {
        let cache = ShipmentCache::in_memory();
        cache.cache_shipment("TRK1", "{}").await;
        cache.set_paused("TRK1", true).await.unwrap();
        cache.invalidate_shipment("TRK1").await;
        assert_eq!(cache.get_cached_shipment("TRK1").await, None);
        assert!(cache.is_paused("TRK1").await);
    }

    #[tokio::test]
    async fn test_list_fifo() {
        let cache = ShipmentCache::in_memory();
        cache.lpush("q", "a").await.unwrap();
        cache.lpush("q", "b").await.unwrap();
        assert_eq!(cache.llen("q").await.unwrap(), 2);
        // LPUSH + BRPOP = FIFO
        assert_eq!(
            cache.brpop("q", Duration::from_millis(10)).await.unwrap(),
            Some("a".to_string())
        );
        assert_eq!(
            cache.brpop("q", Duration::from_millis(10)).await.unwrap(),
            Some("b".to_string())
        );
        assert_eq!(cache.brpop("q", Duration::from_millis(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_batch_selection_toggle() {
        let cache = ShipmentCache::in_memory();
        assert!(cache.toggle_batch_selection(7, "TRK1").await.unwrap());
        assert!(cache.toggle_batch_selection(7, "TRK2").await.unwrap());
        assert!(!cache.toggle_batch_selection(7, "TRK1").await.unwrap());
        assert_eq!(cache.batch_selection(7).await.unwrap(), vec!["TRK2".to_string()]);
        cache.clear_batch_selection(7).await.unwrap();
        assert!(cache.batch_selection(7).await.unwrap().is_empty());
    }
}
