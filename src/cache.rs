use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use dashmap::DashMap;
use lru::LruCache;

use crate::{
    policy::ModelArtifact,
    rollout::Rollout,
    sim::CompiledEnv,
    spec::SpecHash,
};

// ================================================================================================
// TTL cache
// ================================================================================================

/// Concurrent string-keyed cache with per-entry expiry and a bounded size.
/// When full, the stalest entry makes room. Writes are idempotent; reads of
/// expired entries evict and miss.
#[derive(Debug)]
pub struct TtlCache<V> {
    maxsize: usize,
    ttl: Duration,
    entries: DashMap<String, (Instant, V)>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(maxsize: usize, ttl: Duration) -> Self {
        Self {
            maxsize: maxsize.max(1),
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.0.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.1.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        if self.entries.len() >= self.maxsize {
            self.evict_stalest();
        }
        self.entries.insert(key.into(), (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drops every entry whose key starts with `prefix`. List-query keys are
    /// built as `namespace/...`, so a mutation can sweep its namespace.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_stalest(&self) {
        let stalest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().0)
            .map(|entry| entry.key().clone());
        if let Some(key) = stalest {
            self.entries.remove(&key);
        }
    }
}

// ================================================================================================
// Cache namespaces
// ================================================================================================

/// The process-wide cache namespaces, one instance per [`crate::service::AppContext`].
///
/// - compiled environments: LRU, long-lived, keyed by sanitized-spec hash
/// - analyses: TTL ~10 min, keyed by `(function, args hash)`
/// - assets: long-lived, invalidated on mutation
/// - rollouts: TTL ~1 min, keyed by `(spec hash, policy, maxSteps, seed)`
/// - models: TTL ~1 h, keyed by model URL
#[derive(Debug)]
pub struct StudioCaches {
    envs: Mutex<LruCache<SpecHash, Arc<CompiledEnv>>>,
    analyses: TtlCache<serde_json::Value>,
    assets: DashMap<String, serde_json::Value>,
    rollouts: TtlCache<Arc<Rollout>>,
    models: TtlCache<Arc<ModelArtifact>>,
}

impl Default for StudioCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl StudioCaches {
    pub fn new() -> Self {
        Self {
            envs: Mutex::new(LruCache::new(
                NonZeroUsize::new(128).unwrap_or(NonZeroUsize::MIN),
            )),
            analyses: TtlCache::new(256, Duration::from_secs(600)),
            assets: DashMap::new(),
            rollouts: TtlCache::new(128, Duration::from_secs(60)),
            models: TtlCache::new(32, Duration::from_secs(3_600)),
        }
    }

    // === Compiled environments ===

    pub fn get_env(&self, hash: &SpecHash) -> Option<Arc<CompiledEnv>> {
        self.envs.lock().ok()?.get(hash).cloned()
    }

    pub fn set_env(&self, env: Arc<CompiledEnv>) {
        if let Ok(mut cache) = self.envs.lock() {
            cache.put(env.hash().clone(), env);
        }
    }

    // === Analyses ===

    pub fn analysis_key(function: &str, args_digest: &str) -> String {
        format!("{function}:{args_digest}")
    }

    pub fn get_analysis(&self, key: &str) -> Option<serde_json::Value> {
        self.analyses.get(key)
    }

    pub fn set_analysis(&self, key: impl Into<String>, value: serde_json::Value) {
        self.analyses.insert(key, value);
    }

    // === Assets ===

    pub fn get_asset(&self, asset_id: &str) -> Option<serde_json::Value> {
        self.assets.get(asset_id).map(|v| v.clone())
    }

    pub fn set_asset(&self, asset_id: impl Into<String>, asset: serde_json::Value) {
        self.assets.insert(asset_id.into(), asset);
    }

    /// Drops one asset plus every cached list query over assets, so reads
    /// after a mutation never see a stale value.
    pub fn invalidate_asset(&self, asset_id: &str) {
        self.assets.remove(asset_id);
        self.assets
            .retain(|key, _| !key.starts_with("assets/list"));
        self.analyses.invalidate_prefix("assets/");
    }

    // === Rollouts ===

    pub fn rollout_key(
        spec_hash: &SpecHash,
        policy: crate::policy::PolicyKind,
        max_steps: u32,
        seed: Option<u64>,
    ) -> String {
        match seed {
            Some(seed) => format!("{spec_hash}:{policy}:{max_steps}:{seed}"),
            None => format!("{spec_hash}:{policy}:{max_steps}:-"),
        }
    }

    pub fn get_rollout(&self, key: &str) -> Option<Arc<Rollout>> {
        self.rollouts.get(key)
    }

    pub fn set_rollout(&self, key: impl Into<String>, rollout: Arc<Rollout>) {
        self.rollouts.insert(key, rollout);
    }

    // === Models ===

    pub fn get_model(&self, url: &str) -> Option<Arc<ModelArtifact>> {
        self.models.get(url)
    }

    pub fn set_model(&self, url: impl Into<String>, model: Arc<ModelArtifact>) {
        self.models.insert(url, model);
    }

    pub fn clear_all(&self) {
        if let Ok(mut cache) = self.envs.lock() {
            cache.clear();
        }
        self.analyses.clear();
        self.assets.clear();
        self.rollouts.clear();
        self.models.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_cache_round_trips() {
        let cache: TtlCache<u32> = TtlCache::new(8, Duration::from_secs(60));
        cache.insert("k", 7);
        assert_eq!(cache.get("k"), Some(7));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn ttl_cache_expires_entries() {
        let cache: TtlCache<u32> = TtlCache::new(8, Duration::from_millis(5));
        cache.insert("k", 7);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_cache_evicts_stalest_when_full() {
        let cache: TtlCache<u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b", 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c", 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn writes_are_idempotent() {
        let cache: TtlCache<u32> = TtlCache::new(4, Duration::from_secs(60));
        cache.insert("k", 7);
        cache.insert("k", 7);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), Some(7));
    }

    #[test]
    fn prefix_invalidation_sweeps_a_namespace() {
        let cache: TtlCache<u32> = TtlCache::new(8, Duration::from_secs(60));
        cache.insert("assets/list:all", 1);
        cache.insert("assets/list:recent", 2);
        cache.insert("scenes/list:all", 3);
        cache.invalidate_prefix("assets/");
        assert_eq!(cache.get("assets/list:all"), None);
        assert_eq!(cache.get("assets/list:recent"), None);
        assert_eq!(cache.get("scenes/list:all"), Some(3));
    }

    #[test]
    fn asset_mutation_invalidates_reads() {
        let caches = StudioCaches::new();
        caches.set_asset("asset-1", serde_json::json!({"v": 1}));
        caches.invalidate_asset("asset-1");
        assert_eq!(caches.get_asset("asset-1"), None);
    }

    #[test]
    fn rollout_keys_distinguish_seeds() {
        let hash = SpecHash("abc".to_string());
        let with_seed =
            StudioCaches::rollout_key(&hash, crate::policy::PolicyKind::Random, 100, Some(1));
        let without =
            StudioCaches::rollout_key(&hash, crate::policy::PolicyKind::Random, 100, None);
        assert_ne!(with_seed, without);
    }
}
