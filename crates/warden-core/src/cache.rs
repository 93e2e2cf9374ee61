use std::hash::{BuildHasher, Hash, RandomState};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::engine::CheckResult;
use crate::tuple::{ObjectRef, SubjectRef, Tuple};

const SHARDS: usize = 16;
const STRIPES: usize = 4096;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject: SubjectRef,
    pub permission: String,
    pub object: ObjectRef,
}

/// Generations observed before a check ran. An entry is only installed, and
/// later only served, while these still match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    epoch: u64,
    object_gen: u64,
    subject_gen: u64,
}

struct Entry {
    result: CheckResult,
    expires_at: Instant,
    stamp: Stamp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Sharded LRU of check results with per-entry TTL and striped generation
/// counters for write invalidation.
pub struct ResultCache {
    shards: Vec<Mutex<LruCache<CacheKey, Entry>>>,
    object_gens: Vec<AtomicU64>,
    subject_gens: Vec<AtomicU64>,
    epoch: AtomicU64,
    hasher: RandomState,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        let per_shard = NonZeroUsize::new(config.capacity.div_ceil(SHARDS))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..SHARDS)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
            object_gens: (0..STRIPES).map(|_| AtomicU64::new(0)).collect(),
            subject_gens: (0..STRIPES).map(|_| AtomicU64::new(0)).collect(),
            epoch: AtomicU64::new(0),
            hasher: RandomState::new(),
            ttl: config.ttl,
            enabled: config.capacity > 0 && !config.ttl.is_zero(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn index<K: Hash>(&self, key: &K, buckets: usize) -> usize {
        (self.hasher.hash_one(key) as usize) % buckets
    }

    fn object_stripe(&self, object_type: &str, object_id: &str) -> &AtomicU64 {
        &self.object_gens[self.index(&(object_type, object_id), STRIPES)]
    }

    fn subject_stripe(&self, subject_type: &str, subject_id: &str) -> &AtomicU64 {
        &self.subject_gens[self.index(&(subject_type, subject_id), STRIPES)]
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<LruCache<CacheKey, Entry>> {
        &self.shards[self.index(key, SHARDS)]
    }

    /// Must be taken before the check is evaluated.
    pub fn stamp(&self, key: &CacheKey) -> Stamp {
        Stamp {
            epoch: self.epoch.load(Ordering::Acquire),
            object_gen: self
                .object_stripe(&key.object.object_type, &key.object.object_id)
                .load(Ordering::Acquire),
            subject_gen: self
                .subject_stripe(key.subject.subject_type(), key.subject.subject_id())
                .load(Ordering::Acquire),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CheckResult> {
        if !self.enabled {
            return None;
        }
        let current = self.stamp(key);
        let mut shard = self.shard(key).lock();

        let fresh = match shard.get(key) {
            Some(entry) if entry.stamp == current && entry.expires_at > Instant::now() => {
                Some(entry.result.clone())
            }
            Some(_) => {
                shard.pop(key);
                None
            }
            None => None,
        };
        drop(shard);

        match fresh {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    subject = %key.subject,
                    permission = %key.permission,
                    object = %key.object,
                    "check cache hit"
                );
                Some(result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Installs `result` unless an invalidation happened since `stamp` was
    /// taken.
    pub fn insert(&self, key: CacheKey, stamp: Stamp, result: CheckResult) {
        if !self.enabled || self.stamp(&key) != stamp {
            return;
        }
        let entry = Entry {
            result,
            expires_at: Instant::now() + self.ttl,
            stamp,
        };
        self.shard(&key).lock().put(key, entry);
    }

    pub fn invalidate_object(&self, object: &ObjectRef) {
        self.object_stripe(&object.object_type, &object.object_id)
            .fetch_add(1, Ordering::AcqRel);
    }

    pub fn invalidate_subject(&self, subject: &SubjectRef) {
        self.subject_stripe(subject.subject_type(), subject.subject_id())
            .fetch_add(1, Ordering::AcqRel);
    }

    /// Invalidates the entries a tuple change directly affects: checks on its
    /// object and checks by its subject. Transitive dependents age out by TTL.
    pub fn invalidate_tuple(&self, tuple: &Tuple) {
        self.invalidate_object(&tuple.object);
        self.invalidate_subject(&tuple.subject);
    }

    /// Drops everything, e.g. on schema activation.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.shards.iter().map(|s| s.lock().len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Trace;

    fn key(subject: &str, permission: &str, object: &str) -> CacheKey {
        CacheKey {
            subject: subject.parse().unwrap(),
            permission: permission.to_string(),
            object: object.parse().unwrap(),
        }
    }

    fn allowed() -> CheckResult {
        CheckResult {
            allowed: true,
            trace: Some(Trace(vec!["doc:a#view".to_string()])),
        }
    }

    fn cache_with_ttl(ttl: Duration) -> ResultCache {
        ResultCache::new(&CacheConfig { capacity: 100, ttl })
    }

    #[test]
    fn miss_then_hit() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let k = key("user:bob", "view", "doc:a");

        assert!(cache.get(&k).is_none());
        let stamp = cache.stamp(&k);
        cache.insert(k.clone(), stamp, allowed());

        assert_eq!(cache.get(&k), Some(allowed()));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = cache_with_ttl(Duration::from_millis(20));
        let k = key("user:bob", "view", "doc:a");
        cache.insert(k.clone(), cache.stamp(&k), allowed());

        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get(&k).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn object_invalidation_hides_entry() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let k = key("user:bob", "view", "doc:a");
        cache.insert(k.clone(), cache.stamp(&k), allowed());

        cache.invalidate_object(&"doc:a".parse().unwrap());

        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn subject_invalidation_hides_entry() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let k = key("user:bob", "view", "doc:a");
        cache.insert(k.clone(), cache.stamp(&k), allowed());

        cache.invalidate_tuple(&"group:eng#member@user:bob".parse().unwrap());

        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn unrelated_invalidation_keeps_entry() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let k = key("user:bob", "view", "doc:a");
        cache.insert(k.clone(), cache.stamp(&k), allowed());

        // Stripes may collide, so only assert when these two do not.
        let other: ObjectRef = "doc:b".parse().unwrap();
        let a: ObjectRef = "doc:a".parse().unwrap();
        if cache.index(&(a.object_type.as_str(), a.object_id.as_str()), STRIPES)
            != cache.index(&(other.object_type.as_str(), other.object_id.as_str()), STRIPES)
        {
            cache.invalidate_object(&other);
            assert!(cache.get(&k).is_some());
        }
    }

    #[test]
    fn insert_after_racing_write_is_dropped() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let k = key("user:bob", "view", "doc:a");

        let stamp = cache.stamp(&k);
        // A write lands while the check is still evaluating.
        cache.invalidate_object(&k.object);
        cache.insert(k.clone(), stamp, allowed());

        assert!(cache.get(&k).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn clear_drops_everything() {
        let cache = cache_with_ttl(Duration::from_secs(5));
        let k = key("user:bob", "view", "doc:a");
        let stamp = cache.stamp(&k);
        cache.insert(k.clone(), stamp, allowed());

        cache.clear();
        cache.insert(k.clone(), stamp, allowed());

        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn zero_ttl_disables_cache() {
        let cache = cache_with_ttl(Duration::ZERO);
        let k = key("user:bob", "view", "doc:a");

        cache.insert(k.clone(), cache.stamp(&k), allowed());

        assert!(!cache.is_enabled());
        assert!(cache.get(&k).is_none());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn capacity_bounds_entries() {
        let cache = ResultCache::new(&CacheConfig {
            capacity: 16,
            ttl: Duration::from_secs(5),
        });

        for i in 0..200 {
            let k = key("user:bob", "view", &format!("doc:{i}"));
            cache.insert(k.clone(), cache.stamp(&k), allowed());
        }

        assert!(cache.stats().entries <= 16);
    }
}
