//! Two-tier response cache
//!
//! The cache is consulted before any model dispatch:
//!
//! - **Exact tier**: hash-map lookup on the request fingerprint. Always
//!   preferred when both tiers could match.
//! - **Semantic tier**: linear scan over stored embeddings, returning the
//!   nearest entry within the configured cosine distance.
//!
//! Entries expire on a TTL and are dropped lazily: an expired entry is
//! treated as a miss the moment it is seen, whether or not eviction has
//! run. When the cache is full, the entry with the fewest hits goes first,
//! oldest on ties.

mod store;

pub use store::{CacheStore, CREATE_CACHE_ENTRIES_TABLE_SQL};

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CacheSettings;
use crate::fingerprint::{FingerprintHash, RequestFingerprint};

/// Cosine similarity between two vectors.
///
/// Mismatched lengths and zero-magnitude vectors yield 0.0 rather than an
/// error, which reads as "not similar" downstream.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

/// Cosine distance (1 - similarity), the metric the semantic tier ranks by
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// The response payload stored against a fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Generated text
    pub text: String,
    /// Model that produced the response
    pub model_name: String,
    /// Provider of that model
    pub provider: String,
    /// Input tokens the original dispatch consumed
    pub tokens_in: u32,
    /// Output tokens the original dispatch generated
    pub tokens_out: u32,
}

/// One cache slot: payload plus bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Exact-match key
    pub fingerprint: FingerprintHash,
    /// Stored response
    pub response: CachedResponse,
    /// Embedding for semantic matching, when one was available at insert
    pub embedding: Option<Vec<f32>>,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// When the entry stops being servable
    pub expires_at: DateTime<Utc>,
    /// How many lookups this entry has served
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Which tier produced a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Exact,
    Semantic,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::Exact => write!(f, "exact"),
            CacheTier::Semantic => write!(f, "semantic"),
        }
    }
}

/// A successful lookup
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The stored response
    pub response: CachedResponse,
    /// Tier that matched
    pub tier: CacheTier,
    /// Cosine distance of the match (0.0 for exact hits)
    pub distance: f32,
    /// Hit count after this lookup
    pub hit_count: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    lookups: AtomicU64,
    exact_hits: AtomicU64,
    semantic_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub lookups: u64,
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Entries currently resident, expired or not
    pub size: usize,
}

impl CacheStats {
    /// Hits across both tiers
    pub fn hits(&self) -> u64 {
        self.exact_hits + self.semantic_hits
    }

    /// Fraction of lookups served from cache
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        self.hits() as f64 / self.lookups as f64
    }
}

/// In-memory two-tier cache keyed by request fingerprint
#[derive(Debug)]
pub struct TieredCache {
    entries: RwLock<HashMap<FingerprintHash, CacheEntry>>,
    settings: CacheSettings,
    counters: CacheCounters,
}

impl TieredCache {
    /// Create a cache with the given settings
    pub fn new(settings: CacheSettings) -> Self {
        let mut settings = settings;
        settings.max_entries = settings.max_entries.max(1);
        Self {
            entries: RwLock::new(HashMap::new()),
            settings,
            counters: CacheCounters::default(),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Entries currently resident, expired or not
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a fingerprint, exact tier first.
    ///
    /// The semantic tier only runs when the fingerprint carries an
    /// embedding. A hit bumps the entry's hit count; an expired entry
    /// found on the exact path is removed on the spot.
    pub fn lookup(&self, fingerprint: &RequestFingerprint) -> Option<CacheHit> {
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        let hit = self.lookup_inner(fingerprint);
        if hit.is_none() {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    fn lookup_inner(&self, fingerprint: &RequestFingerprint) -> Option<CacheHit> {
        let now = Utc::now();
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(_) => return None,
        };

        // Exact tier
        if let Some(entry) = entries.get_mut(&fingerprint.hash) {
            if entry.is_expired_at(now) {
                entries.remove(&fingerprint.hash);
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            } else {
                entry.hit_count += 1;
                self.counters.exact_hits.fetch_add(1, Ordering::Relaxed);
                return Some(CacheHit {
                    response: entry.response.clone(),
                    tier: CacheTier::Exact,
                    distance: 0.0,
                    hit_count: entry.hit_count,
                });
            }
        }

        // Semantic tier
        let query = fingerprint.embedding.as_ref()?;
        let mut best: Option<(FingerprintHash, f32)> = None;
        for entry in entries.values() {
            if entry.is_expired_at(now) {
                continue;
            }
            let embedding = match entry.embedding.as_ref() {
                Some(embedding) => embedding,
                None => continue,
            };
            let distance = cosine_distance(query, embedding);
            if distance <= self.settings.max_distance {
                match best {
                    Some((_, best_distance)) if best_distance <= distance => {}
                    _ => best = Some((entry.fingerprint, distance)),
                }
            }
        }

        let (key, distance) = best?;
        let entry = entries.get_mut(&key)?;
        entry.hit_count += 1;
        self.counters.semantic_hits.fetch_add(1, Ordering::Relaxed);
        Some(CacheHit {
            response: entry.response.clone(),
            tier: CacheTier::Semantic,
            distance,
            hit_count: entry.hit_count,
        })
    }

    /// Insert a response under a fingerprint.
    ///
    /// The entry carries the fingerprint's embedding when present. An
    /// insert with an existing key replaces the old entry and resets its
    /// hit count.
    pub fn insert(&self, fingerprint: &RequestFingerprint, response: CachedResponse, ttl: Duration) {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(self.settings.ttl_secs as i64));
        let ttl = if ttl > chrono::Duration::zero() {
            ttl
        } else {
            chrono::Duration::milliseconds(1)
        };

        self.insert_entry(CacheEntry {
            fingerprint: fingerprint.hash,
            response,
            embedding: fingerprint.embedding.clone(),
            created_at: now,
            expires_at: now + ttl,
            hit_count: 0,
        });
    }

    /// Insert a fully-formed entry, evicting first if the cache is full.
    ///
    /// Used by the warm-load path to restore persisted entries with their
    /// original timestamps and hit counts.
    pub fn insert_entry(&self, entry: CacheEntry) {
        let now = Utc::now();
        if entry.is_expired_at(now) {
            return;
        }

        if let Ok(mut entries) = self.entries.write() {
            if !entries.contains_key(&entry.fingerprint)
                && entries.len() >= self.settings.max_entries
            {
                self.make_room_locked(&mut entries, now);
            }
            entries.insert(entry.fingerprint, entry);
        }
    }

    fn make_room_locked(&self, entries: &mut HashMap<FingerprintHash, CacheEntry>, now: DateTime<Utc>) {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        self.counters
            .expirations
            .fetch_add((before - entries.len()) as u64, Ordering::Relaxed);

        while entries.len() >= self.settings.max_entries {
            if pop_lowest_hit_locked(entries).is_none() {
                break;
            }
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove expired entries and trim the cache back to capacity.
    ///
    /// Returns the number of entries removed.
    pub fn evict(&self) -> usize {
        let now = Utc::now();
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(_) => return 0,
        };

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        self.counters
            .expirations
            .fetch_add((before - entries.len()) as u64, Ordering::Relaxed);

        while entries.len() > self.settings.max_entries {
            if pop_lowest_hit_locked(&mut entries).is_none() {
                break;
            }
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }

        before - entries.len()
    }

    /// Drop every entry
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Snapshot of counters and current size
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.counters.lookups.load(Ordering::Relaxed),
            exact_hits: self.counters.exact_hits.load(Ordering::Relaxed),
            semantic_hits: self.counters.semantic_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

fn pop_lowest_hit_locked(entries: &mut HashMap<FingerprintHash, CacheEntry>) -> Option<CacheEntry> {
    let victim_key = entries
        .values()
        .min_by(|a, b| {
            a.hit_count
                .cmp(&b.hit_count)
                .then_with(|| a.created_at.cmp(&b.created_at))
        })
        .map(|entry| entry.fingerprint)?;
    entries.remove(&victim_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(seed: u8) -> RequestFingerprint {
        RequestFingerprint {
            hash: [seed; 32],
            embedding: None,
        }
    }

    fn fingerprint_with_embedding(seed: u8, embedding: Vec<f32>) -> RequestFingerprint {
        RequestFingerprint {
            hash: [seed; 32],
            embedding: Some(embedding),
        }
    }

    fn response(text: &str) -> CachedResponse {
        CachedResponse {
            text: text.to_string(),
            model_name: "openai/gpt-4o-mini".to_string(),
            provider: "openai".to_string(),
            tokens_in: 10,
            tokens_out: 5,
        }
    }

    fn settings() -> CacheSettings {
        CacheSettings {
            max_entries: 100,
            ttl_secs: 60,
            max_distance: 0.05,
        }
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 0.001);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 0.001);

        // Length mismatch and zero vectors read as "not similar"
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_exact_hit_and_hit_count() {
        let cache = TieredCache::new(settings());
        cache.insert(&fingerprint(1), response("answer"), Duration::from_secs(60));

        let first = cache.lookup(&fingerprint(1)).unwrap();
        assert_eq!(first.tier, CacheTier::Exact);
        assert_eq!(first.distance, 0.0);
        assert_eq!(first.response.text, "answer");
        assert_eq!(first.hit_count, 1);

        let second = cache.lookup(&fingerprint(1)).unwrap();
        assert_eq!(second.hit_count, 2);
    }

    #[test]
    fn test_miss_on_absent_key() {
        let cache = TieredCache::new(settings());
        assert!(cache.lookup(&fingerprint(9)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.lookups, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits(), 0);
    }

    #[test]
    fn test_ttl_expiry_is_a_miss() {
        let cache = TieredCache::new(settings());
        cache.insert(&fingerprint(1), response("stale"), Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.lookup(&fingerprint(1)).is_none());
        // The expired entry was dropped on sight
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_semantic_hit_within_threshold() {
        let cache = TieredCache::new(settings());
        cache.insert(
            &fingerprint_with_embedding(1, vec![1.0, 0.0, 0.0]),
            response("cached"),
            Duration::from_secs(60),
        );

        // Distance ~0.005, inside the 0.05 threshold
        let near = fingerprint_with_embedding(2, vec![1.0, 0.1, 0.0]);
        let hit = cache.lookup(&near).unwrap();
        assert_eq!(hit.tier, CacheTier::Semantic);
        assert!(hit.distance > 0.0 && hit.distance <= 0.05);
        assert_eq!(hit.response.text, "cached");

        // Distance ~0.056, outside the threshold
        let far = fingerprint_with_embedding(3, vec![1.0, 0.35, 0.0]);
        assert!(cache.lookup(&far).is_none());
    }

    #[test]
    fn test_semantic_picks_nearest_candidate() {
        let cache = TieredCache::new(settings());
        cache.insert(
            &fingerprint_with_embedding(1, vec![1.0, 0.1, 0.0]),
            response("farther"),
            Duration::from_secs(60),
        );
        cache.insert(
            &fingerprint_with_embedding(2, vec![1.0, 0.02, 0.0]),
            response("nearer"),
            Duration::from_secs(60),
        );

        let hit = cache
            .lookup(&fingerprint_with_embedding(3, vec![1.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(hit.response.text, "nearer");
    }

    #[test]
    fn test_exact_tier_preferred_over_semantic() {
        let cache = TieredCache::new(settings());
        cache.insert(
            &fingerprint_with_embedding(1, vec![1.0, 0.0, 0.0]),
            response("exact"),
            Duration::from_secs(60),
        );
        cache.insert(
            &fingerprint_with_embedding(2, vec![1.0, 0.001, 0.0]),
            response("near-duplicate"),
            Duration::from_secs(60),
        );

        let hit = cache
            .lookup(&fingerprint_with_embedding(1, vec![1.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(hit.tier, CacheTier::Exact);
        assert_eq!(hit.response.text, "exact");
    }

    #[test]
    fn test_no_semantic_match_without_query_embedding() {
        let cache = TieredCache::new(settings());
        cache.insert(
            &fingerprint_with_embedding(1, vec![1.0, 0.0, 0.0]),
            response("cached"),
            Duration::from_secs(60),
        );

        // Same vector would match, but the query carries no embedding
        assert!(cache.lookup(&fingerprint(2)).is_none());
    }

    #[test]
    fn test_expired_entry_skipped_by_semantic_scan() {
        let cache = TieredCache::new(settings());
        cache.insert(
            &fingerprint_with_embedding(1, vec![1.0, 0.0, 0.0]),
            response("stale"),
            Duration::from_millis(20),
        );

        std::thread::sleep(Duration::from_millis(40));

        let query = fingerprint_with_embedding(2, vec![1.0, 0.0, 0.0]);
        assert!(cache.lookup(&query).is_none());
    }

    #[test]
    fn test_capacity_evicts_lowest_hit_count() {
        let cache = TieredCache::new(CacheSettings {
            max_entries: 2,
            ttl_secs: 60,
            max_distance: 0.05,
        });

        cache.insert(&fingerprint(1), response("popular"), Duration::from_secs(60));
        cache.insert(&fingerprint(2), response("unused"), Duration::from_secs(60));
        cache.lookup(&fingerprint(1));
        cache.lookup(&fingerprint(1));

        cache.insert(&fingerprint(3), response("newcomer"), Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&fingerprint(2)).is_none());
        assert!(cache.lookup(&fingerprint(1)).is_some());
        assert!(cache.lookup(&fingerprint(3)).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_tie_breaks_on_age() {
        let cache = TieredCache::new(CacheSettings {
            max_entries: 2,
            ttl_secs: 60,
            max_distance: 0.05,
        });
        let now = Utc::now();

        let older = CacheEntry {
            fingerprint: [1; 32],
            response: response("older"),
            embedding: None,
            created_at: now - chrono::Duration::seconds(10),
            expires_at: now + chrono::Duration::seconds(60),
            hit_count: 0,
        };
        let newer = CacheEntry {
            fingerprint: [2; 32],
            response: response("newer"),
            embedding: None,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(60),
            hit_count: 0,
        };
        cache.insert_entry(older);
        cache.insert_entry(newer);

        cache.insert(&fingerprint(3), response("newcomer"), Duration::from_secs(60));

        assert!(cache.lookup(&fingerprint(1)).is_none());
        assert!(cache.lookup(&fingerprint(2)).is_some());
    }

    #[test]
    fn test_expired_entries_freed_before_eviction() {
        let cache = TieredCache::new(CacheSettings {
            max_entries: 2,
            ttl_secs: 60,
            max_distance: 0.05,
        });

        cache.insert(&fingerprint(1), response("short-lived"), Duration::from_millis(20));
        cache.insert(&fingerprint(2), response("long-lived"), Duration::from_secs(60));
        cache.lookup(&fingerprint(2));

        std::thread::sleep(Duration::from_millis(40));

        // Room comes from the expired slot, not from evicting a live one
        cache.insert(&fingerprint(3), response("newcomer"), Duration::from_secs(60));
        assert!(cache.lookup(&fingerprint(2)).is_some());
        assert!(cache.lookup(&fingerprint(3)).is_some());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_evict_trims_to_capacity() {
        let cache = TieredCache::new(settings());
        for seed in 0..10u8 {
            cache.insert(&fingerprint(seed), response("r"), Duration::from_secs(60));
        }
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.evict(), 0);

        cache.insert(&fingerprint(11), response("r"), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.evict(), 1);
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = TieredCache::new(settings());
        cache.insert(&fingerprint(1), response("r"), Duration::from_secs(60));

        cache.lookup(&fingerprint(1));
        cache.lookup(&fingerprint(1));
        cache.lookup(&fingerprint(9));

        let stats = cache.stats();
        assert_eq!(stats.lookups, 3);
        assert_eq!(stats.exact_hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear() {
        let cache = TieredCache::new(settings());
        cache.insert(&fingerprint(1), response("r"), Duration::from_secs(60));
        cache.insert(&fingerprint(2), response("r"), Duration::from_secs(60));
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
