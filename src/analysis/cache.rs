//! Scoring result cache.
//!
//! [`CachedScorer`] wraps a scoring function and remembers its candidates per
//! (stage, path, fragment), so a redelivered or retried event does not pay for
//! scoring twice. Entries expire after a TTL; past capacity the least recently
//! used entry is evicted. Errors are never cached.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use super::scoring::{Candidate, Fragment, ScoringError, ScoringFunction};
use crate::types::StageKind;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Counters reported by [`CachedScorer::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

/// Anything that can report cache counters, for the stats endpoint.
pub trait CacheStatsSource: Send + Sync {
    fn cache_stats(&self) -> CacheStats;
}

struct CacheEntry {
    candidates: Vec<Candidate>,
    inserted_at: Instant,
}

pub struct CachedScorer<S> {
    inner: S,
    ttl: Duration,
    entries: Mutex<LruCache<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// SHA-256 over the stage, the path and every numbered line.
fn cache_key(stage: StageKind, fragment: &Fragment) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stage.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(fragment.path.as_bytes());
    hasher.update([0]);
    for line in &fragment.lines {
        hasher.update(line.line.to_be_bytes());
        hasher.update(line.content.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}

impl<S: ScoringFunction> CachedScorer<S> {
    pub fn new(inner: S) -> Self {
        CachedScorer::with_limits(inner, DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_limits(inner: S, ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        CachedScorer {
            inner,
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A fresh entry is promoted to most recently used; a stale one is
    /// dropped.
    fn lookup(&self, key: &str) -> Option<Vec<Candidate>> {
        let now = Instant::now();
        let mut entries = self.lock();
        let stale = entries
            .peek(key)
            .is_some_and(|e| now.duration_since(e.inserted_at) >= self.ttl);
        if stale {
            entries.pop(key);
        }
        let fresh = entries.get(key).map(|e| e.candidates.clone());
        drop(entries);

        match fresh {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        fresh
    }

    fn insert(&self, key: String, candidates: Vec<Candidate>) {
        self.lock().put(key, CacheEntry {
            candidates,
            inserted_at: Instant::now(),
        });
    }
}

impl<S: ScoringFunction> CacheStatsSource for CachedScorer<S> {
    fn cache_stats(&self) -> CacheStats {
        self.stats()
    }
}

impl<S: ScoringFunction> ScoringFunction for CachedScorer<S> {
    fn score(
        &self,
        stage: StageKind,
        fragment: &Fragment,
    ) -> impl Future<Output = Result<Vec<Candidate>, ScoringError>> + Send {
        let key = cache_key(stage, fragment);
        async move {
            if let Some(hit) = self.lookup(&key) {
                tracing::trace!(path = %fragment.path, %stage, "score cache hit");
                return Ok(hit);
            }
            let candidates = self.inner.score(stage, fragment).await?;
            self.insert(key, candidates.clone());
            Ok(candidates)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FailingScorer, ScriptedScorer, fragment};

    fn scorer() -> ScriptedScorer {
        ScriptedScorer::new().with_candidate(StageKind::Security, "a.py", 1, crate::types::Severity::High)
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit() {
        let cached = CachedScorer::new(scorer());
        let frag = fragment("a.py", &["eval(x)"]);

        let first = cached.score(StageKind::Security, &frag).await.unwrap();
        let second = cached.score(StageKind::Security, &frag).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cached.inner.calls().len(), 1);
        assert_eq!(cached.stats(), CacheStats {
            hits: 1,
            misses: 1,
            entries: 1,
            capacity: DEFAULT_CACHE_CAPACITY,
        });
    }

    #[tokio::test]
    async fn key_covers_stage_and_content() {
        let cached = CachedScorer::new(scorer());
        let frag = fragment("a.py", &["eval(x)"]);
        cached.score(StageKind::Security, &frag).await.unwrap();
        cached.score(StageKind::Quality, &frag).await.unwrap();
        cached
            .score(StageKind::Security, &fragment("a.py", &["eval(y)"]))
            .await
            .unwrap();

        assert_eq!(cached.inner.calls().len(), 3);
        assert_eq!(cached.stats().hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cached = CachedScorer::with_limits(scorer(), Duration::from_secs(60), 10);
        let frag = fragment("a.py", &["eval(x)"]);

        cached.score(StageKind::Security, &frag).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        cached.score(StageKind::Security, &frag).await.unwrap();

        assert_eq!(cached.inner.calls().len(), 2);
        assert_eq!(cached.stats().entries, 1);
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let cached = CachedScorer::with_limits(scorer(), DEFAULT_CACHE_TTL, 2);
        let a = fragment("a.py", &["a"]);
        let b = fragment("b.py", &["b"]);
        let c = fragment("c.py", &["c"]);

        cached.score(StageKind::Security, &a).await.unwrap();
        cached.score(StageKind::Security, &b).await.unwrap();
        // Touch a so b is the least recently used.
        cached.score(StageKind::Security, &a).await.unwrap();
        cached.score(StageKind::Security, &c).await.unwrap();
        assert_eq!(cached.stats().entries, 2);

        cached.score(StageKind::Security, &a).await.unwrap();
        cached.score(StageKind::Security, &b).await.unwrap();
        let paths: Vec<String> = cached.inner.calls().into_iter().map(|(_, p)| p).collect();
        assert_eq!(paths, vec!["a.py", "b.py", "c.py", "b.py"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_is_dropped_on_lookup() {
        let cached = CachedScorer::with_limits(scorer(), Duration::from_secs(60), 10);
        cached
            .score(StageKind::Security, &fragment("a.py", &["a"]))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(cached.lookup(&cache_key(StageKind::Security, &fragment("a.py", &["a"]))).is_none());
        assert_eq!(cached.stats().entries, 0);
    }

    #[test]
    fn zero_capacity_holds_one_entry() {
        let cached = CachedScorer::with_limits(scorer(), DEFAULT_CACHE_TTL, 0);
        assert_eq!(cached.stats().capacity, 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cached = CachedScorer::new(FailingScorer::new("model offline"));
        let frag = fragment("a.py", &["x"]);

        assert!(cached.score(StageKind::Quality, &frag).await.is_err());
        assert!(cached.score(StageKind::Quality, &frag).await.is_err());
        assert_eq!(cached.stats().entries, 0);
        assert_eq!(cached.stats().misses, 2);
    }
}
