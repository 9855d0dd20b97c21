//! A bounded, time-windowed "have we seen this?" set.
//!
//! Entries are remembered for a retention period and the set never holds more
//! than `capacity` entries. When it is full, expired entries go first, then the
//! least-recently-marked ones.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};

/// Default retention for seen keys (24 hours).
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Default maximum number of remembered keys.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug)]
struct Entry {
    marked_at: DateTime<Utc>,
    generation: u64,
}

#[derive(Debug)]
struct Inner<K> {
    entries: HashMap<K, Entry>,
    /// Keys in mark order. A key re-marked later appears again with a newer
    /// generation; older copies are skipped when they reach the front.
    order: VecDeque<(K, u64)>,
    next_generation: u64,
}

/// A bounded set of keys, each remembered for a fixed retention window.
///
/// All operations take a single lock, so [`DedupeWindow::check_and_mark`] is an
/// atomic test-and-set: when several callers race on the same key exactly one
/// of them sees `true`.
#[derive(Debug)]
pub struct DedupeWindow<K> {
    retention: TimeDelta,
    capacity: usize,
    inner: Mutex<Inner<K>>,
}

impl<K> DedupeWindow<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates a window. A capacity of zero is treated as one.
    pub fn new(retention: TimeDelta, capacity: usize) -> Self {
        DedupeWindow {
            retention,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_generation: 0,
            }),
        }
    }

    pub fn retention(&self) -> TimeDelta {
        self.retention
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        // Every mutation leaves the maps consistent, so a poisoned lock is safe to reuse.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_live(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        entry.marked_at + self.retention > now
    }

    /// Returns true if `key` was marked within the retention window.
    pub fn seen(&self, key: &K) -> bool {
        self.seen_at(key, Utc::now())
    }

    pub fn seen_at(&self, key: &K, now: DateTime<Utc>) -> bool {
        let inner = self.lock();
        inner
            .entries
            .get(key)
            .is_some_and(|entry| self.is_live(entry, now))
    }

    /// Records `key` as seen now, refreshing its position if already present.
    pub fn mark_seen(&self, key: K) {
        self.mark_seen_at(key, Utc::now());
    }

    pub fn mark_seen_at(&self, key: K, now: DateTime<Utc>) {
        let mut inner = self.lock();
        self.insert_locked(&mut inner, key, now);
    }

    /// Atomically checks and records `key`.
    ///
    /// Returns `true` if the key was not in the window and has now been marked,
    /// `false` if it was already present (a duplicate).
    pub fn check_and_mark(&self, key: K) -> bool {
        self.check_and_mark_at(key, Utc::now())
    }

    pub fn check_and_mark_at(&self, key: K, now: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        if inner
            .entries
            .get(&key)
            .is_some_and(|entry| self.is_live(entry, now))
        {
            return false;
        }
        self.insert_locked(&mut inner, key, now);
        true
    }

    /// Removes `key`, returning whether it was present.
    pub fn forget(&self, key: &K) -> bool {
        let mut inner = self.lock();
        // The stale copy in `order` is skipped once it reaches the front.
        inner.entries.remove(key).is_some()
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        self.prune_expired_at(Utc::now())
    }

    pub fn prune_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        self.prune_locked(&mut inner, now)
    }

    /// Number of entries currently held, including any not yet pruned.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_locked(&self, inner: &mut Inner<K>, key: K, now: DateTime<Utc>) {
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.entries.insert(
            key.clone(),
            Entry {
                marked_at: now,
                generation,
            },
        );
        inner.order.push_back((key, generation));

        self.prune_locked(inner, now);
        while inner.entries.len() > self.capacity {
            if pop_oldest(inner).is_none() {
                break;
            }
        }
        compact_order(inner);
    }

    fn prune_locked(&self, inner: &mut Inner<K>, now: DateTime<Utc>) -> usize {
        // Retention is uniform, so mark order is also expiry order.
        let mut removed = 0;
        while let Some((key, generation)) = inner.order.front() {
            match inner.entries.get(key) {
                Some(entry) if entry.generation == *generation => {
                    if self.is_live(entry, now) {
                        break;
                    }
                    let key = key.clone();
                    inner.entries.remove(&key);
                    inner.order.pop_front();
                    removed += 1;
                }
                _ => {
                    inner.order.pop_front();
                }
            }
        }
        removed
    }
}

/// Removes the least-recently-marked live entry.
fn pop_oldest<K: Eq + Hash + Clone>(inner: &mut Inner<K>) -> Option<K> {
    while let Some((key, generation)) = inner.order.pop_front() {
        if inner
            .entries
            .get(&key)
            .is_some_and(|entry| entry.generation == generation)
        {
            inner.entries.remove(&key);
            return Some(key);
        }
    }
    None
}

/// Drops stale copies from the order queue once they dominate it.
fn compact_order<K: Eq + Hash + Clone>(inner: &mut Inner<K>) {
    if inner.order.len() <= inner.entries.len() * 2 + 16 {
        return;
    }
    let entries = &inner.entries;
    inner.order.retain(|(key, generation)| {
        entries
            .get(key)
            .is_some_and(|entry| entry.generation == *generation)
    });
}
