//! Per-key async locks.
//!
//! Waiters on the same key are served in arrival order (tokio's mutex is
//! fair). A key's entry is removed once nobody holds or waits for it, so the
//! map only grows with the number of keys in use.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
struct Slot {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// Holders plus waiters, counted under the map lock.
    users: usize,
}

pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Slot>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        KeyedLocks {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        KeyedLocks::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Waits for exclusive access to `key`.
    ///
    /// Dropping the returned future before it resolves gives up the place in
    /// the queue and leaves no entry behind.
    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let mutex = {
            let mut slots = self.slots();
            let slot = slots.entry(key.clone()).or_default();
            slot.users += 1;
            slot.mutex.clone()
        };
        let ticket = Ticket { locks: self, key };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registered holder or waiter. Deregisters on drop.
struct Ticket<'a, K: Eq + Hash + Clone> {
    locks: &'a KeyedLocks<K>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for Ticket<'_, K> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

/// Exclusive access to one key; released on drop.
pub struct KeyGuard<'a, K: Eq + Hash + Clone> {
    // Field order matters: the mutex is released before the ticket.
    _guard: OwnedMutexGuard<()>,
    _ticket: Ticket<'a, K>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn entries_are_removed_when_released() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.lock("a").await;
            let _b = locks.lock("b").await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_is_exclusive_and_fifo() {
        let locks = Arc::new(KeyedLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.lock("k").await;
        let mut tasks = Vec::new();
        for i in 0..3 {
            let locks = locks.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("k").await;
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
            // Let the task enqueue before spawning the next.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(order.lock().unwrap().is_empty());
        drop(first);

        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_dropped_after_release_leaves_no_entry() {
        let locks = KeyedLocks::new();
        let held = locks.lock("k").await;

        let mut waiting = Box::pin(locks.lock("k"));
        let blocked = tokio::time::timeout(Duration::from_millis(10), waiting.as_mut()).await;
        assert!(blocked.is_err());

        // The holder goes first, then the queued waiter is abandoned without
        // ever being polled again.
        drop(held);
        assert_eq!(locks.len(), 1);
        drop(waiting);
        assert!(locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_waiter_leaves_no_entry() {
        let locks = KeyedLocks::new();
        let held = locks.lock("k").await;
        let late = tokio::time::timeout(Duration::from_secs(1), locks.lock("k")).await;
        assert!(late.is_err());
        drop(held);
        assert!(locks.is_empty());

        // The key is usable again afterwards.
        let _again = locks.lock("k").await;
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(1).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(2)).await;
        assert!(b.is_ok());
    }
}
