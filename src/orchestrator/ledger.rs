//! Newest-wins bookkeeping for published results.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::types::TargetKey;

/// Targets remembered by default before the least recent are forgotten.
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

/// Records, per pull request or pushed ref, the newest event sequence whose
/// result was published. A run older than that has been superseded.
#[derive(Debug)]
pub struct PublishLedger {
    capacity: usize,
    newest: Mutex<HashMap<TargetKey, u64>>,
}

impl Default for PublishLedger {
    fn default() -> Self {
        PublishLedger::new(DEFAULT_LEDGER_CAPACITY)
    }
}

impl PublishLedger {
    pub fn new(capacity: usize) -> Self {
        PublishLedger {
            capacity: capacity.max(1),
            newest: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TargetKey, u64>> {
        self.newest.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn newest(&self, target: &TargetKey) -> Option<u64> {
        self.lock().get(target).copied()
    }

    /// True if a newer event for `target` has already been published.
    pub fn is_superseded(&self, target: &TargetKey, sequence: u64) -> bool {
        self.newest(target).is_some_and(|newest| newest > sequence)
    }

    /// Records a publish. Never moves a target's sequence backwards.
    pub fn record(&self, target: TargetKey, sequence: u64) {
        let mut newest = self.lock();
        let entry = newest.entry(target).or_insert(sequence);
        *entry = (*entry).max(sequence);

        if newest.len() > self.capacity {
            // Sequences grow monotonically, so the smallest is the stalest.
            let stalest = newest
                .iter()
                .min_by_key(|(_, seq)| **seq)
                .map(|(k, _)| k.clone());
            if let Some(key) = stalest {
                newest.remove(&key);
            }
        }
    }
}
