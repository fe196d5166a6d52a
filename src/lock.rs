//! Per-`(space, partition, tag|edge-key)` memory lock table (spec §4.7,
//! §5, §9 "Shared resources").
//!
//! At most one in-flight modification per key (invariant 4). Acquiring
//! is non-blocking: a caller that finds the key already held gets
//! `Error::DataConflict` immediately rather than waiting — retries are
//! the client's responsibility, per §9. The table is sharded into
//! stripes to keep contention on unrelated keys independent, the same
//! motivation as the teacher's hand-rolled `spinlock`/`gate` primitives,
//! though here a sharded `Mutex<HashSet>` is enough since we only need
//! exclusive ownership, not a reader/writer split.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{Error, Result};

const STRIPES: usize = 64;

fn stripe_of(key: &[u8]) -> usize {
    let mut h: u64 = 1469598103934665603; // FNV-1a offset basis
    for &b in key {
        h ^= b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    (h as usize) % STRIPES
}

#[derive(Debug)]
pub struct LockTable {
    stripes: Vec<Mutex<HashSet<Vec<u8>>>>,
}

impl Default for LockTable {
    fn default() -> Self {
        LockTable::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        let mut stripes = Vec::with_capacity(STRIPES);
        for _ in 0..STRIPES {
            stripes.push(Mutex::new(HashSet::new()));
        }
        LockTable { stripes }
    }

    /// Tries to acquire the lock for `key`; returns `Error::DataConflict`
    /// immediately if it is already held (spec §4.7 "Contention returns
    /// `E_DATA_CONFLICT_ERROR` immediately, no retry inside the core").
    pub fn try_acquire<'a>(&'a self, key: Vec<u8>) -> Result<LockGuard<'a>> {
        let idx = stripe_of(&key);
        let mut stripe = self.stripes[idx].lock().unwrap();
        if stripe.contains(&key) {
            log::warn!("lock contention on key {} bytes, stripe {}", key.len(), idx);
            return Err(Error::DataConflict);
        }
        stripe.insert(key.clone());
        drop(stripe);
        Ok(LockGuard { table: self, idx, key: Some(key) })
    }
}

#[derive(Debug)]
pub struct LockGuard<'a> {
    table: &'a LockTable,
    idx: usize,
    key: Option<Vec<u8>>,
}

impl<'a> Drop for LockGuard<'a> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut stripe = self.table.stripes[self.idx].lock().unwrap();
            stripe.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_conflicts_while_first_held() {
        let _ = env_logger::try_init();
        let table = LockTable::new();
        let g1 = table.try_acquire(b"k".to_vec()).unwrap();
        assert_eq!(table.try_acquire(b"k".to_vec()).unwrap_err(), Error::DataConflict);
        drop(g1);
        assert!(table.try_acquire(b"k".to_vec()).is_ok());
    }

    #[test]
    fn unrelated_keys_never_conflict() {
        let table = LockTable::new();
        let _g1 = table.try_acquire(b"a".to_vec()).unwrap();
        assert!(table.try_acquire(b"b".to_vec()).is_ok());
    }
}
