//! Per-entity exclusive locks for the apply pipeline.
//!
//! Every pipeline acquires the keys of a batch in ascending [`LockKey`] order, so two
//! batches with overlapping entities can never wait on each other in a cycle.

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashSet};

/// Canonical order: all nodes by id, then all relationships, then orphan groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Node(u64),
    Relationship(u64),
    RelationshipGroup(u64),
}

pub trait LockService: Send + Sync {
    /// Blocks until `key` is exclusively held by the caller.
    fn acquire_exclusive(&self, key: LockKey);

    fn release_exclusive(&self, key: LockKey);
}

/// Lock table keyed by entity; waiters park on a shared condvar.
#[derive(Default)]
pub struct EntityLockService {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl EntityLockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, key: LockKey) -> bool {
        self.held.lock().contains(&key)
    }
}

impl LockService for EntityLockService {
    fn acquire_exclusive(&self, key: LockKey) {
        let mut held = self.held.lock();
        while held.contains(&key) {
            self.released.wait(&mut held);
        }
        held.insert(key);
    }

    fn release_exclusive(&self, key: LockKey) {
        let mut held = self.held.lock();
        held.remove(&key);
        self.released.notify_all();
    }
}

/// The locks held by one apply call. Released in reverse order, at the latest on drop.
pub struct LockGroup<'a> {
    service: &'a dyn LockService,
    held: Vec<LockKey>,
}

impl<'a> LockGroup<'a> {
    pub fn acquire(service: &'a dyn LockService, keys: BTreeSet<LockKey>) -> Self {
        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            service.acquire_exclusive(key);
            held.push(key);
        }
        LockGroup { service, held }
    }

    pub fn keys(&self) -> &[LockKey] {
        &self.held
    }

    pub fn release(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        while let Some(key) = self.held.pop() {
            self.service.release_exclusive(key);
        }
    }
}

impl Drop for LockGroup<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_canonical_order() {
        let mut keys = BTreeSet::new();
        keys.insert(LockKey::Relationship(1));
        keys.insert(LockKey::Node(7));
        keys.insert(LockKey::Node(2));
        let ordered: Vec<_> = keys.into_iter().collect();
        assert_eq!(
            ordered,
            vec![LockKey::Node(2), LockKey::Node(7), LockKey::Relationship(1)]
        );
    }

    #[test]
    fn test_group_releases_on_drop() {
        let service = EntityLockService::new();
        {
            let group = LockGroup::acquire(&service, [LockKey::Node(1)].into_iter().collect());
            assert_eq!(group.keys(), &[LockKey::Node(1)]);
            assert!(service.is_locked(LockKey::Node(1)));
        }
        assert!(!service.is_locked(LockKey::Node(1)));
    }

    #[test]
    fn test_second_acquirer_waits_for_release() {
        let service = Arc::new(EntityLockService::new());
        service.acquire_exclusive(LockKey::Node(3));

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let service = service.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                service.acquire_exclusive(LockKey::Node(3));
                acquired.store(true, Ordering::SeqCst);
                service.release_exclusive(LockKey::Node(3));
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        service.release_exclusive(LockKey::Node(3));
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_opposite_orders_do_not_deadlock() {
        let service = Arc::new(EntityLockService::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let keys: BTreeSet<_> = if i % 2 == 0 {
                            [LockKey::Node(1), LockKey::Node(2)].into_iter().collect()
                        } else {
                            [LockKey::Node(2), LockKey::Node(1)].into_iter().collect()
                        };
                        LockGroup::acquire(service.as_ref(), keys).release();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!service.is_locked(LockKey::Node(1)));
    }
}
