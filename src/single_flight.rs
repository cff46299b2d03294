//! Keyed single-flight guard: concurrent callers for the same key share one execution.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

enum Slot<V> {
    Running,
    Done(V),
    /// Leader unwound before producing a value; a waiter takes over.
    Abandoned,
}

struct Flight<V> {
    slot: Mutex<Slot<V>>,
    ready: Condvar,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Running),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<V>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settle(&self, slot: Slot<V>) {
        *self.lock() = slot;
        self.ready.notify_all();
    }

    /// Blocks until the leader settles. `None` means the leader was abandoned.
    fn wait(&self) -> Option<V> {
        let mut slot = self.lock();
        loop {
            match &*slot {
                Slot::Running => {
                    slot = self
                        .ready
                        .wait(slot)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                Slot::Done(value) => return Some(value.clone()),
                Slot::Abandoned => return None,
            }
        }
    }
}

pub struct SingleFlight<K, V> {
    pending: Mutex<HashMap<K, Arc<Flight<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<K, Arc<Flight<V>>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.lock_pending().contains_key(key)
    }

    /// Runs `work` unless a call for `key` is already in flight, in which case
    /// this blocks and returns a clone of that call's result.
    pub fn run<F>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> V,
    {
        loop {
            let (flight, is_leader) = {
                let mut pending = self.lock_pending();
                match pending.get(&key) {
                    Some(existing) => (Arc::clone(existing), false),
                    None => {
                        let flight = Arc::new(Flight::new());
                        pending.insert(key.clone(), Arc::clone(&flight));
                        (flight, true)
                    }
                }
            };

            if is_leader {
                let mut guard = LeaderGuard {
                    owner: self,
                    key: &key,
                    flight: &flight,
                    settled: false,
                };
                let value = work();
                guard.finish(value.clone());
                return value;
            }

            if let Some(value) = flight.wait() {
                return value;
            }
        }
    }
}

struct LeaderGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    owner: &'a SingleFlight<K, V>,
    key: &'a K,
    flight: &'a Flight<V>,
    settled: bool,
}

impl<K, V> LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn finish(&mut self, value: V) {
        self.owner.lock_pending().remove(self.key);
        self.flight.settle(Slot::Done(value));
        self.settled = true;
    }
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.settled {
            self.owner.lock_pending().remove(self.key);
            self.flight.settle(Slot::Abandoned);
        }
    }
}
