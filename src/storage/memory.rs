use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::contracts::{CounterKey, CounterStore, LockResultExt, StorageError};

/// In-memory counter store.
///
/// Same per-key locking discipline as the RocksDB store, without the disk.
/// Meant for embedding the allocator in-process and for deterministic tests.
#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<CounterKey, Arc<Mutex<u64>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets or creates the cell holding a counter's current value.
    fn cell(&self, key: &CounterKey) -> Arc<Mutex<u64>> {
        Arc::clone(
            self.counters
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(0)))
                .value(),
        )
    }
}

impl CounterStore for InMemoryCounterStore {
    fn get(&self, key: &CounterKey) -> Result<Option<u64>, StorageError> {
        match self.counters.get(key) {
            Some(cell) => Ok(Some(*cell.lock().map_lock_err()?)),
            None => Ok(None),
        }
    }

    fn increment_and_commit(&self, key: &CounterKey) -> Result<u64, StorageError> {
        let cell = self.cell(key);
        let mut current = cell.lock().map_lock_err()?;
        let next = current.checked_add(1).ok_or(StorageError::Overflow)?;
        *current = next;
        Ok(next)
    }

    fn force_to(&self, key: &CounterKey, value: u64) -> Result<u64, StorageError> {
        let cell = self.cell(key);
        let mut current = cell.lock().map_lock_err()?;
        if value > *current {
            *current = value;
        }
        Ok(*current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_until_first_commit() {
        let store = InMemoryCounterStore::new();
        let key = CounterKey::sample(2025);

        assert_eq!(store.get(&key).unwrap(), None);
        store.increment_and_commit(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(1));
    }

    #[test]
    fn increments_are_sequential() {
        let store = InMemoryCounterStore::new();
        let key = CounterKey::sample(2025);

        for expected in 1..=10 {
            assert_eq!(store.increment_and_commit(&key).unwrap(), expected);
        }
    }

    #[test]
    fn force_to_never_decreases() {
        let store = InMemoryCounterStore::new();
        let key = CounterKey::sample(2025);

        assert_eq!(store.force_to(&key, 5).unwrap(), 5);
        assert_eq!(store.force_to(&key, 3).unwrap(), 5);
        assert_eq!(store.get(&key).unwrap(), Some(5));
        assert_eq!(store.increment_and_commit(&key).unwrap(), 6);
    }

    #[test]
    fn keys_are_isolated() {
        let store = InMemoryCounterStore::new();

        store.increment_and_commit(&CounterKey::unit(1, 2025)).unwrap();
        store.increment_and_commit(&CounterKey::unit(1, 2025)).unwrap();
        store.increment_and_commit(&CounterKey::unit(2, 2025)).unwrap();

        assert_eq!(store.get(&CounterKey::unit(1, 2025)).unwrap(), Some(2));
        assert_eq!(store.get(&CounterKey::unit(2, 2025)).unwrap(), Some(1));
        assert_eq!(store.get(&CounterKey::unit(1, 2024)).unwrap(), None);
    }
}
