use std::path::Path;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rocksdb::{Options, DB};

use crate::contracts::{CounterKey, CounterStore, LockResultExt, StorageError};

/// Key prefix for persisted counter values
const COUNTER_PREFIX: &str = "ctr";

/// RocksDB-backed counter store.
///
/// Each counter key owns a mutex held across the whole read-modify-write,
/// including the durable put, so lost updates cannot happen and contention
/// on one key never blocks another key. Values are recovered from the DB
/// the first time a key is touched after startup.
pub struct RocksDbCounterStore {
    db: DB,
    /// Per-key current values (lock-free concurrent map of per-key locks)
    counters: DashMap<CounterKey, Arc<Mutex<u64>>>,
}

impl RocksDbCounterStore {
    /// Opens or creates a counter store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path).map_err(|e| StorageError::RocksDb(e.to_string()))?;

        Ok(Self {
            db,
            counters: DashMap::new(),
        })
    }

    /// Creates the durable key for a counter.
    fn db_key(key: &CounterKey) -> String {
        format!("{}:{}", COUNTER_PREFIX, key.encode())
    }

    /// Parses a u64 from big-endian bytes.
    #[inline]
    fn parse_u64_be(bytes: &[u8]) -> Result<u64, StorageError> {
        bytes
            .try_into()
            .map(u64::from_be_bytes)
            .map_err(|_| StorageError::Serialization("Invalid u64 bytes".into()))
    }

    /// Gets a u64 value from the database by key.
    #[inline]
    fn get_u64(&self, key: &str) -> Result<Option<u64>, StorageError> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(Self::parse_u64_be(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::RocksDb(e.to_string())),
        }
    }

    /// Gets or creates the cell holding a counter's current value,
    /// recovering the persisted value on first touch.
    fn cell(&self, key: &CounterKey) -> Result<Arc<Mutex<u64>>, StorageError> {
        let entry = self.counters.entry(key.clone()).or_try_insert_with(|| {
            let current = self.get_u64(&Self::db_key(key))?.unwrap_or(0);
            Ok::<_, StorageError>(Arc::new(Mutex::new(current)))
        })?;

        Ok(Arc::clone(entry.value()))
    }

    fn persist(&self, key: &CounterKey, value: u64) -> Result<(), StorageError> {
        self.db
            .put(Self::db_key(key).as_bytes(), value.to_be_bytes())
            .map_err(|e| StorageError::RocksDb(e.to_string()))
    }
}

impl CounterStore for RocksDbCounterStore {
    fn get(&self, key: &CounterKey) -> Result<Option<u64>, StorageError> {
        if let Some(cell) = self.counters.get(key) {
            return Ok(Some(*cell.lock().map_lock_err()?));
        }
        self.get_u64(&Self::db_key(key))
    }

    fn increment_and_commit(&self, key: &CounterKey) -> Result<u64, StorageError> {
        let cell = self.cell(key)?;
        let mut current = cell.lock().map_lock_err()?;

        let next = current.checked_add(1).ok_or(StorageError::Overflow)?;
        // Persist before publishing; a failed put leaves the counter as-is.
        self.persist(key, next)?;
        *current = next;

        Ok(next)
    }

    fn force_to(&self, key: &CounterKey, value: u64) -> Result<u64, StorageError> {
        let cell = self.cell(key)?;
        let mut current = cell.lock().map_lock_err()?;

        if value > *current {
            self.persist(key, value)?;
            *current = value;
        }

        Ok(*current)
    }
}
