use std::fmt;

use crate::contracts::error::StorageError;

/// Identifier of a test department (PCR, serology, microbiology, ...).
pub type DepartmentId = u32;

/// Identifier of the user asking for a code preview.
pub type RequesterId = u64;

/// The kind of counter a key addresses.
///
/// Sample and disease counters are lab-wide; unit counters are scoped to a
/// department. Disease counters are keyed by the lower-cased disease name,
/// so counts are global per disease per year.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CounterType {
    Sample,
    Unit,
    Disease(String),
}

impl CounterType {
    /// Builds the disease variant from a free-text disease name.
    pub fn disease(name: &str) -> Self {
        CounterType::Disease(name.trim().to_lowercase())
    }
}

impl fmt::Display for CounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterType::Sample => write!(f, "sample"),
            CounterType::Unit => write!(f, "unit"),
            CounterType::Disease(slug) => write!(f, "disease_{}", slug),
        }
    }
}

/// Addresses one counter: unique per (counter_type, scope, year).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub counter_type: CounterType,
    pub scope: Option<DepartmentId>,
    pub year: i32,
}

impl CounterKey {
    /// The lab-wide sample counter for a year.
    pub fn sample(year: i32) -> Self {
        Self {
            counter_type: CounterType::Sample,
            scope: None,
            year,
        }
    }

    /// A department's unit counter for a year.
    pub fn unit(department: DepartmentId, year: i32) -> Self {
        Self {
            counter_type: CounterType::Unit,
            scope: Some(department),
            year,
        }
    }

    /// The lab-wide report counter for a disease and year.
    pub fn disease(name: &str, year: i32) -> Self {
        Self {
            counter_type: CounterType::disease(name),
            scope: None,
            year,
        }
    }

    /// Stable string form used as the durable storage key.
    /// Format: {type}:{scope}:{year}, with "-" for the lab-wide scope.
    pub fn encode(&self) -> String {
        match self.scope {
            Some(department) => format!("{}:{}:{}", self.counter_type, department, self.year),
            None => format!("{}:-:{}", self.counter_type, self.year),
        }
    }
}

/// Durable store of current counter values.
///
/// # Invariants
/// - Unique per (counter_type, scope, year); created lazily, never deleted
/// - `current_value` is monotonically non-decreasing
/// - Mutations are atomic per key; one key's contention never blocks another
pub trait CounterStore: Send + Sync {
    /// Returns the current value, or None if the counter was never written.
    fn get(&self, key: &CounterKey) -> Result<Option<u64>, StorageError>;

    /// Atomically adds one, persists, and returns the new value.
    fn increment_and_commit(&self, key: &CounterKey) -> Result<u64, StorageError>;

    /// Raises the counter to `max(current, value)`, persists, and returns
    /// the resulting value. Never decreases the counter.
    fn force_to(&self, key: &CounterKey, value: u64) -> Result<u64, StorageError>;
}
