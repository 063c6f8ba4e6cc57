//! The allocation service: preview, reserve, increment-and-commit.
//!
//! Reservations are transient process state. They let an operator see the
//! next sample code while the registration form is still open, without
//! burning the number if the form is abandoned. Nothing here is persisted;
//! only `commit` touches the counter store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Datelike, Duration, Utc};
use dashmap::DashMap;

use crate::codes;
use crate::contracts::{
    AllocError, Clock, CounterKey, CounterStore, DepartmentId, LockResultExt, RequesterId,
    StorageError, SystemClock,
};

/// Default reservation lifetime in seconds. A preview not committed within
/// this window releases its number for reuse.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 120;

/// A transient claim on the next counter value. Never persisted.
#[derive(Debug, Clone)]
struct Reservation {
    value: u64,
    created_at: DateTime<Utc>,
}

/// A department a unit counter can be scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Department {
    pub id: DepartmentId,
    pub code: String,
    pub name: String,
}

/// Per-department preview hint: the unit number the next created unit in
/// that department would take. Hints are not reservations.
#[derive(Debug, Clone)]
pub struct UnitHint {
    pub department_id: DepartmentId,
    pub department_code: String,
    pub department_name: String,
    pub next_unit_number: u64,
}

/// Result of a sample-code preview.
#[derive(Debug, Clone)]
pub struct CodePreview {
    pub sample_code: String,
    pub sample_number: u64,
    pub unit_hints: Vec<UnitHint>,
}

/// A committed, rendered code.
#[derive(Debug, Clone)]
pub struct AllocatedCode {
    pub code: String,
    pub value: u64,
}

/// Mints sample codes, unit codes and disease report numbers.
///
/// Owns the reservation cache and the department registry; all durable
/// state lives behind the injected [`CounterStore`], all time reads go
/// through the injected [`Clock`].
pub struct CodeAllocator<S, C = SystemClock> {
    store: Arc<S>,
    clock: C,
    ttl: Duration,
    /// Active reservations, grouped per counter key. The per-key entry
    /// guard serializes concurrent previews of the same counter; expiry is
    /// evaluated lazily whenever a key is read.
    reservations: DashMap<CounterKey, HashMap<RequesterId, Reservation>>,
    departments: RwLock<HashMap<DepartmentId, Department>>,
}

impl<S: CounterStore> CodeAllocator<S> {
    /// Creates an allocator on the wall clock with the default TTL.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: CounterStore, C: Clock> CodeAllocator<S, C> {
    /// Creates an allocator with an explicit clock.
    pub fn with_clock(store: Arc<S>, clock: C) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
            reservations: DashMap::new(),
            departments: RwLock::new(HashMap::new()),
        }
    }

    /// Overrides the reservation TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Registers a department so unit counters can be scoped to it.
    pub fn register_department(&self, department: Department) -> Result<(), StorageError> {
        self.departments
            .write()
            .map_lock_err()?
            .insert(department.id, department);
        Ok(())
    }

    /// All registered departments, ordered by id.
    pub fn departments(&self) -> Result<Vec<Department>, StorageError> {
        let departments = self.departments.read().map_lock_err()?;
        let mut list: Vec<Department> = departments.values().cloned().collect();
        list.sort_by_key(|d| d.id);
        Ok(list)
    }

    fn department(&self, id: DepartmentId) -> Result<Department, AllocError> {
        let departments = self.departments.read().map_lock_err()?;
        departments
            .get(&id)
            .cloned()
            .ok_or(AllocError::ScopeNotFound(id))
    }

    /// Rejects unknown scopes before any counter is created.
    fn check_scope(&self, key: &CounterKey) -> Result<(), AllocError> {
        if let Some(id) = key.scope {
            self.department(id)?;
        }
        Ok(())
    }

    fn is_expired(&self, reservation: &Reservation, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(reservation.created_at) > self.ttl
    }

    /// Reserves the next value of a counter for a requester.
    ///
    /// Repeat calls by the same requester inside the TTL refresh the
    /// reservation and return the same value unchanged. Other requesters
    /// are positioned past every active reservation on the same key, so
    /// concurrent previewers see consecutive, distinct tentative values.
    pub fn reserve_next(
        &self,
        requester: RequesterId,
        key: &CounterKey,
    ) -> Result<u64, AllocError> {
        self.check_scope(key)?;
        let now = self.clock.now();

        let mut held = self.reservations.entry(key.clone()).or_default();
        held.retain(|_, r| !self.is_expired(r, now));

        if let Some(existing) = held.get_mut(&requester) {
            existing.created_at = now;
            return Ok(existing.value);
        }

        let persisted = self.store.get(key)?.unwrap_or(0);
        let value = persisted
            .checked_add(1 + held.len() as u64)
            .ok_or(StorageError::Overflow)?;
        held.insert(
            requester,
            Reservation {
                value,
                created_at: now,
            },
        );

        Ok(value)
    }

    /// Commits a requester's reservation, or falls back to a fresh
    /// increment when none is active. An expired reservation is not an
    /// error; it simply falls through to the increment path.
    ///
    /// The counter is raised to the reserved value, never lowered: a late
    /// commit whose number was already passed leaves the counter where it
    /// is and still returns the reserved value.
    pub fn commit(&self, requester: RequesterId, key: &CounterKey) -> Result<u64, AllocError> {
        self.check_scope(key)?;
        let now = self.clock.now();

        if let Some(mut held) = self.reservations.get_mut(key) {
            held.retain(|_, r| !self.is_expired(r, now));
            if let Some(reservation) = held.get(&requester) {
                let value = reservation.value;
                // Persist before dropping the claim; a failed write keeps
                // the reservation so the caller's transaction can retry.
                self.store.force_to(key, value)?;
                held.remove(&requester);
                return Ok(value);
            }
        }

        Ok(self.store.increment_and_commit(key)?)
    }

    /// Drops every reservation older than the TTL across all keys and
    /// returns how many were dropped. Callers normally rely on the lazy
    /// per-key expiry; this is the periodic sweep for long-idle keys.
    pub fn expire_stale(&self) -> usize {
        let now = self.clock.now();
        let mut dropped = 0;

        self.reservations.retain(|_, held| {
            let before = held.len();
            held.retain(|_, r| !self.is_expired(r, now));
            dropped += before - held.len();
            !held.is_empty()
        });

        dropped
    }

    /// Number of unexpired reservations across all keys.
    pub fn active_reservations(&self) -> usize {
        let now = self.clock.now();
        self.reservations
            .iter()
            .map(|entry| {
                entry
                    .value()
                    .values()
                    .filter(|r| !self.is_expired(r, now))
                    .count()
            })
            .sum()
    }

    fn current_year(&self) -> i32 {
        self.clock.now().year()
    }

    /// Reserves the next sample code for a requester and reports, per
    /// registered department, the unit number the next created unit would
    /// take. Unit numbers are hints only; nothing is reserved for them.
    pub fn preview_codes(&self, requester: RequesterId) -> Result<CodePreview, AllocError> {
        let year = self.current_year();
        let number = self.reserve_next(requester, &CounterKey::sample(year))?;

        let mut unit_hints = Vec::new();
        for department in self.departments()? {
            let current = self.store.get(&CounterKey::unit(department.id, year))?.unwrap_or(0);
            unit_hints.push(UnitHint {
                department_id: department.id,
                department_code: department.code,
                department_name: department.name,
                next_unit_number: current + 1,
            });
        }

        Ok(CodePreview {
            sample_code: codes::sample_code(year, number),
            sample_number: number,
            unit_hints,
        })
    }

    /// Commits the requester's sample-code reservation (or a fresh
    /// increment) and renders the final code. Called at record-creation
    /// time, in the same transaction that persists the sample row.
    pub fn commit_sample_code(&self, requester: RequesterId) -> Result<AllocatedCode, AllocError> {
        let year = self.current_year();
        let value = self.commit(requester, &CounterKey::sample(year))?;
        Ok(AllocatedCode {
            code: codes::sample_code(year, value),
            value,
        })
    }

    /// Allocates the next unit code for a department. Unit codes are never
    /// previewed; they exist only once the unit row does.
    pub fn allocate_unit_code(
        &self,
        department_id: DepartmentId,
    ) -> Result<AllocatedCode, AllocError> {
        let department = self.department(department_id)?;
        let year = self.current_year();
        let value = self
            .store
            .increment_and_commit(&CounterKey::unit(department_id, year))?;
        Ok(AllocatedCode {
            code: codes::unit_code(&department.code, value),
            value,
        })
    }

    /// Allocates the next report number for a disease. Disease counters
    /// are lab-wide per year, independent of departments.
    pub fn allocate_report_number(&self, disease: &str) -> Result<AllocatedCode, AllocError> {
        let year = self.current_year();
        let value = self
            .store
            .increment_and_commit(&CounterKey::disease(disease, year))?;
        let prefix = codes::disease_prefix(disease);
        Ok(AllocatedCode {
            code: codes::report_number(&prefix, year, value),
            value,
        })
    }

    /// Allocates report numbers for every distinct disease in a COA
    /// payload. Duplicate names reuse the first allocation; numbers are
    /// assigned exactly once at COA creation and never re-derived.
    pub fn allocate_report_numbers(
        &self,
        diseases: &[String],
    ) -> Result<HashMap<String, String>, AllocError> {
        let mut numbers = HashMap::new();
        for disease in diseases {
            if numbers.contains_key(disease) {
                continue;
            }
            let allocated = self.allocate_report_number(disease)?;
            numbers.insert(disease.clone(), allocated.code);
        }
        Ok(numbers)
    }
}
