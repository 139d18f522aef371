//! # Constraint Store
//!
//! Priority-ordered bookkeeping of active MAX registrations.
//!
//! Records are keyed by `(value, sequence)`: iteration is ascending by value
//! and first-in-first-out among equal values. The store is small (bounded by
//! owners x domains), so removal by handle is a linear scan.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::types::{ConstraintHandle, ConstraintRecord, FreqValue, Owner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct StoreKey {
    value: FreqValue,
    sequence: u64,
}

/// Ordered multiset of [`ConstraintRecord`]s
#[derive(Debug, Default)]
pub struct ConstraintStore {
    records: BTreeMap<StoreKey, ConstraintRecord>,
    next_sequence: u64,
}

impl ConstraintStore {
    /// Create an empty store
    pub const fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    /// Insert a record after every existing record of equal value
    pub fn insert(&mut self, record: ConstraintRecord) {
        let key = StoreKey {
            value: record.value,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.records.insert(key, record);
    }

    /// Remove the record registered under `handle`
    pub fn remove_by_handle(&mut self, handle: ConstraintHandle) -> Option<ConstraintRecord> {
        let key = self
            .records
            .iter()
            .find(|(_, rec)| rec.handle == handle)
            .map(|(key, _)| *key)?;
        self.records.remove(&key)
    }

    /// Find the record registered under `handle`
    pub fn get(&self, handle: ConstraintHandle) -> Option<&ConstraintRecord> {
        self.records.values().find(|rec| rec.handle == handle)
    }

    /// Lowest-value record whose owner is not `owner`
    pub fn tightest_excluding(&self, owner: Owner) -> Option<&ConstraintRecord> {
        self.records.values().find(|rec| rec.owner != owner)
    }

    /// Lowest-value record
    pub fn tightest(&self) -> Option<&ConstraintRecord> {
        self.records.values().next()
    }

    /// Remove and return every record matching `pred`, in store order
    pub fn drain_where<F>(&mut self, mut pred: F) -> Vec<ConstraintRecord>
    where
        F: FnMut(&ConstraintRecord) -> bool,
    {
        let keys: Vec<StoreKey> = self
            .records
            .iter()
            .filter(|(_, rec)| pred(rec))
            .map(|(key, _)| *key)
            .collect();

        keys.into_iter()
            .filter_map(|key| self.records.remove(&key))
            .collect()
    }

    /// Records in store order
    pub fn iter(&self) -> impl Iterator<Item = &ConstraintRecord> {
        self.records.values()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Is the store empty?
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
