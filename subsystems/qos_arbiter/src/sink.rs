//! # Constraint Sinks
//!
//! A Sink is the enforcement mechanism that folds every registered bound of
//! one kind on one domain into the value actually applied to hardware. The
//! arbiter only ever talks to it through [`ConstraintSink`].
//!
//! [`PolicyConstraints`] is an in-memory Sink that keeps the tightest bound
//! per (domain, kind) and records every call it receives.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::error::SinkError;
use crate::types::{ConstraintKind, DomainId, FreqValue};

/// Result type for Sink calls
pub type SinkResult<T> = Result<T, SinkError>;

// =============================================================================
// SINK HANDLE
// =============================================================================

/// Identifier of one registration inside a Sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SinkHandle(u64);

impl SinkHandle {
    /// Create from a raw identifier
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

// =============================================================================
// SINK TRAIT
// =============================================================================

/// Per-domain bound aggregation, consumed by the arbiter
///
/// All calls are synchronous and bounded; the arbiter makes them while
/// holding its spinlocks.
pub trait ConstraintSink: Send + Sync {
    /// Register a new bound of `kind` on `domain` at `value`
    fn register(
        &self,
        domain: DomainId,
        kind: ConstraintKind,
        value: FreqValue,
    ) -> SinkResult<SinkHandle>;

    /// Change the value of an existing bound
    fn update(&self, handle: SinkHandle, value: FreqValue) -> SinkResult<()>;

    /// Drop an existing bound
    fn remove(&self, handle: SinkHandle) -> SinkResult<()>;
}

// =============================================================================
// POLICY CONSTRAINTS
// =============================================================================

/// A call observed by [`PolicyConstraints`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    /// `register`
    Register {
        handle: SinkHandle,
        domain: DomainId,
        kind: ConstraintKind,
        value: FreqValue,
    },
    /// `update`
    Update {
        handle: SinkHandle,
        domain: DomainId,
        value: FreqValue,
    },
    /// `remove`
    Remove { handle: SinkHandle, domain: DomainId },
}

#[derive(Debug, Clone, Copy)]
struct Request {
    domain: DomainId,
    kind: ConstraintKind,
    value: FreqValue,
}

#[derive(Default)]
struct PolicyState {
    requests: BTreeMap<SinkHandle, Request>,
    calls: Vec<SinkCall>,
    unavailable: BTreeSet<DomainId>,
    rejected: BTreeSet<SinkHandle>,
    register_budget: Option<usize>,
}

/// In-memory Sink with tightest-wins aggregation and a call log
pub struct PolicyConstraints {
    state: Mutex<PolicyState>,
    next_handle: AtomicU64,
}

impl PolicyConstraints {
    /// Create an empty Sink
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PolicyState::default()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Effective value for a domain: max of floors, min of ceilings
    pub fn effective(&self, domain: DomainId, kind: ConstraintKind) -> FreqValue {
        let state = self.state.lock();
        let values = state
            .requests
            .values()
            .filter(|r| r.domain == domain && r.kind == kind)
            .map(|r| r.value);
        let tightest = match kind {
            ConstraintKind::Min => values.max(),
            ConstraintKind::Max => values.min(),
        };
        tightest.unwrap_or(kind.default_value())
    }

    /// Current value of one registration
    pub fn value_of(&self, handle: SinkHandle) -> Option<FreqValue> {
        self.state.lock().requests.get(&handle).map(|r| r.value)
    }

    /// Number of live registrations
    pub fn registration_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Copy of the call log
    pub fn calls(&self) -> Vec<SinkCall> {
        self.state.lock().calls.clone()
    }

    /// Calls that touched `domain`
    pub fn calls_for(&self, domain: DomainId) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                SinkCall::Register { domain: d, .. }
                | SinkCall::Update { domain: d, .. }
                | SinkCall::Remove { domain: d, .. } => *d == domain,
            })
            .collect()
    }

    /// Forget the call log
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Make registrations on `domain` fail until [`restore_domain`](Self::restore_domain)
    pub fn fail_domain(&self, domain: DomainId) {
        self.state.lock().unavailable.insert(domain);
    }

    /// Undo [`fail_domain`](Self::fail_domain)
    pub fn restore_domain(&self, domain: DomainId) {
        self.state.lock().unavailable.remove(&domain);
    }

    /// Make updates to `handle` fail
    pub fn reject_updates(&self, handle: SinkHandle) {
        self.state.lock().rejected.insert(handle);
    }

    /// Allow at most `count` more successful registrations
    pub fn limit_registrations(&self, count: Option<usize>) {
        self.state.lock().register_budget = count;
    }
}

impl core::fmt::Debug for PolicyConstraints {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PolicyConstraints")
            .field("requests", &state.requests.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

impl Default for PolicyConstraints {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintSink for PolicyConstraints {
    fn register(
        &self,
        domain: DomainId,
        kind: ConstraintKind,
        value: FreqValue,
    ) -> SinkResult<SinkHandle> {
        let mut state = self.state.lock();
        if state.unavailable.contains(&domain) {
            return Err(SinkError::Unavailable);
        }
        if let Some(budget) = state.register_budget.as_mut() {
            if *budget == 0 {
                return Err(SinkError::Rejected);
            }
            *budget -= 1;
        }

        let handle = SinkHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        state.requests.insert(handle, Request {
            domain,
            kind,
            value,
        });
        state.calls.push(SinkCall::Register {
            handle,
            domain,
            kind,
            value,
        });
        Ok(handle)
    }

    fn update(&self, handle: SinkHandle, value: FreqValue) -> SinkResult<()> {
        let mut state = self.state.lock();
        if state.rejected.contains(&handle) {
            return Err(SinkError::Rejected);
        }
        let request = state
            .requests
            .get_mut(&handle)
            .ok_or(SinkError::UnknownHandle)?;
        request.value = value;
        let domain = request.domain;
        state.calls.push(SinkCall::Update {
            handle,
            domain,
            value,
        });
        Ok(())
    }

    fn remove(&self, handle: SinkHandle) -> SinkResult<()> {
        let mut state = self.state.lock();
        let request = state
            .requests
            .remove(&handle)
            .ok_or(SinkError::UnknownHandle)?;
        state.calls.push(SinkCall::Remove {
            handle,
            domain: request.domain,
        });
        Ok(())
    }
}
