//! # Boost Session State
//!
//! Everything guarded by the session lock: the active flag, the backup list
//! of preempted MAX registrations, and the per-domain ceiling table.
//!
//! ```text
//!              activate()                     deactivate() / expiry
//!   Inactive ──────────────▶ Active ─────────────────────────────▶ Inactive
//!                             │  ▲
//!                             └──┘ activate(): refresh ceilings only
//! ```
//!
//! The transitions themselves (Sink pushes, store sweeps) live in
//! [`crate::arbiter`]; this module only holds data.

use alloc::vec;
use alloc::vec::Vec;
use core::time::Duration;

use crate::types::{
    BackupEntry, ConstraintHandle, DomainId, FreqValue, FREQ_QOS_MAX_DEFAULT_VALUE,
};

// =============================================================================
// BOOST DURATION
// =============================================================================

/// How long an activation should last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostDuration {
    /// The arbiter's configured default
    Default,
    /// An explicit number of milliseconds
    Millis(u32),
    /// No expiry; only an explicit deactivation ends the session
    UntilReleased,
}

impl BoostDuration {
    /// Decode the raw event payload: positive is explicit, zero is the
    /// default, negative means no timer
    pub const fn from_raw(raw: i32) -> Self {
        if raw > 0 {
            BoostDuration::Millis(raw as u32)
        } else if raw == 0 {
            BoostDuration::Default
        } else {
            BoostDuration::UntilReleased
        }
    }

    /// Concrete delay, or `None` when no timer should be armed
    pub fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            BoostDuration::Default => Some(default),
            BoostDuration::Millis(ms) => Some(Duration::from_millis(u64::from(ms))),
            BoostDuration::UntilReleased => None,
        }
    }
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Boost session singleton state
#[derive(Debug)]
pub struct SessionState {
    /// Is a session running?
    active: bool,
    /// Incremented on every Inactive -> Active transition
    generation: u64,
    /// Expiry delay armed for the current session
    armed: Option<Duration>,
    /// Preempted registrations, at most one per handle
    backups: Vec<BackupEntry>,
    /// Per-domain override ceilings
    ceilings: Vec<FreqValue>,
}

impl SessionState {
    /// Inactive session with every ceiling unconstrained
    pub fn new(nr_domains: usize) -> Self {
        Self {
            active: false,
            generation: 0,
            armed: None,
            backups: Vec::new(),
            ceilings: vec![FREQ_QOS_MAX_DEFAULT_VALUE; nr_domains],
        }
    }

    /// Is a session running?
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Generation of the current (or last) session
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Expiry delay of the current session
    pub fn armed(&self) -> Option<Duration> {
        self.armed
    }

    /// Enter the active state and return the new generation
    pub(crate) fn begin(&mut self, armed: Option<Duration>) -> u64 {
        self.active = true;
        self.generation += 1;
        self.armed = armed;
        self.generation
    }

    /// Leave the active state and hand back every parked entry
    pub(crate) fn end(&mut self) -> Vec<BackupEntry> {
        self.active = false;
        self.armed = None;
        core::mem::take(&mut self.backups)
    }

    // -------------------------------------------------------------------------
    // Backup list
    // -------------------------------------------------------------------------

    /// Park `entry`, overwriting the value of an existing entry for its handle
    pub fn upsert_backup(&mut self, entry: BackupEntry) {
        match self.backups.iter_mut().find(|b| b.handle == entry.handle) {
            Some(existing) => existing.value = entry.value,
            None => self.backups.push(entry),
        }
    }

    /// Drop the parked entry for `handle`
    pub fn remove_backup(&mut self, handle: ConstraintHandle) -> Option<BackupEntry> {
        let pos = self.backups.iter().position(|b| b.handle == handle)?;
        Some(self.backups.remove(pos))
    }

    /// Parked entry for `handle`
    pub fn backup(&self, handle: ConstraintHandle) -> Option<&BackupEntry> {
        self.backups.iter().find(|b| b.handle == handle)
    }

    /// Every parked entry
    pub fn backups(&self) -> &[BackupEntry] {
        &self.backups
    }

    // -------------------------------------------------------------------------
    // Ceiling table
    // -------------------------------------------------------------------------

    /// Ceiling for `domain`
    pub fn ceiling(&self, domain: DomainId) -> Option<FreqValue> {
        self.ceilings.get(domain.index()).copied()
    }

    /// Store a ceiling; returns whether the stored value changed
    pub fn set_ceiling(&mut self, domain: DomainId, value: FreqValue) -> bool {
        match self.ceilings.get_mut(domain.index()) {
            Some(slot) if *slot != value => {
                *slot = value;
                true
            },
            _ => false,
        }
    }

    /// Every ceiling, indexed by domain
    pub fn ceilings(&self) -> &[FreqValue] {
        &self.ceilings
    }
}
