//! # Core Types
//!
//! Owners, domains, constraint kinds and the frequency value conventions
//! shared by every component of the arbiter.

use core::fmt;

use crate::error::{QosError, QosResult};
use crate::sink::SinkHandle;

// =============================================================================
// FREQUENCY VALUES
// =============================================================================

/// A frequency bound in kHz. Signed so the "use default" sentinel fits.
pub type FreqValue = i32;

/// Default (unconstrained) value of a MIN constraint
pub const FREQ_QOS_MIN_DEFAULT_VALUE: FreqValue = 0;

/// Default (unconstrained) value of a MAX constraint
pub const FREQ_QOS_MAX_DEFAULT_VALUE: FreqValue = FreqValue::MAX;

/// Sentinel meaning "reset this constraint to its kind default"
pub const QOS_DEFAULT_VALUE: FreqValue = -1;

/// Check a caller-supplied value
///
/// Negative values are rejected unless they are the default sentinel.
pub fn validate_value(value: FreqValue) -> QosResult<()> {
    if value < 0 && value != QOS_DEFAULT_VALUE {
        return Err(QosError::InvalidValue(value));
    }
    Ok(())
}

// =============================================================================
// OWNER
// =============================================================================

/// Subsystems allowed to register constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum Owner {
    /// User-space administrative hint
    Uah  = 0,
    /// Memory/resource governor
    Omrg = 1,
    /// Core balancer
    Cb   = 2,
    /// Scene boost engine
    Sbe  = 3,
}

impl Owner {
    /// The one owner whose MAX bounds are never preempted by a boost session
    pub const EXCLUSIVE: Owner = Owner::Sbe;

    /// Every owner, in identifier order
    pub const ALL: [Owner; 4] = [Owner::Uah, Owner::Omrg, Owner::Cb, Owner::Sbe];

    /// Is this the exclusive owner?
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Owner::Sbe)
    }

    /// Short name used by the control surfaces
    pub const fn name(self) -> &'static str {
        match self {
            Owner::Uah => "UAH",
            Owner::Omrg => "OMRG",
            Owner::Cb => "CB",
            Owner::Sbe => "SBE",
        }
    }

    /// Look up an owner by short name
    pub fn from_name(name: &str) -> Option<Owner> {
        Owner::ALL.iter().copied().find(|o| o.name() == name)
    }
}

impl TryFrom<i32> for Owner {
    type Error = QosError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Owner::Uah),
            1 => Ok(Owner::Omrg),
            2 => Ok(Owner::Cb),
            3 => Ok(Owner::Sbe),
            _ => Err(QosError::InvalidOwner(raw)),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// DOMAIN
// =============================================================================

/// One independently controlled frequency domain (usually one CPU)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DomainId(pub u32);

impl DomainId {
    /// Index into per-domain tables
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// CONSTRAINT KIND
// =============================================================================

/// Which side of the frequency range a constraint bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// Floor
    Min,
    /// Ceiling
    Max,
}

impl ConstraintKind {
    /// Unconstrained value for this kind
    pub const fn default_value(self) -> FreqValue {
        match self {
            ConstraintKind::Min => FREQ_QOS_MIN_DEFAULT_VALUE,
            ConstraintKind::Max => FREQ_QOS_MAX_DEFAULT_VALUE,
        }
    }

    /// Replace the default sentinel with the kind default
    pub const fn resolve(self, value: FreqValue) -> FreqValue {
        if value == QOS_DEFAULT_VALUE {
            self.default_value()
        } else {
            value
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::Min => f.write_str("MIN"),
            ConstraintKind::Max => f.write_str("MAX"),
        }
    }
}

// =============================================================================
// CONSTRAINT HANDLE
// =============================================================================

/// Opaque reference to one (owner, domain, kind) registration
///
/// Produced by [`Arbiter::add_constraint`](crate::Arbiter::add_constraint)
/// and valid until the matching remove succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ConstraintHandle(SinkHandle);

impl ConstraintHandle {
    pub(crate) const fn from_sink(handle: SinkHandle) -> Self {
        Self(handle)
    }

    /// The Sink binding behind this handle
    pub const fn sink_handle(&self) -> SinkHandle {
        self.0
    }
}

impl fmt::Display for ConstraintHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0.raw())
    }
}

// =============================================================================
// BOOKKEEPING RECORDS
// =============================================================================

/// An active MAX registration held in the constraint store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintRecord {
    /// Registering owner
    pub owner: Owner,
    /// Registration handle
    pub handle: ConstraintHandle,
    /// Constrained domain
    pub domain: DomainId,
    /// Requested ceiling
    pub value: FreqValue,
}

/// A MAX registration parked while a boost session is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupEntry {
    /// Registering owner
    pub owner: Owner,
    /// Registration handle
    pub handle: ConstraintHandle,
    /// Constrained domain
    pub domain: DomainId,
    /// Constraint kind (always MAX today)
    pub kind: ConstraintKind,
    /// Value to restore once the session ends
    pub value: FreqValue,
}

impl BackupEntry {
    /// Park a store record
    pub fn from_record(record: &ConstraintRecord) -> Self {
        Self {
            owner: record.owner,
            handle: record.handle,
            domain: record.domain,
            kind: ConstraintKind::Max,
            value: record.value,
        }
    }

    /// Turn back into a store record
    pub fn to_record(&self) -> ConstraintRecord {
        ConstraintRecord {
            owner: self.owner,
            handle: self.handle,
            domain: self.domain,
            value: self.value,
        }
    }
}
