//! # Error Handling
//!
//! Errors returned synchronously by every arbiter entry point.
//!
//! | Kind | Retry | Raised by |
//! |------|-------|-----------|
//! | InvalidOwner | No | raw owner conversion |
//! | InvalidValue | No | add / update / ceilings |
//! | InvalidHandle | No | update / remove |
//! | InvalidDomain | No | add / ceilings |
//! | SinkRegistrationFailed | Yes | domain binding, add |
//! | NotFound | No | remove outside a boost session |
//! | Sink | No | Sink update / remove |
//! | RestoreFailed | No | deactivate |
//! | Malformed | No | text surfaces |

use alloc::vec::Vec;
use core::fmt;

use crate::types::{ConstraintHandle, DomainId, FreqValue};

// =============================================================================
// SINK ERROR
// =============================================================================

/// Failure reported by a Sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The Sink refused the value or the registration
    Rejected,
    /// The handle is not registered with the Sink
    UnknownHandle,
    /// The enforcement mechanism for the domain is not available yet
    Unavailable,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "request rejected by sink"),
            Self::UnknownHandle => write!(f, "handle unknown to sink"),
            Self::Unavailable => write!(f, "sink unavailable"),
        }
    }
}

// =============================================================================
// ERROR KIND
// =============================================================================

/// Fieldless classification of [`QosError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Owner outside the declared set
    InvalidOwner,
    /// Negative value other than the default sentinel
    InvalidValue,
    /// Handle unknown, removed, or registered for something else
    InvalidHandle,
    /// Domain outside the configured range
    InvalidDomain,
    /// Binding a domain to its Sink failed
    SinkRegistrationFailed,
    /// Removal found no bookkeeping outside a boost session
    NotFound,
    /// A Sink call failed
    Sink,
    /// One or more backups could not be reapplied
    RestoreFailed,
    /// Text input could not be parsed
    Malformed,
}

impl ErrorKind {
    /// Category name for diagnostics
    pub const fn category(&self) -> &'static str {
        match self {
            ErrorKind::InvalidOwner
            | ErrorKind::InvalidValue
            | ErrorKind::InvalidHandle
            | ErrorKind::InvalidDomain
            | ErrorKind::Malformed => "Argument",
            ErrorKind::NotFound => "Bookkeeping",
            ErrorKind::SinkRegistrationFailed | ErrorKind::Sink => "Sink",
            ErrorKind::RestoreFailed => "Session",
        }
    }

    /// Can the caller retry the same operation later?
    pub const fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::SinkRegistrationFailed)
    }
}

// =============================================================================
// QOS ERROR
// =============================================================================

/// A backup entry that could not be reapplied to its Sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreFailure {
    /// Registration that failed
    pub handle: ConstraintHandle,
    /// Value that was being restored
    pub value: FreqValue,
    /// Sink failure
    pub error: SinkError,
}

/// Arbiter error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QosError {
    /// Owner identifier outside the declared set
    InvalidOwner(i32),
    /// Negative value other than the default sentinel
    InvalidValue(FreqValue),
    /// Handle not live, or live for a different owner or kind
    InvalidHandle(ConstraintHandle),
    /// Domain outside the configured range
    InvalidDomain(DomainId),
    /// A Sink binding could not be created
    SinkRegistrationFailed {
        /// Domain being bound
        domain: DomainId,
        /// Sink failure
        source: SinkError,
    },
    /// Removal with no record while no boost session is active
    NotFound(ConstraintHandle),
    /// A Sink update or removal failed
    Sink(SinkError),
    /// Session restore finished with failures
    RestoreFailed(Vec<RestoreFailure>),
    /// Malformed text input
    Malformed(&'static str),
}

impl QosError {
    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            QosError::InvalidOwner(_) => ErrorKind::InvalidOwner,
            QosError::InvalidValue(_) => ErrorKind::InvalidValue,
            QosError::InvalidHandle(_) => ErrorKind::InvalidHandle,
            QosError::InvalidDomain(_) => ErrorKind::InvalidDomain,
            QosError::SinkRegistrationFailed { .. } => ErrorKind::SinkRegistrationFailed,
            QosError::NotFound(_) => ErrorKind::NotFound,
            QosError::Sink(_) => ErrorKind::Sink,
            QosError::RestoreFailed(_) => ErrorKind::RestoreFailed,
            QosError::Malformed(_) => ErrorKind::Malformed,
        }
    }

    /// Can the caller retry later?
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<SinkError> for QosError {
    fn from(error: SinkError) -> Self {
        QosError::Sink(error)
    }
}

impl fmt::Display for QosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind().category())?;
        match self {
            Self::InvalidOwner(raw) => write!(f, "invalid owner: {}", raw),
            Self::InvalidValue(value) => write!(f, "invalid value: {}", value),
            Self::InvalidHandle(handle) => write!(f, "invalid handle: {}", handle),
            Self::InvalidDomain(domain) => write!(f, "invalid domain: {}", domain),
            Self::SinkRegistrationFailed { domain, source } => {
                write!(f, "failed to bind domain {}: {}", domain, source)
            },
            Self::NotFound(handle) => write!(f, "no record for handle {}", handle),
            Self::Sink(error) => write!(f, "sink call failed: {}", error),
            Self::RestoreFailed(failures) => {
                write!(f, "{} backup(s) failed to restore", failures.len())
            },
            Self::Malformed(what) => write!(f, "malformed input: {}", what),
        }
    }
}

/// Result type for arbiter operations
pub type QosResult<T> = Result<T, QosError>;
