//! # Helix Frequency QoS Arbiter
//!
//! Arbitrates per-domain frequency constraints requested by several owner
//! subsystems, and runs an exclusive boost session that temporarily lifts
//! every non-exclusive ceiling.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          QOS ARBITER                                 │
//! │                                                                      │
//! │   owners (UAH, OMRG, CB, SBE)        triggers          admin text    │
//! │        │                                │                   │        │
//! │        ▼                                ▼                   ▼        │
//! │  ┌────────────┐   park / restore  ┌───────────┐     ┌────────────┐  │
//! │  │ Constraint │ ◀───────────────▶ │   Boost   │ ◀── │  Control   │  │
//! │  │   Store    │                   │  Session  │     │  Surface   │  │
//! │  └─────┬──────┘                   └─────┬─────┘     └────────────┘  │
//! │        │                                │ ceilings                   │
//! │        ▼                                ▼                            │
//! │  ┌──────────────────────────────────────────────────────────────┐   │
//! │  │            Domain Registry (min / max / boost bindings)       │   │
//! │  └──────────────────────────────┬───────────────────────────────┘   │
//! └─────────────────────────────────┼────────────────────────────────────┘
//!                                   ▼
//!                        ConstraintSink (policy layer)
//! ```
//!
//! ## Owners
//!
//! | Owner | Id | Preempted by boost |
//! |-------|----|--------------------|
//! | UAH   | 0  | yes |
//! | OMRG  | 1  | yes |
//! | CB    | 2  | yes |
//! | SBE   | 3  | no (exclusive) |
//!
//! ## Invariants
//!
//! 1. While no session is active, every live MAX registration has exactly one
//!    store record, and the backup list is empty.
//! 2. While a session is active, no non-exclusive MAX registration has a
//!    store record; each has exactly one backup entry instead.
//! 3. A handle is only accepted from the owner that registered it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use helix_qos_arbiter::{Arbiter, ArbiterConfig, BoostDuration, ConstraintKind, DomainId, Owner};
//!
//! let arbiter = Arbiter::with_thread_timer(ArbiterConfig::new(), sink)?;
//! let handle = arbiter.add_constraint(Owner::Cb, DomainId(0), ConstraintKind::Max, 0)?;
//! arbiter.update_constraint(Owner::Cb, handle, 1_800_000)?;
//!
//! arbiter.set_ceiling(DomainId(0), 2_400_000)?;
//! arbiter.activate(BoostDuration::Millis(8))?;
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

// =============================================================================
// EXTERNAL DEPENDENCIES
// =============================================================================

extern crate alloc;

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Core types: owners, domains, values, handles
pub mod types;

/// Error types
pub mod error;

/// Sink trait and in-memory policy layer
pub mod sink;

/// Priority-ordered MAX bookkeeping
pub mod store;

/// Per-domain bindings
pub mod registry;

/// Boost session state
pub mod session;

/// Deferred expiry execution
pub mod timer;

/// Boost trigger chain
pub mod notifier;

/// Configuration
pub mod config;

/// The arbiter
pub mod arbiter;

/// Administrative text surfaces
pub mod control;

/// Manual test commands
pub mod harness;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use arbiter::{Arbiter, ArbiterSnapshot};
pub use config::{ArbiterConfig, ConfigProvider, ConfigValue, MemoryConfig};
pub use control::{parse_domain_values, ControlSurface};
pub use error::{ErrorKind, QosError, QosResult, RestoreFailure, SinkError};
pub use harness::{HarnessEntry, QosTestHarness};
pub use notifier::{BoostEvent, BoostNotifier, NotifierId, NotifierPriority, NotifyResponse};
pub use registry::{DomainBinding, DomainRegistry};
pub use session::BoostDuration;
pub use sink::{ConstraintSink, PolicyConstraints, SinkHandle};
pub use store::ConstraintStore;
#[cfg(feature = "std")]
pub use timer::ThreadTimer;
pub use timer::{DeferredTimer, ManualTimer};
pub use types::{
    BackupEntry, ConstraintHandle, ConstraintKind, ConstraintRecord, DomainId, FreqValue, Owner,
    FREQ_QOS_MAX_DEFAULT_VALUE, FREQ_QOS_MIN_DEFAULT_VALUE, QOS_DEFAULT_VALUE,
};

// =============================================================================
// COMPILE-TIME CHECKS
// =============================================================================

static_assertions::const_assert!(config::DEFAULT_NR_DOMAINS <= config::MAX_NR_DOMAINS);
static_assertions::const_assert!(config::MAX_NR_DOMAINS <= u32::MAX as usize);
static_assertions::const_assert!(config::DEFAULT_BOOST_DURATION_MS > 0);
static_assertions::assert_eq_size!(ConstraintHandle, SinkHandle);
