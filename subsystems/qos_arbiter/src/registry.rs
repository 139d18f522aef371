//! # Domain Registry
//!
//! Per-domain Sink bindings created lazily on the first write.
//!
//! ```text
//!   domain 0            domain 1                 domain N-1
//! ┌──────────────┐   ┌──────────────┐         ┌──────────────┐
//! │ min   (UAH)  │   │ min   (UAH)  │   ...   │ min   (UAH)  │
//! │ max   (UAH)  │   │ max   (UAH)  │         │ max   (UAH)  │
//! │ boost (raw)  │   │ boost (raw)  │         │ boost (raw)  │
//! └──────────────┘   └──────────────┘         └──────────────┘
//! ```
//!
//! The min and max bindings are ordinary owner registrations and are
//! handed to the arbiter's bookkeeping. The boost binding is private to the
//! boost session and never appears in the Constraint Store.
//!
//! Binding is all-or-nothing: a failure on any domain unregisters every
//! binding made so far, and the registry stays not-ready so a later caller
//! can retry.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::{Mutex, MutexGuard, RwLock};

use crate::error::{QosError, QosResult, SinkError};
use crate::sink::{ConstraintSink, SinkHandle};
use crate::types::{
    ConstraintHandle, ConstraintKind, DomainId, FREQ_QOS_MAX_DEFAULT_VALUE,
    FREQ_QOS_MIN_DEFAULT_VALUE,
};

/// Sink bindings of one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainBinding {
    /// Bound domain
    pub domain: DomainId,
    /// Administrative MIN registration
    pub min: ConstraintHandle,
    /// Administrative MAX registration
    pub max: ConstraintHandle,
    /// Boost-dedicated MAX binding
    pub boost: SinkHandle,
}

/// Last administrative values written per domain
struct DomainShadow {
    min: AtomicU32,
    max: AtomicU32,
}

impl DomainShadow {
    fn new() -> Self {
        Self {
            min: AtomicU32::new(FREQ_QOS_MIN_DEFAULT_VALUE as u32),
            max: AtomicU32::new(FREQ_QOS_MAX_DEFAULT_VALUE as u32),
        }
    }

    fn reset(&self) {
        self.min.store(FREQ_QOS_MIN_DEFAULT_VALUE as u32, Ordering::Relaxed);
        self.max.store(FREQ_QOS_MAX_DEFAULT_VALUE as u32, Ordering::Relaxed);
    }
}

/// Registry of per-domain bindings
pub struct DomainRegistry {
    nr_domains: usize,
    ready: AtomicBool,
    bind_lock: Mutex<()>,
    bindings: RwLock<Vec<DomainBinding>>,
    shadows: Vec<DomainShadow>,
}

impl DomainRegistry {
    /// Unbound registry for `nr_domains` domains
    pub fn new(nr_domains: usize) -> Self {
        Self {
            nr_domains,
            ready: AtomicBool::new(false),
            bind_lock: Mutex::new(()),
            bindings: RwLock::new(Vec::new()),
            shadows: (0..nr_domains).map(|_| DomainShadow::new()).collect(),
        }
    }

    /// Have all domains been bound?
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Number of domains
    pub fn nr_domains(&self) -> usize {
        self.nr_domains
    }

    /// Every configured domain, in order
    pub fn domains(&self) -> impl Iterator<Item = DomainId> {
        (0..self.nr_domains as u32).map(DomainId)
    }

    /// Reject domains outside the configured range
    pub fn check_domain(&self, domain: DomainId) -> QosResult<()> {
        if domain.index() < self.nr_domains {
            Ok(())
        } else {
            Err(QosError::InvalidDomain(domain))
        }
    }

    /// Bindings of one domain
    pub fn binding(&self, domain: DomainId) -> Option<DomainBinding> {
        self.bindings
            .read()
            .iter()
            .find(|b| b.domain == domain)
            .copied()
    }

    /// Copy of every binding
    pub fn bindings(&self) -> Vec<DomainBinding> {
        self.bindings.read().clone()
    }

    // -------------------------------------------------------------------------
    // Binding
    // -------------------------------------------------------------------------

    /// Serialize binding and unbinding
    pub(crate) fn lock_bind(&self) -> MutexGuard<'_, ()> {
        self.bind_lock.lock()
    }

    /// Register the three bindings of every domain
    ///
    /// On failure, every registration made by this call is removed again.
    /// Caller holds the bind lock.
    pub(crate) fn bind_all(&self, sink: &dyn ConstraintSink) -> QosResult<Vec<DomainBinding>> {
        let mut bound: Vec<SinkHandle> = Vec::with_capacity(self.nr_domains * 3);
        let mut bindings = Vec::with_capacity(self.nr_domains);

        for domain in self.domains() {
            match Self::bind_domain(sink, domain, &mut bound) {
                Ok(binding) => bindings.push(binding),
                Err(source) => {
                    log::error!(
                        "DomainRegistry: binding domain {} failed: {}, rolling back {} registration(s)",
                        domain,
                        source,
                        bound.len()
                    );
                    for handle in bound.iter().rev() {
                        if let Err(e) = sink.remove(*handle) {
                            log::warn!("DomainRegistry: rollback of {:?} failed: {}", handle, e);
                        }
                    }
                    self.reset_shadows();
                    return Err(QosError::SinkRegistrationFailed { domain, source });
                },
            }
        }

        Ok(bindings)
    }

    fn bind_domain(
        sink: &dyn ConstraintSink,
        domain: DomainId,
        bound: &mut Vec<SinkHandle>,
    ) -> Result<DomainBinding, SinkError> {
        let min = sink.register(domain, ConstraintKind::Min, FREQ_QOS_MIN_DEFAULT_VALUE)?;
        bound.push(min);
        let max = sink.register(domain, ConstraintKind::Max, FREQ_QOS_MAX_DEFAULT_VALUE)?;
        bound.push(max);
        let boost = sink.register(domain, ConstraintKind::Max, FREQ_QOS_MAX_DEFAULT_VALUE)?;
        bound.push(boost);

        Ok(DomainBinding {
            domain,
            min: ConstraintHandle::from_sink(min),
            max: ConstraintHandle::from_sink(max),
            boost,
        })
    }

    /// Install bindings and mark the registry ready
    pub(crate) fn publish(&self, bindings: Vec<DomainBinding>) {
        *self.bindings.write() = bindings;
        self.ready.store(true, Ordering::Release);
        log::info!("DomainRegistry: {} domain(s) bound", self.nr_domains);
    }

    /// Mark not-ready and hand back every binding
    pub(crate) fn take_bindings(&self) -> Vec<DomainBinding> {
        self.ready.store(false, Ordering::Release);
        self.reset_shadows();
        core::mem::take(&mut *self.bindings.write())
    }

    // -------------------------------------------------------------------------
    // Shadows
    // -------------------------------------------------------------------------

    /// Last administrative MIN written for `domain`
    pub fn min_shadow(&self, domain: DomainId) -> Option<u32> {
        self.shadows
            .get(domain.index())
            .map(|s| s.min.load(Ordering::Relaxed))
    }

    /// Last administrative MAX written for `domain`
    pub fn max_shadow(&self, domain: DomainId) -> Option<u32> {
        self.shadows
            .get(domain.index())
            .map(|s| s.max.load(Ordering::Relaxed))
    }

    pub(crate) fn set_min_shadow(&self, domain: DomainId, value: u32) {
        if let Some(shadow) = self.shadows.get(domain.index()) {
            shadow.min.store(value, Ordering::Relaxed);
        }
    }

    pub(crate) fn set_max_shadow(&self, domain: DomainId, value: u32) {
        if let Some(shadow) = self.shadows.get(domain.index()) {
            shadow.max.store(value, Ordering::Relaxed);
        }
    }

    fn reset_shadows(&self) {
        self.shadows.iter().for_each(DomainShadow::reset);
    }
}

impl core::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DomainRegistry")
            .field("nr_domains", &self.nr_domains)
            .field("ready", &self.is_ready())
            .field("bindings", &*self.bindings.read())
            .finish()
    }
}
