//! # QoS Arbiter
//!
//! Multi-owner frequency constraint arbitration with an exclusive boost
//! session.
//!
//! ## Locking
//!
//! ```text
//!   BindLock ──▶ StoreLock ──▶ SessionLock ──▶ bindings (leaf)
//!    (registry)   (records +     (flag, backups,
//!                  registrations) ceilings)
//! ```
//!
//! StoreLock and SessionLock are only ever held together through
//! [`ArbiterGuard`], which takes them in the order above. `set_ceiling`
//! takes SessionLock alone. Timer cancellation happens before any lock is
//! taken, because the expiry task takes the same locks.
//!
//! ## Boost session
//!
//! | Step | Activate | Deactivate / expiry |
//! |------|----------|---------------------|
//! | 1 | push ceilings to the boost bindings | reset boost bindings to default |
//! | 2 | park non-exclusive records, reset their Sink values | reapply backups, reinstate records |
//! | 3 | arm the expiry (first activation only) | clear the backup list |

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::ToString;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;

use spin::{Mutex, MutexGuard};

use crate::config::ArbiterConfig;
use crate::error::{QosError, QosResult, RestoreFailure};
use crate::notifier::{BoostEvent, BoostNotifier, NotifierId, NotifierPriority, NotifyResponse};
use crate::registry::DomainRegistry;
use crate::session::{BoostDuration, SessionState};
use crate::sink::ConstraintSink;
use crate::store::ConstraintStore;
use crate::timer::DeferredTimer;
use crate::types::{
    validate_value, BackupEntry, ConstraintHandle, ConstraintKind, ConstraintRecord, DomainId,
    FreqValue, Owner, FREQ_QOS_MAX_DEFAULT_VALUE,
};

// =============================================================================
// LOCKED STATE
// =============================================================================

/// What a handle was registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registration {
    owner: Owner,
    domain: DomainId,
    kind: ConstraintKind,
}

/// Data guarded by StoreLock
#[derive(Default)]
struct StoreState {
    records: ConstraintStore,
    registrations: BTreeMap<ConstraintHandle, Registration>,
}

impl StoreState {
    fn registration(&self, owner: Owner, handle: ConstraintHandle) -> QosResult<Registration> {
        match self.registrations.get(&handle) {
            Some(reg) if reg.owner == owner => Ok(*reg),
            _ => Err(QosError::InvalidHandle(handle)),
        }
    }
}

/// StoreLock and SessionLock, held together
pub(crate) struct ArbiterGuard<'a> {
    store: MutexGuard<'a, StoreState>,
    session: MutexGuard<'a, SessionState>,
}

impl ArbiterGuard<'_> {
    /// Book a MAX record in the store, or park it if a session preempts it
    fn track(&mut self, record: ConstraintRecord) {
        if self.session.is_active() && !record.owner.is_exclusive() {
            self.session.upsert_backup(BackupEntry::from_record(&record));
        } else {
            self.store.records.insert(record);
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Point-in-time copy of the arbiter's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterSnapshot {
    /// Is a boost session running?
    pub active: bool,
    /// Expiry delay armed for the running session
    pub expiry: Option<Duration>,
    /// Store records, tightest first
    pub records: Vec<ConstraintRecord>,
    /// Parked registrations
    pub backups: Vec<BackupEntry>,
    /// Per-domain ceilings
    pub ceilings: Vec<FreqValue>,
}

impl fmt::Display for ArbiterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=====QOS Boost: {} =====",
            if self.active { "active" } else { "inactive" }
        )?;
        if let Some(expiry) = self.expiry {
            writeln!(f, "QOS Boost Expiry: {} ms", expiry.as_millis())?;
        }
        writeln!(f, "=====QOS MAX List (Priority Order) =====")?;
        for rec in &self.records {
            writeln!(
                f,
                "QOS Owner: {}, Domain: {}, Handle: {}, Value: {}",
                rec.owner, rec.domain, rec.handle, rec.value
            )?;
        }
        writeln!(f, "=====QOS Backup List =====")?;
        for backup in &self.backups {
            writeln!(
                f,
                "QOS Owner: {}, Domain: {}, Value: {}, Type: {}",
                backup.owner, backup.domain, backup.value, backup.kind
            )?;
        }
        write!(f, "=====QOS Ceilings =====")?;
        for (domain, ceiling) in self.ceilings.iter().enumerate() {
            write!(f, " {}:{}", domain, ceiling)?;
        }
        writeln!(f)
    }
}

// =============================================================================
// ARBITER
// =============================================================================

/// Frequency QoS arbiter
///
/// One instance owns its bookkeeping, its boost session and its domain
/// bindings; independent instances never share state.
pub struct Arbiter {
    sink: Arc<dyn ConstraintSink>,
    timer: Arc<dyn DeferredTimer>,
    registry: DomainRegistry,
    store: Mutex<StoreState>,
    session: Mutex<SessionState>,
    default_duration_ms: AtomicU32,
    this: Weak<Arbiter>,
}

impl Arbiter {
    /// Create an arbiter over `sink`, expiring sessions through `timer`
    pub fn new(
        config: ArbiterConfig,
        sink: Arc<dyn ConstraintSink>,
        timer: Arc<dyn DeferredTimer>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            sink,
            timer,
            registry: DomainRegistry::new(config.nr_domains),
            store: Mutex::new(StoreState::default()),
            session: Mutex::new(SessionState::new(config.nr_domains)),
            default_duration_ms: AtomicU32::new(config.boost_duration_ms),
            this: this.clone(),
        })
    }

    /// Create an arbiter with its own timer thread
    #[cfg(feature = "std")]
    pub fn with_thread_timer(
        config: ArbiterConfig,
        sink: Arc<dyn ConstraintSink>,
    ) -> std::io::Result<Arc<Self>> {
        let timer = crate::timer::ThreadTimer::new()?;
        Ok(Self::new(config, sink, Arc::new(timer)))
    }

    /// Domain bindings and shadows
    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    fn lock(&self) -> ArbiterGuard<'_> {
        let store = self.store.lock();
        let session = self.session.lock();
        ArbiterGuard { store, session }
    }

    // -------------------------------------------------------------------------
    // Domain binding
    // -------------------------------------------------------------------------

    /// Bind every domain to the Sink, once
    ///
    /// Safe to call repeatedly; after a failure the next call retries.
    pub fn ensure_bound(&self) -> QosResult<()> {
        if self.registry.is_ready() {
            return Ok(());
        }
        let _bind = self.registry.lock_bind();
        if self.registry.is_ready() {
            return Ok(());
        }

        let bindings = self.registry.bind_all(self.sink.as_ref())?;
        {
            let mut guard = self.lock();
            for binding in &bindings {
                guard.store.registrations.insert(binding.min, Registration {
                    owner: Owner::Uah,
                    domain: binding.domain,
                    kind: ConstraintKind::Min,
                });
                guard.store.registrations.insert(binding.max, Registration {
                    owner: Owner::Uah,
                    domain: binding.domain,
                    kind: ConstraintKind::Max,
                });
                guard.track(ConstraintRecord {
                    owner: Owner::Uah,
                    handle: binding.max,
                    domain: binding.domain,
                    value: FREQ_QOS_MAX_DEFAULT_VALUE,
                });
            }
        }
        self.registry.publish(bindings);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Constraint lifecycle
    // -------------------------------------------------------------------------

    /// Register a new constraint for `owner`
    ///
    /// The Sink is armed at the kind default; `initial_value` is only
    /// validated. Follow up with [`update_constraint`](Self::update_constraint).
    pub fn add_constraint(
        &self,
        owner: Owner,
        domain: DomainId,
        kind: ConstraintKind,
        initial_value: FreqValue,
    ) -> QosResult<ConstraintHandle> {
        validate_value(initial_value)?;
        self.registry.check_domain(domain)?;
        self.ensure_bound()?;

        let default = kind.default_value();
        let handle = self
            .sink
            .register(domain, kind, default)
            .map(ConstraintHandle::from_sink)
            .map_err(|source| {
                log::error!(
                    "QosArbiter: {} {} registration on domain {} failed: {}",
                    owner,
                    kind,
                    domain,
                    source
                );
                QosError::SinkRegistrationFailed { domain, source }
            })?;

        let registration = Registration {
            owner,
            domain,
            kind,
        };
        match kind {
            ConstraintKind::Min => {
                self.store.lock().registrations.insert(handle, registration);
            },
            ConstraintKind::Max => {
                let mut guard = self.lock();
                guard.store.registrations.insert(handle, registration);
                guard.track(ConstraintRecord {
                    owner,
                    handle,
                    domain,
                    value: default,
                });
            },
        }

        log::debug!(
            "QosArbiter: {} added {} {} on domain {}",
            owner,
            kind,
            handle,
            domain
        );
        Ok(handle)
    }

    /// Change the value of a live constraint
    ///
    /// While a boost session runs, a non-exclusive MAX update only changes
    /// the value that will be restored.
    pub fn update_constraint(
        &self,
        owner: Owner,
        handle: ConstraintHandle,
        value: FreqValue,
    ) -> QosResult<()> {
        validate_value(value)?;
        let registration = self.store.lock().registration(owner, handle)?;

        if registration.kind == ConstraintKind::Min {
            let value = ConstraintKind::Min.resolve(value);
            self.sink.update(handle.sink_handle(), value)?;
            log::debug!("QosArbiter: {} MIN {} -> {}", owner, handle, value);
            return Ok(());
        }

        let value = ConstraintKind::Max.resolve(value);
        let mut guard = self.lock();
        guard.store.registration(owner, handle)?;

        if guard.session.is_active() && !owner.is_exclusive() {
            guard.store.records.remove_by_handle(handle);
            guard.session.upsert_backup(BackupEntry {
                owner,
                handle,
                domain: registration.domain,
                kind: ConstraintKind::Max,
                value,
            });
            log::debug!("BoostSession: parked {} MAX {} = {}", owner, handle, value);
            return Ok(());
        }

        self.sink.update(handle.sink_handle(), value).map_err(|e| {
            log::error!("QosArbiter: {} MAX {} update failed: {}", owner, handle, e);
            QosError::Sink(e)
        })?;
        guard.store.records.remove_by_handle(handle);
        guard.store.records.insert(ConstraintRecord {
            owner,
            handle,
            domain: registration.domain,
            value,
        });
        log::debug!("QosArbiter: {} MAX {} -> {}", owner, handle, value);
        Ok(())
    }

    /// Drop a live constraint
    ///
    /// A MAX removal with no bookkeeping outside a boost session fails with
    /// [`QosError::NotFound`] and leaves the registration in place.
    pub fn remove_constraint(&self, owner: Owner, handle: ConstraintHandle) -> QosResult<()> {
        let registration = self.store.lock().registration(owner, handle)?;

        if registration.kind == ConstraintKind::Max {
            let mut guard = self.lock();
            guard.store.registration(owner, handle)?;

            let active = guard.session.is_active();
            if active && !owner.is_exclusive() {
                guard.session.remove_backup(handle);
            }
            let found = guard.store.records.remove_by_handle(handle).is_some();
            if !found && !active {
                log::warn!("QosArbiter: {} MAX {} has no record", owner, handle);
                return Err(QosError::NotFound(handle));
            }
            guard.store.registrations.remove(&handle);
        } else {
            self.store.lock().registrations.remove(&handle);
        }

        self.sink.remove(handle.sink_handle())?;
        log::debug!("QosArbiter: {} removed {} {}", owner, registration.kind, handle);
        Ok(())
    }

    /// Tightest MAX value in the store, or the unconstrained default
    pub fn tightest_max(&self, excluding_exclusive_owner: bool) -> FreqValue {
        let store = self.store.lock();
        let record = if excluding_exclusive_owner {
            store.records.tightest_excluding(Owner::EXCLUSIVE)
        } else {
            store.records.tightest()
        };
        record.map_or(FREQ_QOS_MAX_DEFAULT_VALUE, |r| r.value)
    }

    // -------------------------------------------------------------------------
    // Boost session
    // -------------------------------------------------------------------------

    /// Is a boost session running?
    pub fn is_boost_active(&self) -> bool {
        self.session.lock().is_active()
    }

    /// Length used for [`BoostDuration::Default`]
    pub fn default_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.default_duration_ms.load(Ordering::Relaxed)))
    }

    /// Change the default boost length; only positive values are accepted
    pub fn set_default_duration(&self, ms: i32) -> bool {
        match u32::try_from(ms) {
            Ok(ms) if ms > 0 => {
                self.default_duration_ms.store(ms, Ordering::Relaxed);
                log::info!("BoostSession: default duration {} ms", ms);
                true
            },
            _ => false,
        }
    }

    /// Start a boost session, or refresh the ceilings of the running one
    ///
    /// A repeated activation never extends the running session's deadline.
    pub fn activate(&self, duration: BoostDuration) -> QosResult<()> {
        self.ensure_bound()?;
        let bindings = self.registry.bindings();
        let default = self.default_duration();

        let mut guard = self.lock();

        for binding in &bindings {
            let ceiling = guard
                .session
                .ceiling(binding.domain)
                .unwrap_or(FREQ_QOS_MAX_DEFAULT_VALUE);
            if let Err(e) = self.sink.update(binding.boost, ceiling) {
                log::warn!(
                    "BoostSession: ceiling {} on domain {} failed: {}",
                    ceiling,
                    binding.domain,
                    e
                );
            }
        }

        if guard.session.is_active() {
            log::debug!("BoostSession: already active, ceilings refreshed");
            return Ok(());
        }

        let swept = guard.store.records.drain_where(|r| !r.owner.is_exclusive());
        for record in &swept {
            if let Err(e) = self
                .sink
                .update(record.handle.sink_handle(), FREQ_QOS_MAX_DEFAULT_VALUE)
            {
                log::warn!("BoostSession: releasing {} failed: {}", record.handle, e);
            }
            guard.session.upsert_backup(BackupEntry::from_record(record));
        }

        let armed = duration.resolve(default);
        let generation = guard.session.begin(armed);
        log::info!(
            "BoostSession: activated (generation {}, {} backup(s), expiry {:?})",
            generation,
            swept.len(),
            armed
        );

        // Armed under SessionLock: no other generation can begin before the
        // timer holds this one's task.
        if let Some(delay) = armed {
            let this = self.this.clone();
            self.timer.arm(
                delay,
                Box::new(move || {
                    if let Some(arbiter) = this.upgrade() {
                        arbiter.expire(generation);
                    }
                }),
            );
        }
        Ok(())
    }

    /// End the boost session early
    ///
    /// Waits for a running expiry to finish, then restores every parked
    /// registration. A no-op when no session is active.
    pub fn deactivate(&self) -> QosResult<()> {
        self.timer.cancel_sync();
        self.restore(None)
    }

    fn expire(&self, generation: u64) {
        if let Err(e) = self.restore(Some(generation)) {
            log::error!("BoostSession: expiry restore: {}", e);
        }
    }

    fn restore(&self, generation: Option<u64>) -> QosResult<()> {
        let bindings = self.registry.bindings();
        let mut guard = self.lock();

        if !guard.session.is_active() {
            return Ok(());
        }
        if let Some(generation) = generation {
            if generation != guard.session.generation() {
                log::debug!("BoostSession: stale expiry {} ignored", generation);
                return Ok(());
            }
        }

        let backups = guard.session.end();
        for binding in &bindings {
            if let Err(e) = self.sink.update(binding.boost, FREQ_QOS_MAX_DEFAULT_VALUE) {
                log::error!(
                    "BoostSession: resetting boost on domain {} failed: {}",
                    binding.domain,
                    e
                );
            }
        }

        let mut failures = Vec::new();
        for entry in &backups {
            match self.sink.update(entry.handle.sink_handle(), entry.value) {
                Ok(()) => guard.store.records.insert(entry.to_record()),
                Err(error) => {
                    log::error!(
                        "BoostSession: restoring {} {} = {} failed: {}",
                        entry.owner,
                        entry.handle,
                        entry.value,
                        error
                    );
                    failures.push(RestoreFailure {
                        handle: entry.handle,
                        value: entry.value,
                        error,
                    });
                },
            }
        }

        log::info!(
            "BoostSession: deactivated ({} restored, {} failed)",
            backups.len() - failures.len(),
            failures.len()
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(QosError::RestoreFailed(failures))
        }
    }

    // -------------------------------------------------------------------------
    // Boost triggers
    // -------------------------------------------------------------------------

    /// Activation request from an external trigger; ignored before binding
    pub fn notify_activate(&self, duration: BoostDuration) -> QosResult<()> {
        if !self.registry.is_ready() {
            log::warn!("QosArbiter: activation ignored, domains not bound yet");
            return Ok(());
        }
        self.activate(duration)
    }

    /// Deactivation request from an external trigger; ignored before binding
    pub fn notify_deactivate(&self) -> QosResult<()> {
        if !self.registry.is_ready() {
            log::warn!("QosArbiter: deactivation ignored, domains not bound yet");
            return Ok(());
        }
        self.deactivate()
    }

    fn handle_event(&self, event: &BoostEvent) -> NotifyResponse {
        if !self.registry.is_ready() {
            log::warn!("QosArbiter: {:?} before binding, ignored", event);
            return NotifyResponse::Ignored;
        }
        let result = match event {
            BoostEvent::Activate(duration) => self.activate(*duration),
            BoostEvent::Deactivate => self.deactivate(),
            BoostEvent::QtqActivate | BoostEvent::QtqDeactivate => {
                return NotifyResponse::Ignored;
            },
        };
        match result {
            Ok(()) => NotifyResponse::Handled,
            Err(e) => NotifyResponse::Error(e.to_string()),
        }
    }

    /// Drive this arbiter from `notifier`
    pub fn subscribe_to(&self, notifier: &BoostNotifier) -> NotifierId {
        let this = self.this.clone();
        notifier.subscribe(
            "qos_arbiter",
            NotifierPriority::NORMAL,
            Box::new(move |event| match this.upgrade() {
                Some(arbiter) => arbiter.handle_event(event),
                None => NotifyResponse::Ignored,
            }),
        )
    }

    // -------------------------------------------------------------------------
    // Ceilings
    // -------------------------------------------------------------------------

    /// Set the boost ceiling of one domain
    ///
    /// Pushed to the boost binding at once while a session is active.
    pub fn set_ceiling(&self, domain: DomainId, value: FreqValue) -> QosResult<()> {
        self.registry.check_domain(domain)?;
        if value < 0 {
            return Err(QosError::InvalidValue(value));
        }
        let boost = self.registry.binding(domain).map(|b| b.boost);

        let mut session = self.session.lock();
        session.set_ceiling(domain, value);
        if session.is_active() {
            if let Some(boost) = boost {
                self.sink.update(boost, value)?;
            }
        }
        Ok(())
    }

    /// Set several ceilings; only changed domains are pushed
    pub fn set_ceilings(&self, values: &[(DomainId, FreqValue)]) -> QosResult<()> {
        for &(domain, value) in values {
            self.registry.check_domain(domain)?;
            if value < 0 {
                return Err(QosError::InvalidValue(value));
            }
        }
        let bindings = self.registry.bindings();

        let mut session = self.session.lock();
        let changed: Vec<(DomainId, FreqValue)> = values
            .iter()
            .copied()
            .filter(|&(domain, value)| session.set_ceiling(domain, value))
            .collect();

        if !session.is_active() {
            return Ok(());
        }
        for (domain, value) in changed {
            let Some(binding) = bindings.iter().find(|b| b.domain == domain) else {
                continue;
            };
            if let Err(e) = self.sink.update(binding.boost, value) {
                log::warn!("BoostSession: ceiling {} on domain {} failed: {}", value, domain, e);
            }
        }
        Ok(())
    }

    /// Copy of the ceiling table
    pub fn ceilings(&self) -> Vec<FreqValue> {
        self.session.lock().ceilings().to_vec()
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Copy of the bookkeeping
    pub fn snapshot(&self) -> ArbiterSnapshot {
        let guard = self.lock();
        ArbiterSnapshot {
            active: guard.session.is_active(),
            expiry: guard.session.armed(),
            records: guard.store.records.iter().copied().collect(),
            backups: guard.session.backups().to_vec(),
            ceilings: guard.session.ceilings().to_vec(),
        }
    }

    /// Log the bookkeeping
    pub fn dump(&self) {
        let snapshot = self.snapshot();
        for line in snapshot.to_string().lines() {
            log::info!("{}", line);
        }
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// End any session, clear the store and unbind every domain
    ///
    /// Restore errors are returned after teardown has completed.
    pub fn shutdown(&self) -> QosResult<()> {
        self.timer.cancel_sync();
        let restored = self.restore(None);

        let _bind = self.registry.lock_bind();
        let bindings = self.registry.take_bindings();
        {
            let mut store = self.store.lock();
            store.records.clear();
            for binding in &bindings {
                store.registrations.remove(&binding.min);
                store.registrations.remove(&binding.max);
            }
        }
        for binding in &bindings {
            for handle in [binding.min.sink_handle(), binding.max.sink_handle(), binding.boost] {
                if let Err(e) = self.sink.remove(handle) {
                    log::warn!("QosArbiter: unbinding {:?} failed: {}", handle, e);
                }
            }
        }

        log::info!("QosArbiter: shut down, {} domain(s) unbound", bindings.len());
        restored
    }
}

impl fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.lock();
        f.debug_struct("Arbiter")
            .field("nr_domains", &self.registry.nr_domains())
            .field("bound", &self.registry.is_ready())
            .field("records", &guard.store.records.len())
            .field("boost_active", &guard.session.is_active())
            .field("default_duration", &self.default_duration())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, SinkError};
    use crate::sink::{PolicyConstraints, SinkCall};
    use crate::timer::ManualTimer;

    struct Fixture {
        sink: Arc<PolicyConstraints>,
        timer: Arc<ManualTimer>,
        arbiter: Arc<Arbiter>,
    }

    fn fixture(nr_domains: usize) -> Fixture {
        let sink = Arc::new(PolicyConstraints::new());
        let timer = Arc::new(ManualTimer::new());
        let arbiter = Arbiter::new(
            ArbiterConfig::new().with_domains(nr_domains),
            sink.clone(),
            timer.clone(),
        );
        Fixture {
            sink,
            timer,
            arbiter,
        }
    }

    impl Fixture {
        fn add_max(&self, owner: Owner, domain: u32, value: FreqValue) -> ConstraintHandle {
            let handle = self
                .arbiter
                .add_constraint(owner, DomainId(domain), ConstraintKind::Max, value)
                .unwrap();
            self.arbiter.update_constraint(owner, handle, value).unwrap();
            handle
        }

        fn effective_max(&self, domain: u32) -> FreqValue {
            self.sink.effective(DomainId(domain), ConstraintKind::Max)
        }

        fn admin_handles(&self) -> Vec<ConstraintHandle> {
            self.arbiter
                .registry()
                .bindings()
                .iter()
                .map(|b| b.max)
                .collect()
        }

        /// Backups excluding the registry's own administrative bindings
        fn owner_backups(&self) -> Vec<BackupEntry> {
            let admin = self.admin_handles();
            self.arbiter
                .snapshot()
                .backups
                .into_iter()
                .filter(|b| !admin.contains(&b.handle))
                .collect()
        }

        fn sorted_records(&self) -> Vec<(ConstraintHandle, FreqValue)> {
            let mut records: Vec<_> = self
                .arbiter
                .snapshot()
                .records
                .iter()
                .map(|r| (r.handle, r.value))
                .collect();
            records.sort();
            records
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    #[test]
    fn test_add_binds_lazily_and_arms_at_default() {
        let fx = fixture(2);
        assert!(!fx.arbiter.registry().is_ready());

        let handle = fx
            .arbiter
            .add_constraint(Owner::Cb, DomainId(0), ConstraintKind::Max, 1_500_000)
            .unwrap();

        assert!(fx.arbiter.registry().is_ready());
        // 3 bindings per domain plus the new registration
        assert_eq!(fx.sink.registration_count(), 7);
        assert_eq!(fx.sink.value_of(handle.sink_handle()), Some(FREQ_QOS_MAX_DEFAULT_VALUE));

        let snapshot = fx.arbiter.snapshot();
        let record = snapshot.records.iter().find(|r| r.handle == handle).unwrap();
        assert_eq!(record.value, FREQ_QOS_MAX_DEFAULT_VALUE);
        assert_eq!(record.owner, Owner::Cb);
    }

    #[test]
    fn test_add_rejects_bad_arguments() {
        let fx = fixture(2);
        assert_eq!(
            fx.arbiter
                .add_constraint(Owner::Cb, DomainId(2), ConstraintKind::Max, 0),
            Err(QosError::InvalidDomain(DomainId(2)))
        );
        assert_eq!(
            fx.arbiter
                .add_constraint(Owner::Cb, DomainId(0), ConstraintKind::Min, -7),
            Err(QosError::InvalidValue(-7))
        );
        assert!(!fx.arbiter.registry().is_ready());
    }

    #[test]
    fn test_binding_failure_is_retryable() {
        let fx = fixture(2);
        fx.sink.fail_domain(DomainId(1));

        let err = fx
            .arbiter
            .add_constraint(Owner::Omrg, DomainId(0), ConstraintKind::Max, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SinkRegistrationFailed);
        assert!(err.is_retryable());
        assert_eq!(fx.sink.registration_count(), 0);
        assert!(fx.arbiter.snapshot().records.is_empty());

        fx.sink.restore_domain(DomainId(1));
        assert!(fx
            .arbiter
            .add_constraint(Owner::Omrg, DomainId(0), ConstraintKind::Max, 0)
            .is_ok());
    }

    #[test]
    fn test_update_max_replaces_record() {
        let fx = fixture(1);
        let handle = fx.add_max(Owner::Cb, 0, 1_800_000);
        fx.arbiter.update_constraint(Owner::Cb, handle, 1_600_000).unwrap();

        let records: Vec<_> = fx
            .arbiter
            .snapshot()
            .records
            .into_iter()
            .filter(|r| r.handle == handle)
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 1_600_000);
        assert_eq!(fx.effective_max(0), 1_600_000);
        assert_eq!(fx.arbiter.tightest_max(false), 1_600_000);
    }

    #[test]
    fn test_update_min_forwards_to_sink() {
        let fx = fixture(1);
        let handle = fx
            .arbiter
            .add_constraint(Owner::Omrg, DomainId(0), ConstraintKind::Min, 0)
            .unwrap();
        let before = fx.arbiter.snapshot().records;

        fx.arbiter.update_constraint(Owner::Omrg, handle, 900_000).unwrap();
        assert_eq!(fx.sink.effective(DomainId(0), ConstraintKind::Min), 900_000);
        assert_eq!(fx.arbiter.snapshot().records, before);

        fx.arbiter
            .update_constraint(Owner::Omrg, handle, crate::types::QOS_DEFAULT_VALUE)
            .unwrap();
        assert_eq!(fx.sink.value_of(handle.sink_handle()), Some(0));
    }

    #[test]
    fn test_default_sentinel_resolves_for_max() {
        let fx = fixture(1);
        let handle = fx.add_max(Owner::Cb, 0, 1_000_000);
        fx.arbiter
            .update_constraint(Owner::Cb, handle, crate::types::QOS_DEFAULT_VALUE)
            .unwrap();

        assert_eq!(fx.sink.value_of(handle.sink_handle()), Some(FREQ_QOS_MAX_DEFAULT_VALUE));
        assert!(fx
            .arbiter
            .snapshot()
            .records
            .iter()
            .all(|r| r.value == FREQ_QOS_MAX_DEFAULT_VALUE));
    }

    #[test]
    fn test_handle_must_match_owner() {
        let fx = fixture(1);
        let handle = fx.add_max(Owner::Cb, 0, 1_000_000);

        assert_eq!(
            fx.arbiter.update_constraint(Owner::Omrg, handle, 5),
            Err(QosError::InvalidHandle(handle))
        );
        assert_eq!(
            fx.arbiter.remove_constraint(Owner::Sbe, handle),
            Err(QosError::InvalidHandle(handle))
        );

        fx.arbiter.remove_constraint(Owner::Cb, handle).unwrap();
        assert_eq!(
            fx.arbiter.update_constraint(Owner::Cb, handle, 5),
            Err(QosError::InvalidHandle(handle))
        );
        assert_eq!(
            fx.arbiter.remove_constraint(Owner::Cb, handle),
            Err(QosError::InvalidHandle(handle))
        );
    }

    #[test]
    fn test_update_sink_failure_leaves_store() {
        let fx = fixture(1);
        let handle = fx.add_max(Owner::Cb, 0, 1_200_000);
        fx.sink.reject_updates(handle.sink_handle());

        assert_eq!(
            fx.arbiter.update_constraint(Owner::Cb, handle, 900_000),
            Err(QosError::Sink(SinkError::Rejected))
        );
        let snapshot = fx.arbiter.snapshot();
        let record = snapshot.records.iter().find(|r| r.handle == handle).unwrap();
        assert_eq!(record.value, 1_200_000);
    }

    #[test]
    fn test_remove_max() {
        let fx = fixture(1);
        let handle = fx.add_max(Owner::Cb, 0, 1_200_000);
        fx.arbiter.remove_constraint(Owner::Cb, handle).unwrap();

        assert!(fx.arbiter.snapshot().records.iter().all(|r| r.handle != handle));
        assert_eq!(fx.sink.value_of(handle.sink_handle()), None);
        assert_eq!(fx.effective_max(0), FREQ_QOS_MAX_DEFAULT_VALUE);
    }

    #[test]
    fn test_remove_min() {
        let fx = fixture(1);
        let handle = fx
            .arbiter
            .add_constraint(Owner::Uah, DomainId(0), ConstraintKind::Min, 0)
            .unwrap();
        fx.arbiter.remove_constraint(Owner::Uah, handle).unwrap();
        assert_eq!(fx.sink.value_of(handle.sink_handle()), None);
    }

    #[test]
    fn test_tightest_max_excluding_exclusive() {
        let fx = fixture(2);
        assert_eq!(fx.arbiter.tightest_max(true), FREQ_QOS_MAX_DEFAULT_VALUE);

        fx.add_max(Owner::Sbe, 0, 1_000_000);
        fx.add_max(Owner::Cb, 1, 1_700_000);
        assert_eq!(fx.arbiter.tightest_max(false), 1_000_000);
        assert_eq!(fx.arbiter.tightest_max(true), 1_700_000);
    }

    // -------------------------------------------------------------------------
    // Boost session
    // -------------------------------------------------------------------------

    #[test]
    fn test_end_to_end_boost_and_expiry() {
        let fx = fixture(2);
        let a = fx.add_max(Owner::Omrg, 0, 2_000_000);
        let b = fx.add_max(Owner::Cb, 1, 1_800_000);
        fx.arbiter
            .set_ceilings(&[(DomainId(0), 2_400_000), (DomainId(1), 2_400_000)])
            .unwrap();

        fx.arbiter.activate(BoostDuration::Millis(8)).unwrap();
        assert_eq!(fx.effective_max(0), 2_400_000);
        assert_eq!(fx.effective_max(1), 2_400_000);
        assert!(fx.arbiter.snapshot().records.is_empty());

        let parked = fx.owner_backups();
        assert_eq!(parked.len(), 2);
        assert!(parked.iter().any(|e| e.handle == a && e.value == 2_000_000));
        assert!(parked.iter().any(|e| e.handle == b && e.value == 1_800_000));
        assert_eq!(fx.timer.pending_delay(), Some(Duration::from_millis(8)));

        assert!(fx.timer.fire());
        assert!(!fx.arbiter.is_boost_active());
        assert_eq!(fx.effective_max(0), 2_000_000);
        assert_eq!(fx.effective_max(1), 1_800_000);

        let snapshot = fx.arbiter.snapshot();
        assert!(snapshot.backups.is_empty());
        assert!(snapshot.records.iter().any(|r| r.handle == a && r.value == 2_000_000));
        assert!(snapshot.records.iter().any(|r| r.handle == b && r.value == 1_800_000));
    }

    #[test]
    fn test_round_trip_restores_records() {
        let fx = fixture(3);
        let h1 = fx.add_max(Owner::Uah, 0, 1_900_000);
        let h2 = fx.add_max(Owner::Omrg, 1, 1_500_000);
        let h3 = fx.add_max(Owner::Cb, 2, 1_500_000);
        fx.arbiter.update_constraint(Owner::Omrg, h2, 1_400_000).unwrap();
        fx.arbiter.update_constraint(Owner::Cb, h3, -1).unwrap();
        let before = fx.sorted_records();

        fx.arbiter.activate(BoostDuration::Default).unwrap();
        fx.arbiter.deactivate().unwrap();

        assert_eq!(fx.sorted_records(), before);
        assert_eq!(fx.sink.value_of(h1.sink_handle()), Some(1_900_000));
        assert_eq!(fx.sink.value_of(h2.sink_handle()), Some(1_400_000));
        assert_eq!(fx.sink.value_of(h3.sink_handle()), Some(FREQ_QOS_MAX_DEFAULT_VALUE));
    }

    #[test]
    fn test_exclusive_records_survive_boost() {
        let fx = fixture(1);
        let sbe = fx.add_max(Owner::Sbe, 0, 1_000_000);
        fx.add_max(Owner::Cb, 0, 1_700_000);

        fx.arbiter.activate(BoostDuration::UntilReleased).unwrap();
        let snapshot = fx.arbiter.snapshot();
        assert!(snapshot.records.iter().all(|r| r.owner == Owner::EXCLUSIVE));
        assert_eq!(snapshot.records.len(), 1);
        assert!(snapshot.backups.iter().all(|b| b.handle != sbe));
        assert_eq!(fx.sink.value_of(sbe.sink_handle()), Some(1_000_000));

        // exclusive owner keeps working through the Sink while boosted
        fx.arbiter.update_constraint(Owner::Sbe, sbe, 1_100_000).unwrap();
        assert_eq!(fx.sink.value_of(sbe.sink_handle()), Some(1_100_000));
        assert!(fx
            .arbiter
            .snapshot()
            .records
            .iter()
            .all(|r| r.owner == Owner::EXCLUSIVE));

        fx.arbiter.deactivate().unwrap();
        assert_eq!(fx.arbiter.tightest_max(false), 1_100_000);
    }

    #[test]
    fn test_double_deactivate_is_noop() {
        let fx = fixture(2);
        fx.add_max(Owner::Cb, 0, 1_500_000);
        fx.arbiter.activate(BoostDuration::Default).unwrap();
        fx.arbiter.deactivate().unwrap();

        fx.sink.clear_calls();
        fx.arbiter.deactivate().unwrap();
        assert!(fx.sink.calls().is_empty());
        assert!(!fx.timer.fire());
    }

    #[test]
    fn test_updates_while_boosted_stay_parked() {
        let fx = fixture(2);
        let handle = fx.add_max(Owner::Cb, 1, 1_500_000);
        fx.arbiter.activate(BoostDuration::Default).unwrap();
        fx.sink.clear_calls();

        fx.arbiter.update_constraint(Owner::Cb, handle, 1_300_000).unwrap();
        fx.arbiter.update_constraint(Owner::Cb, handle, 1_200_000).unwrap();

        let parked: Vec<_> = fx
            .owner_backups()
            .into_iter()
            .filter(|b| b.handle == handle)
            .collect();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].value, 1_200_000);
        assert!(fx.sink.calls_for(DomainId(1)).is_empty());

        fx.arbiter.deactivate().unwrap();
        assert_eq!(fx.sink.value_of(handle.sink_handle()), Some(1_200_000));
    }

    #[test]
    fn test_repeated_activation_keeps_deadline() {
        let fx = fixture(2);
        fx.add_max(Owner::Cb, 0, 1_500_000);
        fx.arbiter.activate(BoostDuration::Millis(10)).unwrap();
        let backups = fx.arbiter.snapshot().backups.len();

        fx.arbiter.set_ceiling(DomainId(0), 2_000_000).unwrap();
        fx.arbiter.activate(BoostDuration::Millis(500)).unwrap();

        assert_eq!(fx.arbiter.snapshot().backups.len(), backups);
        assert_eq!(fx.timer.arm_count(), 1);
        assert_eq!(fx.timer.pending_delay(), Some(Duration::from_millis(10)));
        assert_eq!(fx.arbiter.snapshot().expiry, Some(Duration::from_millis(10)));
        assert_eq!(fx.effective_max(0), 2_000_000);
    }

    #[test]
    fn test_ceiling_pushes_only_while_boosted() {
        let fx = fixture(2);
        fx.arbiter.ensure_bound().unwrap();
        fx.sink.clear_calls();

        fx.arbiter.set_ceiling(DomainId(1), 1_900_000).unwrap();
        assert!(fx.sink.calls().is_empty());
        assert_eq!(fx.arbiter.ceilings(), [FREQ_QOS_MAX_DEFAULT_VALUE, 1_900_000]);

        fx.arbiter.activate(BoostDuration::Default).unwrap();
        fx.sink.clear_calls();
        fx.arbiter.set_ceiling(DomainId(1), 1_700_000).unwrap();

        let boost = fx.arbiter.registry().binding(DomainId(1)).unwrap().boost;
        assert_eq!(fx.sink.calls(), [SinkCall::Update {
            handle: boost,
            domain: DomainId(1),
            value: 1_700_000,
        }]);
        assert_eq!(fx.effective_max(1), 1_700_000);
    }

    #[test]
    fn test_ceiling_batch_pushes_changes() {
        let fx = fixture(3);
        fx.arbiter.set_ceiling(DomainId(0), 2_000_000).unwrap();
        fx.arbiter.activate(BoostDuration::UntilReleased).unwrap();
        fx.sink.clear_calls();

        fx.arbiter
            .set_ceilings(&[(DomainId(0), 2_000_000), (DomainId(2), 1_500_000)])
            .unwrap();
        let calls = fx.sink.calls();
        assert_eq!(calls.len(), 1);
        assert!(fx.sink.calls_for(DomainId(2)).len() == 1);

        assert_eq!(
            fx.arbiter.set_ceilings(&[(DomainId(3), 1)]),
            Err(QosError::InvalidDomain(DomainId(3)))
        );
        assert_eq!(
            fx.arbiter.set_ceiling(DomainId(0), -1),
            Err(QosError::InvalidValue(-1))
        );
    }

    #[test]
    fn test_add_during_boost_is_parked() {
        let fx = fixture(1);
        fx.arbiter.activate(BoostDuration::Default).unwrap();

        let handle = fx
            .arbiter
            .add_constraint(Owner::Omrg, DomainId(0), ConstraintKind::Max, 0)
            .unwrap();
        assert!(fx.arbiter.snapshot().records.is_empty());
        assert_eq!(
            fx.owner_backups(),
            [BackupEntry {
                owner: Owner::Omrg,
                handle,
                domain: DomainId(0),
                kind: ConstraintKind::Max,
                value: FREQ_QOS_MAX_DEFAULT_VALUE,
            }]
        );

        fx.arbiter.update_constraint(Owner::Omrg, handle, 1_100_000).unwrap();
        assert_eq!(fx.sink.value_of(handle.sink_handle()), Some(FREQ_QOS_MAX_DEFAULT_VALUE));

        fx.timer.fire();
        assert_eq!(fx.sink.value_of(handle.sink_handle()), Some(1_100_000));
        assert!(fx
            .arbiter
            .snapshot()
            .records
            .iter()
            .any(|r| r.handle == handle && r.value == 1_100_000));
    }

    #[test]
    fn test_remove_during_boost() {
        let fx = fixture(1);
        let handle = fx.add_max(Owner::Cb, 0, 1_300_000);
        fx.arbiter.activate(BoostDuration::Default).unwrap();

        fx.arbiter.remove_constraint(Owner::Cb, handle).unwrap();
        assert!(fx.owner_backups().is_empty());
        assert_eq!(fx.sink.value_of(handle.sink_handle()), None);

        fx.arbiter.deactivate().unwrap();
        assert!(fx.arbiter.snapshot().records.iter().all(|r| r.handle != handle));
    }

    #[test]
    fn test_failed_restore_reports_and_continues() {
        let fx = fixture(2);
        let bad = fx.add_max(Owner::Cb, 0, 1_300_000);
        let good = fx.add_max(Owner::Omrg, 1, 1_400_000);
        fx.arbiter.activate(BoostDuration::Default).unwrap();
        fx.sink.reject_updates(bad.sink_handle());

        let err = fx.arbiter.deactivate().unwrap_err();
        assert_eq!(
            err,
            QosError::RestoreFailed(alloc::vec![RestoreFailure {
                handle: bad,
                value: 1_300_000,
                error: SinkError::Rejected,
            }])
        );
        assert!(!fx.arbiter.is_boost_active());
        assert_eq!(fx.sink.value_of(good.sink_handle()), Some(1_400_000));

        // the dropped record makes a later removal report NotFound
        assert_eq!(
            fx.arbiter.remove_constraint(Owner::Cb, bad),
            Err(QosError::NotFound(bad))
        );
        assert_eq!(fx.sink.value_of(bad.sink_handle()), Some(FREQ_QOS_MAX_DEFAULT_VALUE));
    }

    #[test]
    fn test_failed_ceiling_push_keeps_sweeping() {
        let fx = fixture(3);
        let handles = [
            fx.add_max(Owner::Cb, 0, 1_500_000),
            fx.add_max(Owner::Cb, 1, 1_500_000),
            fx.add_max(Owner::Omrg, 2, 1_400_000),
        ];
        fx.arbiter
            .set_ceilings(&[
                (DomainId(0), 2_000_000),
                (DomainId(1), 2_100_000),
                (DomainId(2), 2_200_000),
            ])
            .unwrap();
        let boost1 = fx.arbiter.registry().binding(DomainId(1)).unwrap().boost;
        fx.sink.reject_updates(boost1);

        fx.arbiter.activate(BoostDuration::Default).unwrap();
        assert!(fx.arbiter.is_boost_active());
        assert_eq!(fx.effective_max(0), 2_000_000);
        assert_eq!(fx.effective_max(2), 2_200_000);
        assert_eq!(fx.sink.value_of(boost1), Some(FREQ_QOS_MAX_DEFAULT_VALUE));

        let parked: Vec<_> = fx.owner_backups().iter().map(|b| b.handle).collect();
        assert_eq!(parked.len(), 3);
        for handle in handles {
            assert!(parked.contains(&handle));
            assert_eq!(fx.sink.value_of(handle.sink_handle()), Some(FREQ_QOS_MAX_DEFAULT_VALUE));
        }
        assert!(fx
            .arbiter
            .snapshot()
            .records
            .iter()
            .all(|r| r.owner.is_exclusive()));

        fx.arbiter.deactivate().unwrap();
        assert_eq!(fx.effective_max(1), 1_500_000);
    }

    #[test]
    fn test_failed_release_still_parks() {
        let fx = fixture(2);
        let stuck = fx.add_max(Owner::Cb, 0, 1_500_000);
        let other = fx.add_max(Owner::Omrg, 1, 1_400_000);
        fx.sink.reject_updates(stuck.sink_handle());

        fx.arbiter.activate(BoostDuration::Default).unwrap();
        let backups = fx.owner_backups();
        assert_eq!(backups.len(), 2);
        assert!(backups.iter().any(|b| b.handle == stuck && b.value == 1_500_000));
        assert!(backups.iter().any(|b| b.handle == other && b.value == 1_400_000));
        assert!(fx
            .arbiter
            .snapshot()
            .records
            .iter()
            .all(|r| r.handle != stuck && r.handle != other));
        assert_eq!(fx.sink.value_of(stuck.sink_handle()), Some(1_500_000));
        assert_eq!(fx.sink.value_of(other.sink_handle()), Some(FREQ_QOS_MAX_DEFAULT_VALUE));

        let err = fx.arbiter.deactivate().unwrap_err();
        assert!(matches!(&err, QosError::RestoreFailed(f) if f.len() == 1 && f[0].handle == stuck));
        assert_eq!(fx.sink.value_of(other.sink_handle()), Some(1_400_000));
    }

    #[test]
    fn test_owner_registration_failure_leaves_store() {
        let fx = fixture(2);
        fx.arbiter.ensure_bound().unwrap();
        let before = fx.arbiter.snapshot();
        let registrations = fx.sink.registration_count();
        fx.sink.limit_registrations(Some(0));

        let err = fx
            .arbiter
            .add_constraint(Owner::Cb, DomainId(0), ConstraintKind::Max, 1_000_000)
            .unwrap_err();
        assert_eq!(
            err,
            QosError::SinkRegistrationFailed {
                domain: DomainId(0),
                source: SinkError::Rejected,
            }
        );
        assert!(err.is_retryable());
        assert_eq!(fx.arbiter.snapshot(), before);
        assert_eq!(fx.sink.registration_count(), registrations);

        fx.sink.limit_registrations(None);
        assert!(fx
            .arbiter
            .add_constraint(Owner::Cb, DomainId(0), ConstraintKind::Max, 1_000_000)
            .is_ok());
    }

    #[test]
    fn test_stale_expiry_is_ignored() {
        let fx = fixture(1);
        fx.add_max(Owner::Cb, 0, 1_300_000);
        fx.arbiter.activate(BoostDuration::Millis(8)).unwrap();
        fx.arbiter.deactivate().unwrap();
        assert!(!fx.timer.is_armed());

        fx.arbiter.activate(BoostDuration::Millis(8)).unwrap();
        fx.arbiter.expire(1);
        assert!(fx.arbiter.is_boost_active());

        fx.arbiter.expire(2);
        assert!(!fx.arbiter.is_boost_active());
    }

    #[test]
    fn test_until_released_arms_nothing() {
        let fx = fixture(1);
        fx.arbiter.activate(BoostDuration::UntilReleased).unwrap();
        assert!(fx.arbiter.is_boost_active());
        assert!(!fx.timer.is_armed());
        assert_eq!(fx.arbiter.snapshot().expiry, None);

        fx.arbiter.deactivate().unwrap();
        assert!(!fx.arbiter.is_boost_active());
    }

    #[test]
    fn test_default_duration() {
        let fx = fixture(1);
        assert_eq!(fx.arbiter.default_duration(), Duration::from_millis(8));
        assert!(!fx.arbiter.set_default_duration(0));
        assert!(!fx.arbiter.set_default_duration(-5));
        assert!(fx.arbiter.set_default_duration(20));

        fx.arbiter.activate(BoostDuration::Default).unwrap();
        assert_eq!(fx.timer.pending_delay(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_notifier_drives_session() {
        let fx = fixture(2);
        let notifier = BoostNotifier::new();
        fx.arbiter.subscribe_to(&notifier);

        let outcome = notifier.notify(BoostEvent::Activate(BoostDuration::Default));
        assert_eq!(outcome.ignored, 1);
        assert!(!fx.arbiter.is_boost_active());
        assert!(fx.arbiter.notify_activate(BoostDuration::Default).is_ok());
        assert!(!fx.arbiter.is_boost_active());

        fx.arbiter.ensure_bound().unwrap();
        assert_eq!(
            notifier.notify(BoostEvent::Activate(BoostDuration::Millis(5))).handled,
            1
        );
        assert!(fx.arbiter.is_boost_active());
        assert_eq!(notifier.notify(BoostEvent::QtqActivate).ignored, 1);
        assert!(fx.arbiter.is_boost_active());

        assert_eq!(notifier.notify(BoostEvent::Deactivate).handled, 1);
        assert!(!fx.arbiter.is_boost_active());

        fx.arbiter.notify_activate(BoostDuration::UntilReleased).unwrap();
        fx.arbiter.notify_deactivate().unwrap();
        assert!(!fx.arbiter.is_boost_active());
    }

    #[test]
    fn test_notifier_outlives_arbiter() {
        let notifier = BoostNotifier::new();
        {
            let fx = fixture(1);
            fx.arbiter.subscribe_to(&notifier);
        }
        assert_eq!(notifier.notify(BoostEvent::Deactivate).ignored, 1);
    }

    #[test]
    fn test_shutdown_restores_and_unbinds() {
        let fx = fixture(2);
        let handle = fx.add_max(Owner::Cb, 0, 1_500_000);
        fx.arbiter.activate(BoostDuration::Default).unwrap();

        fx.arbiter.shutdown().unwrap();
        assert!(!fx.arbiter.is_boost_active());
        assert!(!fx.arbiter.registry().is_ready());
        assert!(fx.arbiter.snapshot().records.is_empty());
        // only the owner's own registration remains
        assert_eq!(fx.sink.registration_count(), 1);
        assert_eq!(fx.sink.value_of(handle.sink_handle()), Some(1_500_000));
        assert!(!fx.timer.is_armed());
    }

    #[test]
    fn test_snapshot_display() {
        let fx = fixture(1);
        fx.add_max(Owner::Cb, 0, 1_500_000);
        fx.arbiter.activate(BoostDuration::Default).unwrap();

        let snapshot = fx.arbiter.snapshot();
        assert_eq!(snapshot.expiry, Some(Duration::from_millis(8)));
        let text = snapshot.to_string();
        assert!(text.contains("=====QOS Boost: active ====="));
        assert!(text.contains("QOS Boost Expiry: 8 ms"));
        assert!(text.contains("QOS Owner: CB, Domain: 0, Value: 1500000, Type: MAX"));
        assert!(text.contains(" 0:2147483647"));
        fx.arbiter.dump();

        fx.arbiter.deactivate().unwrap();
        let snapshot = fx.arbiter.snapshot();
        assert_eq!(snapshot.expiry, None);
        assert!(!snapshot.to_string().contains("Expiry"));
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_thread_timer_expiry() {
        let sink = Arc::new(PolicyConstraints::new());
        let arbiter =
            Arbiter::with_thread_timer(ArbiterConfig::new().with_domains(2), sink.clone())
                .unwrap();
        let handle = arbiter
            .add_constraint(Owner::Cb, DomainId(0), ConstraintKind::Max, 0)
            .unwrap();
        arbiter.update_constraint(Owner::Cb, handle, 1_600_000).unwrap();

        arbiter.activate(BoostDuration::Millis(5)).unwrap();
        let start = std::time::Instant::now();
        while arbiter.is_boost_active() && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!arbiter.is_boost_active());
        assert_eq!(sink.value_of(handle.sink_handle()), Some(1_600_000));
    }

    /// Timer whose first arm lets another thread end the session and start
    /// a new one
    #[cfg(feature = "std")]
    #[derive(Default)]
    struct RacingTimer {
        inner: ManualTimer,
        arbiter: Mutex<Option<Weak<Arbiter>>>,
        session_locked_on_arm: Mutex<Vec<bool>>,
        raced: core::sync::atomic::AtomicBool,
        racer: Mutex<Option<std::thread::JoinHandle<()>>>,
    }

    #[cfg(feature = "std")]
    impl DeferredTimer for RacingTimer {
        fn arm(&self, delay: Duration, task: crate::timer::DeferredTask) {
            let arbiter = self.arbiter.lock().as_ref().and_then(Weak::upgrade);
            if let Some(arbiter) = &arbiter {
                self.session_locked_on_arm
                    .lock()
                    .push(arbiter.session.is_locked());
            }
            self.inner.arm(delay, task);

            let Some(arbiter) = arbiter else {
                return;
            };
            if !self.raced.swap(true, Ordering::SeqCst) {
                *self.racer.lock() = Some(std::thread::spawn(move || {
                    arbiter.deactivate().unwrap();
                    arbiter.activate(BoostDuration::Millis(20)).unwrap();
                }));
            }
        }

        fn cancel_sync(&self) -> bool {
            self.inner.cancel_sync()
        }
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_reactivation_race_keeps_new_expiry() {
        let sink = Arc::new(PolicyConstraints::new());
        let timer = Arc::new(RacingTimer::default());
        let arbiter = Arbiter::new(
            ArbiterConfig::new().with_domains(1),
            sink.clone(),
            timer.clone(),
        );
        *timer.arbiter.lock() = Some(Arc::downgrade(&arbiter));
        let handle = arbiter
            .add_constraint(Owner::Cb, DomainId(0), ConstraintKind::Max, 0)
            .unwrap();
        arbiter.update_constraint(Owner::Cb, handle, 1_300_000).unwrap();

        arbiter.activate(BoostDuration::Millis(8)).unwrap();
        let racer = timer.racer.lock().take().unwrap();
        racer.join().unwrap();

        // each session armed its expiry while holding SessionLock
        assert_eq!(*timer.session_locked_on_arm.lock(), [true, true]);
        assert!(arbiter.is_boost_active());
        assert_eq!(timer.inner.pending_delay(), Some(Duration::from_millis(20)));

        assert!(timer.inner.fire());
        assert!(!arbiter.is_boost_active());
        assert!(!timer.inner.is_armed());
        assert_eq!(sink.value_of(handle.sink_handle()), Some(1_300_000));
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_concurrent_updates_and_sessions() {
        let fx = fixture(4);
        let handles: Vec<_> = (0..4u32)
            .map(|d| fx.add_max(Owner::Cb, d, 1_000_000))
            .collect();

        std::thread::scope(|scope| {
            for (i, &handle) in handles.iter().enumerate() {
                let arbiter = &fx.arbiter;
                scope.spawn(move || {
                    for step in 0..200 {
                        let value = 1_000_000 + (i as FreqValue) * 1000 + step;
                        arbiter.update_constraint(Owner::Cb, handle, value).unwrap();
                    }
                });
            }
            let arbiter = &fx.arbiter;
            scope.spawn(move || {
                for _ in 0..50 {
                    arbiter.activate(BoostDuration::UntilReleased).unwrap();
                    let snapshot = arbiter.snapshot();
                    assert!(snapshot.records.iter().all(|r| r.owner.is_exclusive()));
                    arbiter.deactivate().unwrap();
                }
            });
        });

        assert!(!fx.arbiter.is_boost_active());
        for (i, handle) in handles.iter().enumerate() {
            let expected = 1_000_000 + (i as FreqValue) * 1000 + 199;
            assert_eq!(fx.sink.value_of(handle.sink_handle()), Some(expected));
            let records: Vec<_> = fx
                .arbiter
                .snapshot()
                .records
                .into_iter()
                .filter(|r| r.handle == *handle)
                .collect();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].value, expected);
        }
    }
}
