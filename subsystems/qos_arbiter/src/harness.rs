//! # QoS Test Harness
//!
//! Command-driven bookkeeping for exercising the arbiter by hand. Each
//! command is one line of text:
//!
//! | Command | Format | Effect |
//! |---------|--------|--------|
//! | begin | `0` / `1` | disable / enable adding entries |
//! | input | `OWNER value cpu minOrMax duration` | add and set a constraint |
//! | update | `OWNER old new cpu` | change the first matching entry |
//! | remove | `OWNER value cpu` | drop the first matching entry |
//! | remove_all | `1` | drop every entry |
//! | duration | `ms` | set the default boost length (positive only) |
//! | checklist | `1` | dump the arbiter bookkeeping |
//!
//! `minOrMax` is `0` for MIN, anything else for MAX. The `duration` field
//! of `input` is accepted for format compatibility and ignored.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::str::{FromStr, SplitWhitespace};

use spin::Mutex;

use crate::arbiter::Arbiter;
use crate::error::{QosError, QosResult};
use crate::types::{ConstraintHandle, ConstraintKind, DomainId, FreqValue, Owner};

/// Longest accepted owner name
const MAX_OWNER_LEN: usize = 15;

/// One constraint added through the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessEntry {
    /// Owner named on input
    pub owner: Owner,
    /// Handle returned by the arbiter
    pub handle: ConstraintHandle,
    /// Target domain
    pub cpu: i32,
    /// MIN or MAX
    pub kind: ConstraintKind,
    /// Value last written
    pub value: FreqValue,
}

#[derive(Debug, Clone, Copy)]
struct LastInput {
    owner: Owner,
    value: FreqValue,
    cpu: i32,
}

#[derive(Debug, Default)]
struct HarnessState {
    enabled: bool,
    last: Option<LastInput>,
    entries: Vec<HarnessEntry>,
}

// =============================================================================
// PARSING
// =============================================================================

struct Fields<'a>(SplitWhitespace<'a>);

impl<'a> Fields<'a> {
    fn new(input: &'a str) -> Self {
        Self(input.split_whitespace())
    }

    fn owner(&mut self) -> QosResult<Owner> {
        let name = self.0.next().ok_or(QosError::Malformed("missing owner"))?;
        if name.len() > MAX_OWNER_LEN {
            return Err(QosError::Malformed("owner name too long"));
        }
        Owner::from_name(name).ok_or(QosError::Malformed("owner must be OMRG, CB, UAH or SBE"))
    }

    fn number<T: FromStr>(&mut self, what: &'static str) -> QosResult<T> {
        self.0
            .next()
            .and_then(|field| field.parse().ok())
            .ok_or(QosError::Malformed(what))
    }
}

fn domain_of(cpu: i32) -> QosResult<DomainId> {
    u32::try_from(cpu)
        .map(DomainId)
        .map_err(|_| QosError::Malformed("negative cpu"))
}

// =============================================================================
// HARNESS
// =============================================================================

/// Test command front-end over one arbiter
pub struct QosTestHarness {
    arbiter: Arc<Arbiter>,
    state: Mutex<HarnessState>,
}

impl QosTestHarness {
    /// Disabled harness over `arbiter`
    pub fn new(arbiter: Arc<Arbiter>) -> Self {
        Self {
            arbiter,
            state: Mutex::new(HarnessState::default()),
        }
    }

    /// `begin`: enable or disable adding entries
    pub fn write_begin(&self, input: &str) -> QosResult<()> {
        let value: i32 = Fields::new(input).number("expected 0 or 1")?;
        self.state.lock().enabled = value != 0;
        log::info!("QosTestHarness: {}", if value != 0 { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Read form of `begin`
    pub fn read_begin(&self) -> String {
        format!("qos_test_begin={}\n", i32::from(self.state.lock().enabled))
    }

    /// `input`: add a constraint and set it to the given value
    ///
    /// The input is remembered even while the harness is disabled. A failed
    /// update removes the constraint again.
    pub fn write_input(&self, input: &str) -> QosResult<()> {
        let mut fields = Fields::new(input);
        let owner = fields.owner()?;
        let value: FreqValue = fields.number("bad value")?;
        let cpu: i32 = fields.number("bad cpu")?;
        let min_or_max: i32 = fields.number("bad minOrMax")?;
        let _duration: i32 = fields.number("bad duration")?;

        let enabled = {
            let mut state = self.state.lock();
            state.last = Some(LastInput { owner, value, cpu });
            state.enabled
        };
        if !enabled {
            return Ok(());
        }

        let kind = if min_or_max == 0 {
            ConstraintKind::Min
        } else {
            ConstraintKind::Max
        };
        let domain = domain_of(cpu)?;
        let handle = self.arbiter.add_constraint(owner, domain, kind, value)?;
        if let Err(e) = self.arbiter.update_constraint(owner, handle, value) {
            if let Err(undo) = self.arbiter.remove_constraint(owner, handle) {
                log::warn!("QosTestHarness: rollback of {} failed: {}", handle, undo);
            }
            return Err(e);
        }

        self.state.lock().entries.push(HarnessEntry {
            owner,
            handle,
            cpu,
            kind,
            value,
        });
        log::debug!(
            "QosTestHarness: added owner={} value={} cpu={} {}",
            owner,
            value,
            cpu,
            kind
        );
        Ok(())
    }

    /// Read form of `input`
    pub fn read_input(&self) -> String {
        match self.state.lock().last {
            Some(last) => format!(
                "Last added: owner={}, value={}, cpu={}\n",
                last.owner, last.value, last.cpu
            ),
            None => String::from("No data written yet\n"),
        }
    }

    /// `update`: change the first entry matching owner, old value and cpu
    ///
    /// The entry takes the new value even when the arbiter rejects it.
    pub fn write_update(&self, input: &str) -> QosResult<()> {
        let mut fields = Fields::new(input);
        let owner = fields.owner()?;
        let old: FreqValue = fields.number("bad old value")?;
        let new: FreqValue = fields.number("bad new value")?;
        let cpu: i32 = fields.number("bad cpu")?;

        let mut state = self.state.lock();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.owner == owner && e.value == old && e.cpu == cpu)
            .ok_or(QosError::Malformed("no matching entry"))?;

        let result = self.arbiter.update_constraint(owner, entry.handle, new);
        entry.value = new;
        if let Err(e) = &result {
            log::warn!("QosTestHarness: update of {} failed: {}", entry.handle, e);
        }
        Ok(())
    }

    /// `remove`: drop the first entry matching owner, value and cpu
    pub fn write_remove(&self, input: &str) -> QosResult<()> {
        let mut fields = Fields::new(input);
        let owner = fields.owner()?;
        let value: FreqValue = fields.number("bad value")?;
        let cpu: i32 = fields.number("bad cpu")?;

        let mut state = self.state.lock();
        let pos = state
            .entries
            .iter()
            .position(|e| e.owner == owner && e.value == value && e.cpu == cpu)
            .ok_or(QosError::Malformed("no matching entry"))?;
        let entry = state.entries.remove(pos);
        drop(state);

        if let Err(e) = self.arbiter.remove_constraint(owner, entry.handle) {
            log::warn!("QosTestHarness: remove of {} failed: {}", entry.handle, e);
        }
        Ok(())
    }

    /// `remove_all`: drop every entry; the input must be `1`
    pub fn write_remove_all(&self, input: &str) -> QosResult<()> {
        let value: i32 = Fields::new(input).number("expected 1")?;
        if value != 1 {
            return Err(QosError::Malformed("expected 1"));
        }

        let entries = core::mem::take(&mut self.state.lock().entries);
        for entry in &entries {
            if let Err(e) = self.arbiter.remove_constraint(entry.owner, entry.handle) {
                log::warn!("QosTestHarness: remove of {} failed: {}", entry.handle, e);
            }
        }
        log::debug!("QosTestHarness: removed {} entries", entries.len());
        Ok(())
    }

    /// `duration`: set the default boost length; non-positive values are
    /// ignored
    pub fn write_duration(&self, input: &str) -> QosResult<()> {
        let ms: i32 = Fields::new(input).number("bad duration")?;
        self.arbiter.set_default_duration(ms);
        Ok(())
    }

    /// `checklist`: dump the arbiter bookkeeping; the input must be `1`
    pub fn write_checklist(&self, input: &str) -> QosResult<()> {
        let value: i32 = Fields::new(input).number("expected 1")?;
        if value != 1 {
            return Err(QosError::Malformed("expected 1"));
        }
        self.arbiter.dump();
        Ok(())
    }

    /// Copy of the live entries
    pub fn entries(&self) -> Vec<HarnessEntry> {
        self.state.lock().entries.clone()
    }
}

impl core::fmt::Debug for QosTestHarness {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("QosTestHarness")
            .field("enabled", &state.enabled)
            .field("entries", &state.entries.len())
            .finish()
    }
}
