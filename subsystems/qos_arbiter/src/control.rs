//! # Administrative Control Surface
//!
//! Text front-end for the administrative per-domain bounds and the boost
//! ceilings. Every store takes a batch of whitespace separated
//! `domain:value` pairs:
//!
//! ```text
//!   "0:1800000 1:1800000 4:2400000"
//! ```
//!
//! | Attribute | Store | Show |
//! |-----------|-------|------|
//! | `cpu_min_freq` | UAH MIN binding per domain | last value written |
//! | `cpu_max_freq` | UAH MAX binding per domain (clamped) | last value written |
//! | `thermal_max_freq` | boost ceiling per domain | ceiling table |
//!
//! A batch stops at the first domain outside the configured range; pairs
//! before it are still applied.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::Write;

use crate::arbiter::Arbiter;
use crate::error::{QosError, QosResult};
use crate::types::{DomainId, FreqValue, Owner};

/// Parse a `domain:value` batch
///
/// Parsing stops silently at the first domain `>= nr_domains`.
pub fn parse_domain_values(input: &str, nr_domains: usize) -> QosResult<Vec<(DomainId, u32)>> {
    let mut values = Vec::new();
    for pair in input.split_whitespace() {
        let (domain, value) = pair
            .split_once(':')
            .ok_or(QosError::Malformed("expected domain:value"))?;
        let domain: u32 = domain
            .parse()
            .map_err(|_| QosError::Malformed("bad domain"))?;
        let value: u32 = value.parse().map_err(|_| QosError::Malformed("bad value"))?;

        if domain as usize >= nr_domains {
            break;
        }
        values.push((DomainId(domain), value));
    }
    Ok(values)
}

fn clamp_to_freq(value: u32) -> FreqValue {
    FreqValue::try_from(value).unwrap_or(FreqValue::MAX)
}

/// Text control surface of one arbiter
pub struct ControlSurface {
    arbiter: Arc<Arbiter>,
}

impl ControlSurface {
    /// Wrap `arbiter`
    pub fn new(arbiter: Arc<Arbiter>) -> Self {
        Self { arbiter }
    }

    /// Underlying arbiter
    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }

    fn parse(&self, input: &str) -> QosResult<Vec<(DomainId, u32)>> {
        parse_domain_values(input, self.arbiter.registry().nr_domains())
    }

    // -------------------------------------------------------------------------
    // cpu_min_freq / cpu_max_freq
    // -------------------------------------------------------------------------

    /// Apply administrative floors
    ///
    /// Values above `i32::MAX` are remembered but not applied.
    pub fn store_cpu_min_freq(&self, input: &str) -> QosResult<()> {
        let values = self.parse(input)?;
        self.arbiter.ensure_bound()?;
        let registry = self.arbiter.registry();

        for (domain, raw) in values {
            registry.set_min_shadow(domain, raw);
            let Ok(value) = FreqValue::try_from(raw) else {
                log::warn!("QosArbiter: min {} on domain {} out of range", raw, domain);
                continue;
            };
            let Some(binding) = registry.binding(domain) else {
                continue;
            };
            if let Err(e) = self.arbiter.update_constraint(Owner::Uah, binding.min, value) {
                log::error!("QosArbiter: min {} on domain {}: {}", value, domain, e);
            }
        }
        Ok(())
    }

    /// Apply administrative ceilings, clamped to `i32::MAX`
    pub fn store_cpu_max_freq(&self, input: &str) -> QosResult<()> {
        let values = self.parse(input)?;
        self.arbiter.ensure_bound()?;
        let registry = self.arbiter.registry();

        for (domain, raw) in values {
            let value = clamp_to_freq(raw);
            registry.set_max_shadow(domain, value as u32);
            let Some(binding) = registry.binding(domain) else {
                continue;
            };
            if let Err(e) = self.arbiter.update_constraint(Owner::Uah, binding.max, value) {
                log::error!("QosArbiter: max {} on domain {}: {}", value, domain, e);
            }
        }
        Ok(())
    }

    /// Last floors written, `"d:v "` per domain
    pub fn show_cpu_min_freq(&self) -> String {
        let registry = self.arbiter.registry();
        render(registry.domains().map(|d| (d, registry.min_shadow(d).unwrap_or(0))))
    }

    /// Last ceilings written, `"d:v "` per domain
    pub fn show_cpu_max_freq(&self) -> String {
        let registry = self.arbiter.registry();
        render(registry.domains().map(|d| (d, registry.max_shadow(d).unwrap_or(0))))
    }

    // -------------------------------------------------------------------------
    // thermal_max_freq
    // -------------------------------------------------------------------------

    /// Set boost ceilings; pushed at once only while a session runs
    pub fn store_thermal_max_freq(&self, input: &str) -> QosResult<()> {
        let values: Vec<(DomainId, FreqValue)> = self
            .parse(input)?
            .into_iter()
            .map(|(domain, raw)| (domain, clamp_to_freq(raw)))
            .collect();
        self.arbiter.set_ceilings(&values)
    }

    /// Boost ceilings, `"d:v "` per domain
    pub fn show_thermal_max_freq(&self) -> String {
        let ceilings = self.arbiter.ceilings();
        render(
            ceilings
                .iter()
                .enumerate()
                .map(|(d, &v)| (DomainId(d as u32), v as u32)),
        )
    }
}

impl core::fmt::Debug for ControlSurface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControlSurface")
            .field("nr_domains", &self.arbiter.registry().nr_domains())
            .finish()
    }
}

fn render(values: impl Iterator<Item = (DomainId, u32)>) -> String {
    let mut out = String::new();
    for (domain, value) in values {
        let _ = write!(out, "{}:{} ", domain, value);
    }
    out.push('\n');
    out
}
