//! # Arbiter Configuration
//!
//! Static parameters of an [`Arbiter`](crate::Arbiter), either built directly
//! or read from a [`ConfigProvider`].
//!
//! | Key | Type | Default | Notes |
//! |-----|------|---------|-------|
//! | `qos.nr_domains` | uint | 8 | 1..=64 |
//! | `qos.boost_duration_ms` | uint | 8 | > 0 |

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use core::time::Duration;

/// Number of domains bound when nothing else is configured
pub const DEFAULT_NR_DOMAINS: usize = 8;

/// Upper bound on the number of domains
pub const MAX_NR_DOMAINS: usize = 64;

/// Boost session length when the activation asks for the default
pub const DEFAULT_BOOST_DURATION_MS: u32 = 8;

/// Config key for the domain count
pub const KEY_NR_DOMAINS: &str = "qos.nr_domains";

/// Config key for the default boost duration
pub const KEY_BOOST_DURATION_MS: &str = "qos.boost_duration_ms";

// =============================================================================
// CONFIG PROVIDER
// =============================================================================

/// Configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    /// Integer
    Int(i64),
    /// Unsigned integer
    Uint(u64),
    /// String
    String(String),
}

impl ConfigValue {
    /// Get as unsigned, accepting non-negative signed values
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            ConfigValue::Uint(u) => Some(*u),
            ConfigValue::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }
}

/// Source of configuration values
pub trait ConfigProvider: Send + Sync {
    /// Get a configuration value
    fn get(&self, key: &str) -> Option<ConfigValue>;

    /// Get uint with default
    fn get_uint(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.as_uint()).unwrap_or(default)
    }
}

/// Simple in-memory config provider
#[derive(Debug, Default)]
pub struct MemoryConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl MemoryConfig {
    /// Create empty config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value
    pub fn set(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.values.insert(key.into(), value);
    }

    /// Set uint
    pub fn set_uint(&mut self, key: impl Into<String>, value: u64) {
        self.set(key, ConfigValue::Uint(value));
    }

    /// Set int
    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.set(key, ConfigValue::Int(value));
    }

    /// Set string
    pub fn set_string(&mut self, key: impl Into<String>, value: &str) {
        self.set(key, ConfigValue::String(value.to_string()));
    }
}

impl ConfigProvider for MemoryConfig {
    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.get(key).cloned()
    }
}

// =============================================================================
// ARBITER CONFIG
// =============================================================================

/// Arbiter parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterConfig {
    /// Number of domains bound by the registry
    pub nr_domains: usize,
    /// Default boost session length in milliseconds
    pub boost_duration_ms: u32,
}

impl ArbiterConfig {
    /// Defaults: 8 domains, 8 ms boost
    pub const fn new() -> Self {
        Self {
            nr_domains: DEFAULT_NR_DOMAINS,
            boost_duration_ms: DEFAULT_BOOST_DURATION_MS,
        }
    }

    /// Set the domain count, clamped to `1..=MAX_NR_DOMAINS`
    pub fn with_domains(mut self, nr_domains: usize) -> Self {
        self.nr_domains = nr_domains.clamp(1, MAX_NR_DOMAINS);
        self
    }

    /// Set the default boost length; zero keeps the current value
    pub fn with_boost_duration_ms(mut self, ms: u32) -> Self {
        if ms > 0 {
            self.boost_duration_ms = ms;
        }
        self
    }

    /// Default boost length
    pub fn boost_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.boost_duration_ms))
    }

    /// Read from a provider, falling back to defaults for bad values
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        let mut config = Self::new();

        let nr = provider.get_uint(KEY_NR_DOMAINS, DEFAULT_NR_DOMAINS as u64);
        match usize::try_from(nr) {
            Ok(n) if (1..=MAX_NR_DOMAINS).contains(&n) => config.nr_domains = n,
            _ => log::warn!(
                "QosArbiter: {} = {} out of range, using {}",
                KEY_NR_DOMAINS,
                nr,
                DEFAULT_NR_DOMAINS
            ),
        }

        let ms = provider.get_uint(KEY_BOOST_DURATION_MS, u64::from(DEFAULT_BOOST_DURATION_MS));
        match u32::try_from(ms) {
            Ok(ms) if ms > 0 => config.boost_duration_ms = ms,
            _ => log::warn!(
                "QosArbiter: {} = {} invalid, using {}",
                KEY_BOOST_DURATION_MS,
                ms,
                DEFAULT_BOOST_DURATION_MS
            ),
        }

        config
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::new()
    }
}
