//! Flow table configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default idle timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default firing precision of the retransmit scheduler in milliseconds.
pub const DEFAULT_RETRANSMIT_PRECISION_MS: u64 = 1;

/// Behaviour flags
pub mod flags {
    /// Classify on the direction-agnostic form of the key
    pub const CANONICAL_KEYS: u32 = 0x01;
    /// Return packets of flows refused by a full table instead of dropping them
    pub const PUNT_ON_FULL: u32 = 0x02;

    /// Flag names accepted in configuration files.
    pub(crate) const NAMES: &[(&str, u32)] = &[("canonical", CANONICAL_KEYS), ("punt", PUNT_ON_FULL)];
}

/// Flow table configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowTableConfig {
    /// Base number of flow slots
    pub capacity: usize,
    /// Extra slots appended to the capacity
    pub reserve: usize,
    /// Idle time after which a flow is evicted
    pub timeout: Duration,
    /// Diagnostic detail level
    pub verbose: u8,
    /// Behaviour flags, see [`flags`]
    pub flags: u32,
    /// Firing precision of retransmission timers
    pub retransmit_precision_ms: u64,
}

impl FlowTableConfig {
    /// Create a configuration with `capacity` slots and default options.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            reserve: 0,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            verbose: 0,
            flags: 0,
            retransmit_precision_ms: DEFAULT_RETRANSMIT_PRECISION_MS,
        }
    }

    /// Set the number of reserve slots.
    pub fn with_reserve(mut self, reserve: usize) -> Self {
        self.reserve = reserve;
        self
    }

    /// Set the idle timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set behaviour flags.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Set the diagnostic level.
    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    /// Total number of flow slots.
    pub fn table_size(&self) -> usize {
        self.capacity.saturating_add(self.reserve)
    }

    /// Idle timeout in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Check if a flag is set.
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::config("capacity must be greater than 0"));
        }
        let too_large = || Error::config("capacity + reserve exceeds the addressable slot count");
        let size = self.capacity.checked_add(self.reserve).ok_or_else(too_large)?;
        if size > u32::MAX as usize - 1 {
            return Err(too_large());
        }
        if self.timeout_ms() == 0 {
            return Err(Error::config("timeout must be at least 1ms"));
        }
        Ok(())
    }
}

/// Configuration file format for serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct FlowTableConfigFile {
    /// Base number of flow slots
    pub capacity: usize,
    /// Extra slots appended to the capacity
    #[serde(default)]
    pub reserve: usize,
    /// Idle timeout (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Diagnostic detail level
    #[serde(default)]
    pub verbose: u8,
    /// Behaviour flags by name (`canonical`, `punt`)
    #[serde(default)]
    pub flags: Vec<String>,
    /// Retransmission timer precision (milliseconds)
    #[serde(default = "default_retransmit_precision_ms")]
    pub retransmit_precision_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retransmit_precision_ms() -> u64 {
    DEFAULT_RETRANSMIT_PRECISION_MS
}

impl FlowTableConfigFile {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ConfigFile(e.to_string()))
    }

    /// Convert to runtime configuration.
    pub fn to_config(&self) -> Result<FlowTableConfig> {
        let mut flag_bits = 0;
        for name in &self.flags {
            let bit = flags::NAMES
                .iter()
                .find(|(n, _)| *n == name.as_str())
                .map(|(_, bit)| *bit)
                .ok_or_else(|| Error::config(format!("unknown flag: {}", name)))?;
            flag_bits |= bit;
        }

        let config = FlowTableConfig {
            capacity: self.capacity,
            reserve: self.reserve,
            timeout: Duration::from_millis(self.timeout_ms),
            verbose: self.verbose,
            flags: flag_bits,
            retransmit_precision_ms: self.retransmit_precision_ms,
        };
        config.validate()?;

        Ok(config)
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &FlowTableConfig) -> Self {
        Self {
            capacity: config.capacity,
            reserve: config.reserve,
            timeout_ms: config.timeout_ms(),
            verbose: config.verbose,
            flags: flags::NAMES
                .iter()
                .filter(|(_, bit)| config.has_flag(*bit))
                .map(|(name, _)| name.to_string())
                .collect(),
            retransmit_precision_ms: config.retransmit_precision_ms,
        }
    }
}
