//! Timing configuration for waits and retries.
//!
//! Configuration is read from TOML. Every key is optional; missing keys fall
//! back to defaults tuned for slow cloud control planes (a cache cluster takes
//! minutes to provision, and a delete can be rejected for a while after its
//! dependents are gone).
//!
//! ```toml
//! [wait]
//! timeout_ms = 600000
//! initial_delay_ms = 10000
//! poll_interval_ms = 3000
//! backoff_growth = 1.5
//! max_poll_interval_ms = 10000
//!
//! [retry]
//! overall_timeout_ms = 300000
//! initial_delay_ms = 500
//! max_delay_ms = 10000
//! multiplier = 2.0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::{Result, ResultExt};

const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10 * 60 * 1000;
const DEFAULT_WAIT_INITIAL_DELAY_MS: u64 = 10_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 10_000;

const DEFAULT_RETRY_TIMEOUT_MS: u64 = 5 * 60 * 1000;
const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 500;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvergeConfig {
    /// Cadence and budget for state waits.
    pub wait: WaitTimingConfig,
    /// Cadence and budget for retried operations.
    pub retry: RetryTimingConfig,
}

/// `[wait]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaitTimingConfig {
    /// Give up after this long.
    pub timeout_ms: u64,
    /// Sleep before the first probe.
    pub initial_delay_ms: u64,
    /// Minimum spacing between probes.
    pub poll_interval_ms: u64,
    /// Multiply the poll interval by this after each pending probe.
    pub backoff_growth: Option<f64>,
    /// Upper bound for a grown poll interval.
    pub max_poll_interval_ms: u64,
}

impl Default for WaitTimingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            initial_delay_ms: DEFAULT_WAIT_INITIAL_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            backoff_growth: None,
            max_poll_interval_ms: DEFAULT_MAX_POLL_INTERVAL_MS,
        }
    }
}

impl WaitTimingConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    /// Check the invariants a wait relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero timeout or poll interval,
    /// a growth factor below 1.0 (or not finite), or a cap below the poll
    /// interval while growth is enabled.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::invalid_config("wait.timeout_ms must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::invalid_config(
                "wait.poll_interval_ms must be positive",
            ));
        }
        if let Some(growth) = self.backoff_growth {
            validate_growth("wait.backoff_growth", growth)?;
            if self.max_poll_interval_ms < self.poll_interval_ms {
                return Err(Error::invalid_config(format!(
                    "wait.max_poll_interval_ms ({}) is below wait.poll_interval_ms ({})",
                    self.max_poll_interval_ms, self.poll_interval_ms
                )));
            }
        }
        Ok(())
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryTimingConfig {
    /// Stop retrying transient failures after this long.
    pub overall_timeout_ms: u64,
    /// Delay after the first failure.
    pub initial_delay_ms: u64,
    /// Upper bound for the delay between attempts.
    pub max_delay_ms: u64,
    /// Delay growth per attempt. `1.0` gives a fixed cadence.
    pub multiplier: f64,
}

impl Default for RetryTimingConfig {
    fn default() -> Self {
        Self {
            overall_timeout_ms: DEFAULT_RETRY_TIMEOUT_MS,
            initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
        }
    }
}

impl RetryTimingConfig {
    #[must_use]
    pub const fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check the invariants a retry loop relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero timeout, a multiplier
    /// below 1.0, or a max delay below the initial delay.
    pub fn validate(&self) -> Result<()> {
        if self.overall_timeout_ms == 0 {
            return Err(Error::invalid_config(
                "retry.overall_timeout_ms must be positive",
            ));
        }
        validate_growth("retry.multiplier", self.multiplier)?;
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::invalid_config(format!(
                "retry.max_delay_ms ({}) is below retry.initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        Ok(())
    }
}

impl ConvergeConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TomlParseFailed`] for malformed TOML or unknown keys,
    /// and [`Error::InvalidConfig`] when a value fails validation.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigReadFailed`] if the file cannot be read, plus
    /// everything [`ConvergeConfig::from_toml_str`] can return.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config_read_failed(path, e.to_string()))?;
        tracing::debug!(path = %path.display(), "Loaded converge config");
        Self::from_toml_str(&raw).warn_on_error(&path.display().to_string())
    }

    /// Validate both sections.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::InvalidConfig`] found.
    pub fn validate(&self) -> Result<()> {
        self.wait.validate()?;
        self.retry.validate()
    }
}

fn validate_growth(key: &str, growth: f64) -> Result<()> {
    if growth.is_finite() && growth >= 1.0 {
        Ok(())
    } else {
        Err(Error::invalid_config(format!(
            "{key} must be a finite number >= 1.0, got {growth}"
        )))
    }
}
