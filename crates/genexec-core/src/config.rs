//! Broker configuration.
//!
//! Defaults suit a build that invokes a handful of generators many times:
//! a small cache, entries dropped after an hour of inactivity.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default maximum number of cached execution contexts.
pub const DEFAULT_MAX_ENTRIES: usize = 5;

/// Default inactivity period after which a cached context is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Configuration for [`crate::ExecBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Maximum number of cached contexts (at least 1).
    pub max_entries: usize,

    /// Contexts unused for this long are evicted.
    pub idle_timeout: Duration,

    /// Host eligible launchers in-process. When false every run is a subprocess.
    pub in_process: bool,

    /// Directory holding shadow copies of loaded libraries.
    pub shadow_dir: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            in_process: true,
            shadow_dir: std::env::temp_dir().join("genexec-shadow"),
        }
    }
}

impl BrokerConfig {
    /// Defaults overridden by `GENEXEC_*` environment variables.
    ///
    /// - `GENEXEC_CACHE_SIZE` - maximum cached contexts
    /// - `GENEXEC_IDLE_SECS` - idle timeout in seconds
    /// - `GENEXEC_IN_PROCESS` - `0`/`false` disables in-process hosting
    /// - `GENEXEC_SHADOW_DIR` - shadow copy directory
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Self::from_env`] but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("GENEXEC_CACHE_SIZE") {
            config.max_entries = value.trim().parse().map_err(|_| {
                Error::Config(format!("GENEXEC_CACHE_SIZE is not a number: {:?}", value))
            })?;
        }

        if let Some(value) = lookup("GENEXEC_IDLE_SECS") {
            let secs: u64 = value.trim().parse().map_err(|_| {
                Error::Config(format!("GENEXEC_IDLE_SECS is not a number: {:?}", value))
            })?;
            config.idle_timeout = Duration::from_secs(secs);
        }

        if let Some(value) = lookup("GENEXEC_IN_PROCESS") {
            config.in_process = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(Error::Config(format!(
                        "GENEXEC_IN_PROCESS must be a boolean, got {:?}",
                        other
                    )));
                }
            };
        }

        if let Some(value) = lookup("GENEXEC_SHADOW_DIR") {
            config.shadow_dir = PathBuf::from(value);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the maximum number of cached contexts.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Enable or disable in-process hosting.
    pub fn with_in_process(mut self, in_process: bool) -> Self {
        self.in_process = in_process;
        self
    }

    /// Set the shadow copy directory.
    pub fn with_shadow_dir(mut self, shadow_dir: impl Into<PathBuf>) -> Self {
        self.shadow_dir = shadow_dir.into();
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::Config(
                "cache must hold at least one entry".to_string(),
            ));
        }
        Ok(())
    }
}
