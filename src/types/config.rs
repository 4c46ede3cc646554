//! Backend configuration
//!
//! Capacity, idle-eviction and registry settings, with a builder pattern
//! for easy configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SessionError};

/// Default cap on resident sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Default idle time before a resident session becomes evictable (30 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default cap on active mappings per user
pub const DEFAULT_MAX_SESSIONS_PER_USER: usize = 5;

// ============================================================================
// Backend Config
// ============================================================================

/// Settings for `SessionBackend` and the surface registries
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Maximum number of resident sessions
    pub max_sessions: usize,
    /// Idle time after which a resident session may be evicted
    pub idle_timeout: Duration,
    /// Interval for the background idle sweep (`None` disables it)
    pub sweep_interval: Option<Duration>,
    /// Maximum active mappings per user in a registry
    pub max_sessions_per_user: usize,
    /// Directory holding one registry file per surface
    pub registry_dir: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: None,
            max_sessions_per_user: DEFAULT_MAX_SESSIONS_PER_USER,
            registry_dir: PathBuf::from(".session-broker"),
        }
    }
}

impl BackendConfig {
    /// Create a new builder for `BackendConfig`
    #[must_use]
    pub fn builder() -> BackendConfigBuilder {
        BackendConfigBuilder::default()
    }

    /// Registry file for a surface, e.g. `<registry_dir>/slack_sessions.json`
    #[must_use]
    pub fn registry_path(&self, surface: &str) -> PathBuf {
        self.registry_dir.join(format!("{surface}_sessions.json"))
    }

    /// Check the settings are usable
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a capacity is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(SessionError::invalid_config("max_sessions must be at least 1"));
        }
        if self.max_sessions_per_user == 0 {
            return Err(SessionError::invalid_config(
                "max_sessions_per_user must be at least 1",
            ));
        }
        if self.sweep_interval.is_some_and(|d| d.is_zero()) {
            return Err(SessionError::invalid_config("sweep_interval must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Builder for BackendConfig
// ============================================================================

/// Builder for `BackendConfig`
#[derive(Debug, Default)]
pub struct BackendConfigBuilder {
    config: BackendConfig,
}

impl BackendConfigBuilder {
    /// Set the resident session cap
    #[must_use]
    pub const fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    /// Set the idle eviction threshold
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Enable the background idle sweep
    #[must_use]
    pub const fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = Some(interval);
        self
    }

    /// Set the per-user active mapping cap
    #[must_use]
    pub const fn max_sessions_per_user(mut self, max: usize) -> Self {
        self.config.max_sessions_per_user = max;
        self
    }

    /// Set the registry directory
    #[must_use]
    pub fn registry_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.registry_dir = dir.into();
        self
    }

    /// Build the config
    #[must_use]
    pub fn build(self) -> BackendConfig {
        self.config
    }
}
