//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Startup and shutdown policies."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use realm_common::{ShutdownConfig, StartupConfig};

use crate::probe::HealthProbe;

pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Policy applied to every realm during startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupOptions {
    /// Budget covering the `start` call and the wait for a healthy probe.
    pub per_realm_timeout: Duration,
    pub health_poll_interval: Duration,
    /// Abort every remaining wave after the first failed wave.
    pub fail_fast: bool,
    /// Per-probe bound; defaults to the poll interval with a 100ms floor.
    pub probe_timeout: Option<Duration>,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            per_realm_timeout: DEFAULT_START_TIMEOUT,
            health_poll_interval: DEFAULT_HEALTH_POLL_INTERVAL,
            fail_fast: false,
            probe_timeout: None,
        }
    }
}

impl StartupOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_realm_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.health_poll_interval = interval;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    pub(crate) fn probe(&self) -> HealthProbe {
        match self.probe_timeout {
            Some(timeout) => HealthProbe::new(timeout),
            None => HealthProbe::for_poll_interval(self.health_poll_interval),
        }
    }
}

impl From<&StartupConfig> for StartupOptions {
    fn from(config: &StartupConfig) -> Self {
        Self {
            per_realm_timeout: config.per_realm_timeout,
            health_poll_interval: config.health_poll_interval,
            fail_fast: config.fail_fast,
            probe_timeout: None,
        }
    }
}

/// Policy applied to every realm during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownOptions {
    pub per_realm_timeout: Duration,
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self {
            per_realm_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl ShutdownOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_realm_timeout = timeout;
        self
    }
}

impl From<&ShutdownConfig> for ShutdownOptions {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            per_realm_timeout: config.per_realm_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let startup = StartupOptions::default();
        assert_eq!(startup.per_realm_timeout, Duration::from_secs(30));
        assert_eq!(startup.health_poll_interval, Duration::from_millis(500));
        assert!(!startup.fail_fast);
        assert_eq!(startup.probe().timeout(), Duration::from_millis(500));
        assert_eq!(ShutdownOptions::default().per_realm_timeout, Duration::from_secs(10));
    }

    #[test]
    fn converts_from_config() {
        let config: StartupConfig = toml::from_str(
            "per_realm_timeout_ms = 2000\nhealth_poll_interval_ms = 50\nfail_fast = true\n",
        )
        .expect("startup section");
        let options = StartupOptions::from(&config);
        assert_eq!(options.per_realm_timeout, Duration::from_secs(2));
        assert!(options.fail_fast);
        assert_eq!(options.probe().timeout(), Duration::from_millis(100));
    }
}
