//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Platform configuration model and loader."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_per_realm_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_health_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_file_output() -> bool {
    true
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_required() -> bool {
    true
}

/// Primary configuration object describing the realm topology and lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformConfig {
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Realm declarations keyed by realm id, in declaration order.
    #[serde(default)]
    pub realms: IndexMap<String, RealmConfig>,
}

/// Metadata describing where a [`PlatformConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedPlatformConfig {
    pub config: PlatformConfig,
    pub source: PathBuf,
}

impl PlatformConfig {
    pub const ENV_CONFIG_PATH: &str = "REALM_CONFIG";

    /// Load configuration from disk, respecting the `REALM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedPlatformConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedPlatformConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedPlatformConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Load and validate a configuration file at an explicit path.
    pub fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<PlatformConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Retrieve a realm declaration by identifier.
    pub fn realm(&self, realm_id: &str) -> Option<&RealmConfig> {
        self.realms.get(realm_id)
    }

    /// Validate structural invariants.
    ///
    /// Dependency resolution and cycle detection are left to the graph builder so
    /// that the same diagnostics apply to programmatic and file-based registration.
    pub fn validate(&self) -> Result<()> {
        if self.realms.is_empty() {
            return Err(anyhow!("configuration must declare at least one realm"));
        }
        for (realm_id, realm) in &self.realms {
            realm.validate(realm_id)?;
        }
        self.startup.validate()?;
        self.shutdown.validate()?;
        self.monitor.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for PlatformConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: PlatformConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Startup policy applied to every wave.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(rename = "per_realm_timeout_ms", default = "default_per_realm_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub per_realm_timeout: Duration,
    #[serde(
        rename = "health_poll_interval_ms",
        default = "default_health_poll_interval"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub health_poll_interval: Duration,
    #[serde(default)]
    pub fail_fast: bool,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            per_realm_timeout: default_per_realm_timeout(),
            health_poll_interval: default_health_poll_interval(),
            fail_fast: false,
        }
    }
}

impl StartupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.per_realm_timeout.is_zero() {
            return Err(anyhow!("startup.per_realm_timeout_ms must be greater than zero"));
        }
        if self.health_poll_interval.is_zero() {
            return Err(anyhow!(
                "startup.health_poll_interval_ms must be greater than zero"
            ));
        }
        if self.health_poll_interval > self.per_realm_timeout {
            return Err(anyhow!(
                "startup.health_poll_interval_ms ({}) exceeds per_realm_timeout_ms ({})",
                self.health_poll_interval.as_millis(),
                self.per_realm_timeout.as_millis()
            ));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(rename = "per_realm_timeout_ms", default = "default_shutdown_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub per_realm_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            per_realm_timeout: default_shutdown_timeout(),
        }
    }
}

impl ShutdownConfig {
    pub fn validate(&self) -> Result<()> {
        if self.per_realm_timeout.is_zero() {
            return Err(anyhow!(
                "shutdown.per_realm_timeout_ms must be greater than zero"
            ));
        }
        Ok(())
    }
}

/// Cadence of the continuous health watch that runs after startup.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(rename = "interval_ms", default = "default_monitor_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_monitor_interval(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("monitor.interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

/// Declaration of a single realm.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmConfig {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional realms degrade the platform instead of failing it.
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(rename = "grace_period_ms", default)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub grace_period: Duration,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            description: None,
            depends_on: Vec::new(),
            required: default_required(),
            grace_period: Duration::ZERO,
        }
    }
}

impl RealmConfig {
    pub fn validate(&self, realm_id: &str) -> Result<()> {
        if realm_id.trim().is_empty() {
            return Err(anyhow!("realm identifiers must not be blank"));
        }
        if self.depends_on.iter().any(|dep| dep.trim().is_empty()) {
            return Err(anyhow!(
                "realm '{}' declares a blank dependency",
                realm_id
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when neither `REALM_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Mirror events as JSON into a daily rolling file.
    #[serde(default = "default_file_output")]
    pub file_output: bool,
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file_output: default_file_output(),
            directory: default_logging_directory(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}
