//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives for the realm orchestrator workspace."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Configuration loading and tracing bootstrap shared across the realm
//! orchestrator workspace.

pub mod config;
pub mod logging;

pub use config::{
    LoadedPlatformConfig, LoggingConfig, MetricsConfig, MonitorConfig, PlatformConfig,
    RealmConfig, ShutdownConfig, StartupConfig,
};
pub use logging::{init_tracing, LogFormat};
