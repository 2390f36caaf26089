//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle kernel coordinating realm startup, health, and shutdown."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Dependency-ordered lifecycle orchestration for realms.
//!
//! Realms are registered as [`ServiceHandle`]s, validated into a
//! [`DependencyGraph`], and layered into [`Wave`]s. [`LifecycleOrchestrator::start`]
//! launches each wave concurrently and waits for every member to become healthy or
//! fail before moving on; [`LifecycleOrchestrator::stop`] replays the waves in
//! reverse. Status for every realm lives in the [`StatusAggregator`].

pub mod catalog;
pub mod error;
pub mod graph;
pub mod monitor;
pub mod options;
pub mod orchestrator;
pub mod probe;
pub mod realm;
pub mod report;
pub mod scheduler;
pub mod status;

pub use catalog::RealmCatalog;
pub use error::{OrchestratorError, Result, ShutdownError, StopFailure, StopFailureReason};
pub use graph::{build_graph, DependencyGraph};
pub use monitor::MonitorHandle;
pub use options::{ShutdownOptions, StartupOptions};
pub use orchestrator::{LifecycleOrchestrator, StartupPlan};
pub use probe::{
    HealthHistory, HealthProbe, HealthResult, HealthSample, ProbeError, ProbeOutcome,
};
pub use realm::{FnRealm, HealthReport, RealmId, RealmService, ServiceHandle};
pub use report::{FailureReason, RealmFailure, StartupReport};
pub use scheduler::{compute_waves, Wave};
pub use status::{
    OverallStatus, PlatformStatus, RealmSnapshot, RealmStatus, StatusAggregator,
    TransitionRecord,
};
pub use tokio_util::sync::CancellationToken;
