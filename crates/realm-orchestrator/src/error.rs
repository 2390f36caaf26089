//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error taxonomy for planning, startup, and shutdown."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::realm::RealmId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

/// Errors surfaced by the orchestrator.
///
/// Planning errors (`DuplicateRealm`, `UnknownDependency`, `CyclicDependency`,
/// `SchedulingStalled`) abort a run before any realm is started. Per-realm runtime
/// errors are recorded against the realm and reported through [`crate::StartupReport`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("realm '{0}' is registered more than once")]
    DuplicateRealm(RealmId),
    #[error("realm '{realm}' depends on unknown realm '{dependency}'")]
    UnknownDependency { realm: RealmId, dependency: RealmId },
    #[error("cyclic dependency detected: {}", format_path(.path))]
    CyclicDependency { path: Vec<RealmId> },
    #[error("realm '{realm}' did not report healthy within {timeout:?}")]
    RealmStartTimeout { realm: RealmId, timeout: Duration },
    #[error("realm '{realm}' failed to start: {reason}")]
    RealmStartFailed { realm: RealmId, reason: String },
    #[error("health probe for realm '{realm}' kept failing: {reason}")]
    RealmHealthProbeFailed { realm: RealmId, reason: String },
    #[error("scheduling stalled with unplaced realms: {}", format_list(.remaining))]
    SchedulingStalled { remaining: Vec<RealmId> },
    #[error("orchestrator has already started; registration is closed")]
    AlreadyStarted,
    #[error("orchestrator has not been started")]
    NotStarted,
    #[error("startup is still in progress; cancel it before shutting down")]
    StartupInProgress,
    #[error("unknown realm '{0}'")]
    UnknownRealm(RealmId),
    #[error("startup cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl OrchestratorError {
    /// Whether the error stems from an invalid registration set.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            OrchestratorError::DuplicateRealm(_)
                | OrchestratorError::UnknownDependency { .. }
                | OrchestratorError::CyclicDependency { .. }
                | OrchestratorError::Config(_)
        )
    }
}

/// Why a single realm failed to stop cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopFailureReason {
    /// The stop callback returned an error.
    Error(String),
    /// The stop callback did not return within the per-realm budget.
    Timeout(Duration),
    /// The stop callback panicked.
    Panicked,
    /// Shutdown was cancelled before the realm confirmed.
    Cancelled,
}

impl fmt::Display for StopFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopFailureReason::Error(reason) => write!(f, "{reason}"),
            StopFailureReason::Timeout(timeout) => write!(f, "timed out after {timeout:?}"),
            StopFailureReason::Panicked => f.write_str("stop callback panicked"),
            StopFailureReason::Cancelled => f.write_str("shutdown cancelled"),
        }
    }
}

/// One realm that did not stop cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopFailure {
    pub realm: RealmId,
    pub reason: StopFailureReason,
}

impl fmt::Display for StopFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.realm, self.reason)
    }
}

/// Aggregate of every stop failure collected during a best-effort shutdown.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} realm(s) failed to stop cleanly: {}", .failures.len(), format_list(.failures))]
pub struct ShutdownError {
    pub failures: Vec<StopFailure>,
}

impl ShutdownError {
    /// Failure recorded for a specific realm, if any.
    pub fn failure_for(&self, realm: &str) -> Option<&StopFailure> {
        self.failures.iter().find(|failure| failure.realm.as_str() == realm)
    }
}

fn format_path(path: &[RealmId]) -> String {
    path.iter()
        .map(RealmId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
