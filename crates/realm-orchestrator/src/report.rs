//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Outcome summary of a startup run."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::realm::RealmId;
use crate::scheduler::Wave;
use crate::status::PlatformStatus;

/// Why a realm ended startup in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// No healthy probe within the per-realm budget.
    StartTimeout { timeout: Duration },
    /// The start callback returned an error.
    StartFailed { reason: String },
    /// The budget ran out while the health callback itself was failing.
    HealthProbeFailed { reason: String },
    /// The start or health callback panicked.
    Panicked,
    /// Skipped because a dependency failed.
    DependencyFailed { dependency: RealmId },
    /// Skipped because an earlier wave failed under fail-fast.
    Aborted,
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StartTimeout { timeout } => {
                write!(f, "not healthy within {timeout:?}")
            }
            FailureReason::StartFailed { reason } => write!(f, "start failed: {reason}"),
            FailureReason::HealthProbeFailed { reason } => {
                write!(f, "health probe failing: {reason}")
            }
            FailureReason::Panicked => f.write_str("realm task panicked"),
            FailureReason::DependencyFailed { dependency } => {
                write!(f, "dependency '{dependency}' failed")
            }
            FailureReason::Aborted => f.write_str("startup aborted after an earlier failure"),
            FailureReason::Cancelled => f.write_str("startup cancelled"),
        }
    }
}

/// One realm that did not become healthy during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealmFailure {
    pub realm: RealmId,
    pub reason: FailureReason,
}

impl RealmFailure {
    /// Express the failure through the crate error taxonomy.
    pub fn to_error(&self) -> OrchestratorError {
        let realm = self.realm.clone();
        match &self.reason {
            FailureReason::StartTimeout { timeout } => OrchestratorError::RealmStartTimeout {
                realm,
                timeout: *timeout,
            },
            FailureReason::HealthProbeFailed { reason } => {
                OrchestratorError::RealmHealthProbeFailed {
                    realm,
                    reason: reason.clone(),
                }
            }
            FailureReason::Cancelled => OrchestratorError::Cancelled,
            other => OrchestratorError::RealmStartFailed {
                realm,
                reason: other.to_string(),
            },
        }
    }

    /// Whether the realm's start callback was never invoked.
    pub fn was_skipped(&self) -> bool {
        matches!(
            self.reason,
            FailureReason::DependencyFailed { .. } | FailureReason::Aborted
        )
    }
}

/// Summary returned by [`crate::LifecycleOrchestrator::start_with_report`].
#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub run_id: Uuid,
    pub status: PlatformStatus,
    pub waves: Vec<Wave>,
    /// Realms whose start callback was invoked, in dispatch order.
    pub started: Vec<RealmId>,
    pub failures: Vec<RealmFailure>,
    pub elapsed: Duration,
}

impl StartupReport {
    pub fn failure_for(&self, realm: &str) -> Option<&RealmFailure> {
        self.failures
            .iter()
            .find(|failure| failure.realm.as_str() == realm)
    }

    pub fn was_started(&self, realm: &str) -> bool {
        self.started.iter().any(|started| started.as_str() == realm)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_map_onto_error_taxonomy() {
        let timeout = RealmFailure {
            realm: "content".into(),
            reason: FailureReason::StartTimeout {
                timeout: Duration::from_secs(2),
            },
        };
        assert!(matches!(
            timeout.to_error(),
            OrchestratorError::RealmStartTimeout { timeout, .. } if timeout == Duration::from_secs(2)
        ));

        let skipped = RealmFailure {
            realm: "insights".into(),
            reason: FailureReason::DependencyFailed {
                dependency: "content".into(),
            },
        };
        assert!(skipped.was_skipped());
        assert_eq!(
            skipped.to_error().to_string(),
            "realm 'insights' failed to start: dependency 'content' failed"
        );
    }
}
