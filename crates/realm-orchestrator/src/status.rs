//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-realm status ownership and platform health aggregation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use realm_metrics::LifecycleMetrics;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::probe::{HealthHistory, HealthSample, ProbeOutcome};
use crate::realm::{RealmId, ServiceHandle};

/// Transitions retained for [`StatusAggregator::transitions`].
pub const TRANSITION_LOG_CAPACITY: usize = 1024;

const TRANSITION_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle status of a single realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RealmStatus {
    Pending,
    Starting,
    Healthy,
    Degraded,
    Failed,
    Stopping,
    Stopped,
}

impl RealmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RealmStatus::Pending => "pending",
            RealmStatus::Starting => "starting",
            RealmStatus::Healthy => "healthy",
            RealmStatus::Degraded => "degraded",
            RealmStatus::Failed => "failed",
            RealmStatus::Stopping => "stopping",
            RealmStatus::Stopped => "stopped",
        }
    }

    /// Wave barrier condition during startup.
    pub fn is_terminal_for_startup(&self) -> bool {
        matches!(self, RealmStatus::Healthy | RealmStatus::Failed)
    }

    /// Whether the realm has been launched and not yet torn down.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            RealmStatus::Starting | RealmStatus::Healthy | RealmStatus::Degraded
        )
    }

    pub fn can_transition_to(&self, next: RealmStatus) -> bool {
        use RealmStatus::*;
        matches!(
            (self, next),
            (Pending, Starting)
                | (Pending, Failed)
                | (Starting, Healthy)
                | (Starting, Failed)
                | (Starting, Stopping)
                | (Healthy, Degraded)
                | (Healthy, Stopping)
                | (Degraded, Healthy)
                | (Degraded, Failed)
                | (Degraded, Stopping)
                | (Failed, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for RealmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated platform health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Failed,
    Stopped,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Healthy => "healthy",
            OverallStatus::Degraded => "degraded",
            OverallStatus::Failed => "failed",
            OverallStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealmSnapshot {
    pub realm: RealmId,
    pub status: RealmStatus,
    pub required: bool,
}

/// Point-in-time view of every realm plus the derived overall status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformStatus {
    pub overall: OverallStatus,
    pub realms: Vec<RealmSnapshot>,
}

impl PlatformStatus {
    pub fn realm(&self, realm: &str) -> Option<RealmStatus> {
        self.realms
            .iter()
            .find(|snapshot| snapshot.realm.as_str() == realm)
            .map(|snapshot| snapshot.status)
    }

    pub fn count(&self, status: RealmStatus) -> usize {
        self.realms
            .iter()
            .filter(|snapshot| snapshot.status == status)
            .count()
    }

    pub fn is_healthy(&self) -> bool {
        self.overall == OverallStatus::Healthy
    }

    /// Lightweight JSON body for a collaborator-owned health endpoint.
    pub fn as_status_payload(&self) -> serde_json::Value {
        let realms: serde_json::Map<String, serde_json::Value> = self
            .realms
            .iter()
            .map(|snapshot| {
                (
                    snapshot.realm.to_string(),
                    serde_json::Value::from(snapshot.status.as_str()),
                )
            })
            .collect();
        serde_json::json!({
            "status": self.overall.as_str(),
            "healthy": self.count(RealmStatus::Healthy),
            "total": self.realms.len(),
            "realms": realms,
        })
    }
}

/// One accepted status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    pub realm: RealmId,
    pub from: RealmStatus,
    pub to: RealmStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct RealmEntry {
    status: RealmStatus,
    required: bool,
    grace_period: Duration,
    failed_since: Option<Instant>,
    history: HealthHistory,
}

impl RealmEntry {
    fn new(handle: &ServiceHandle) -> Self {
        Self {
            status: RealmStatus::Pending,
            required: handle.is_required(),
            grace_period: handle.grace_period(),
            failed_since: None,
            history: HealthHistory::default(),
        }
    }

    fn failed_past_grace(&self, now: Instant) -> bool {
        match (self.status, self.failed_since) {
            (RealmStatus::Failed, Some(since)) => {
                now.saturating_duration_since(since) >= self.grace_period
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    realms: IndexMap<RealmId, RealmEntry>,
    transitions: VecDeque<TransitionRecord>,
}

/// Owner of every realm's status. Reads are concurrent; writes come from the
/// orchestrator only.
#[derive(Debug)]
pub struct StatusAggregator {
    state: RwLock<AggregatorState>,
    events: broadcast::Sender<TransitionRecord>,
    metrics: Option<LifecycleMetrics>,
}

impl StatusAggregator {
    pub fn new(metrics: Option<LifecycleMetrics>) -> Self {
        let (events, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(AggregatorState::default()),
            events,
            metrics,
        }
    }

    /// Start tracking a realm as `Pending`. Re-tracking an id replaces its entry.
    pub(crate) fn track(&self, handle: &ServiceHandle) {
        let mut state = self.state.write();
        state
            .realms
            .insert(handle.id().clone(), RealmEntry::new(handle));
        if let Some(metrics) = &self.metrics {
            metrics.set_status(handle.id().as_str(), RealmStatus::Pending.as_str());
        }
    }

    /// Stop tracking a realm that was never started.
    pub(crate) fn untrack(&self, realm: &str) -> bool {
        self.state.write().realms.shift_remove(realm).is_some()
    }

    /// Apply a status change. Returns `false` when the change was a no-op or rejected.
    pub(crate) fn record(&self, realm: &RealmId, to: RealmStatus) -> bool {
        let mut state = self.state.write();
        let Some(entry) = state.realms.get_mut(realm) else {
            warn!(target: "realm::status", realm = %realm, to = %to, "status recorded for untracked realm");
            return false;
        };
        let from = entry.status;
        if from == to {
            return false;
        }
        if !from.can_transition_to(to) {
            warn!(
                target: "realm::status",
                realm = %realm,
                from = %from,
                to = %to,
                "rejected invalid status transition"
            );
            return false;
        }

        entry.status = to;
        entry.failed_since = (to == RealmStatus::Failed).then(Instant::now);

        let record = TransitionRecord {
            realm: realm.clone(),
            from,
            to,
            at: Utc::now(),
        };
        if state.transitions.len() == TRANSITION_LOG_CAPACITY {
            state.transitions.pop_front();
        }
        state.transitions.push_back(record.clone());
        drop(state);

        if let Some(metrics) = &self.metrics {
            metrics.record_transition(realm.as_str(), to.as_str());
        }
        debug!(target: "realm::status", realm = %realm, from = %from, to = %to, "status transition");
        // No subscribers is not an error.
        let _ = self.events.send(record);
        true
    }

    /// Append a probe sample; returns the length of the current failure streak.
    pub(crate) fn record_probe(&self, realm: &RealmId, outcome: ProbeOutcome) -> usize {
        match self.state.write().realms.get_mut(realm) {
            Some(entry) => {
                entry.history.push(outcome);
                entry.history.consecutive_failures()
            }
            None => 0,
        }
    }

    /// Derive the platform snapshot.
    pub fn report(&self) -> PlatformStatus {
        let state = self.state.read();
        let now = Instant::now();
        let realms: Vec<RealmSnapshot> = state
            .realms
            .iter()
            .map(|(realm, entry)| RealmSnapshot {
                realm: realm.clone(),
                status: entry.status,
                required: entry.required,
            })
            .collect();

        let overall = if state.realms.is_empty() {
            OverallStatus::Healthy
        } else if state
            .realms
            .values()
            .all(|entry| entry.status == RealmStatus::Stopped)
        {
            OverallStatus::Stopped
        } else if state
            .realms
            .values()
            .any(|entry| entry.required && entry.failed_past_grace(now))
        {
            OverallStatus::Failed
        } else if state
            .realms
            .values()
            .all(|entry| entry.status == RealmStatus::Healthy)
        {
            OverallStatus::Healthy
        } else {
            OverallStatus::Degraded
        };

        PlatformStatus { overall, realms }
    }

    pub fn status_of(&self, realm: &str) -> Result<RealmStatus> {
        self.state
            .read()
            .realms
            .get(realm)
            .map(|entry| entry.status)
            .ok_or_else(|| OrchestratorError::UnknownRealm(RealmId::from(realm)))
    }

    /// Retained transitions, oldest first.
    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.state.read().transitions.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionRecord> {
        self.events.subscribe()
    }

    pub fn health_history(&self, realm: &str) -> Result<Vec<HealthSample>> {
        self.state
            .read()
            .realms
            .get(realm)
            .map(|entry| entry.history.samples().cloned().collect())
            .ok_or_else(|| OrchestratorError::UnknownRealm(RealmId::from(realm)))
    }

    /// Realms currently in `status`, in registration order.
    pub(crate) fn realms_in(&self, status: RealmStatus) -> Vec<RealmId> {
        self.state
            .read()
            .realms
            .iter()
            .filter(|(_, entry)| entry.status == status)
            .map(|(realm, _)| realm.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::{FnRealm, HealthReport};

    fn handle(id: &str) -> ServiceHandle {
        ServiceHandle::from_service(
            id,
            FnRealm::new(
                || async { Ok(()) },
                || async { Ok(()) },
                || async { Ok(HealthReport::healthy()) },
            ),
        )
    }

    fn aggregator(handles: &[ServiceHandle]) -> StatusAggregator {
        let aggregator = StatusAggregator::new(None);
        for handle in handles {
            aggregator.track(handle);
        }
        aggregator
    }

    fn bring_up(aggregator: &StatusAggregator, realm: &str) {
        let realm = RealmId::from(realm);
        assert!(aggregator.record(&realm, RealmStatus::Starting));
        assert!(aggregator.record(&realm, RealmStatus::Healthy));
    }

    #[test]
    fn empty_registry_is_healthy() {
        assert_eq!(aggregator(&[]).report().overall, OverallStatus::Healthy);
    }

    #[test]
    fn pending_realms_degrade_until_all_healthy() {
        let aggregator = aggregator(&[handle("city_manager"), handle("content")]);
        assert_eq!(aggregator.report().overall, OverallStatus::Degraded);

        bring_up(&aggregator, "city_manager");
        bring_up(&aggregator, "content");
        let report = aggregator.report();
        assert_eq!(report.overall, OverallStatus::Healthy);
        assert_eq!(report, aggregator.report());
    }

    #[test]
    fn required_failure_fails_platform() {
        let aggregator = aggregator(&[handle("city_manager"), handle("content")]);
        bring_up(&aggregator, "content");
        assert!(aggregator.record(&"city_manager".into(), RealmStatus::Failed));
        assert_eq!(aggregator.report().overall, OverallStatus::Failed);
    }

    #[test]
    fn optional_failure_only_degrades() {
        let aggregator = aggregator(&[handle("city_manager"), handle("insights").optional()]);
        bring_up(&aggregator, "city_manager");
        assert!(aggregator.record(&"insights".into(), RealmStatus::Failed));
        assert_eq!(aggregator.report().overall, OverallStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_within_grace_period_degrades() {
        let aggregator = aggregator(&[
            handle("librarian").with_grace_period(Duration::from_secs(5)),
        ]);
        assert!(aggregator.record(&"librarian".into(), RealmStatus::Failed));
        assert_eq!(aggregator.report().overall, OverallStatus::Degraded);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(aggregator.report().overall, OverallStatus::Failed);
    }

    #[test]
    fn invalid_transition_is_ignored() {
        let aggregator = aggregator(&[handle("content")]);
        let realm = RealmId::from("content");
        assert!(!aggregator.record(&realm, RealmStatus::Healthy));
        assert!(!aggregator.record(&realm, RealmStatus::Pending));
        assert_eq!(aggregator.status_of("content").expect("tracked"), RealmStatus::Pending);
        assert!(aggregator.transitions().is_empty());
    }

    #[test]
    fn stopped_platform_reports_stopped() {
        let aggregator = aggregator(&[handle("content")]);
        let realm = RealmId::from("content");
        bring_up(&aggregator, "content");
        aggregator.record(&realm, RealmStatus::Stopping);
        assert_eq!(aggregator.report().overall, OverallStatus::Degraded);
        aggregator.record(&realm, RealmStatus::Stopped);
        assert_eq!(aggregator.report().overall, OverallStatus::Stopped);
        assert!(!aggregator.record(&realm, RealmStatus::Healthy));
    }

    #[test]
    fn registration_sets_gauge_without_counting_a_transition() {
        let registry = realm_metrics::new_registry();
        let metrics = LifecycleMetrics::new(registry.clone()).expect("metrics");
        let aggregator = StatusAggregator::new(Some(metrics));
        aggregator.track(&handle("content"));

        let body = realm_metrics::render(&registry).expect("render");
        assert!(body.contains(r#"realm_status{realm="content",status="pending"} 1"#));
        assert!(!body.contains(r#"to="pending""#));

        bring_up(&aggregator, "content");
        let body = realm_metrics::render(&registry).expect("render");
        assert!(body.contains(r#"realm_transitions_total{realm="content",to="healthy"} 1"#));
        assert!(body.contains(r#"realm_status{realm="content",status="pending"} 0"#));
    }

    #[test]
    fn unknown_realm_lookup_fails() {
        let err = aggregator(&[]).status_of("nurse").expect_err("unknown");
        assert!(matches!(err, OrchestratorError::UnknownRealm(id) if id.as_str() == "nurse"));
    }

    #[tokio::test]
    async fn transitions_are_logged_and_broadcast() {
        let aggregator = aggregator(&[handle("content")]);
        let mut events = aggregator.subscribe();
        bring_up(&aggregator, "content");

        let first = events.recv().await.expect("starting event");
        assert_eq!((first.from, first.to), (RealmStatus::Pending, RealmStatus::Starting));
        let second = events.recv().await.expect("healthy event");
        assert_eq!(second.to, RealmStatus::Healthy);

        let log = aggregator.transitions();
        assert_eq!(log.len(), 2);
        assert!(log[0].at <= log[1].at);
    }

    #[test]
    fn payload_lists_every_realm() {
        let aggregator = aggregator(&[handle("city_manager"), handle("content")]);
        bring_up(&aggregator, "city_manager");
        let payload = aggregator.report().as_status_payload();
        assert_eq!(payload["status"], "degraded");
        assert_eq!(payload["healthy"], 1);
        assert_eq!(payload["realms"]["content"], "pending");
    }
}
