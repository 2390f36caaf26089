//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Continuous health watch after startup."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use realm_metrics::LifecycleMetrics;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::orchestrator::{LifecycleOrchestrator, RunState};
use crate::probe::{HealthProbe, ProbeError, ProbeOutcome};
use crate::realm::ServiceHandle;
use crate::status::{RealmStatus, StatusAggregator};

/// Handle to a running health monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the monitor and wait for its current sweep to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "health monitor task join error");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl LifecycleOrchestrator {
    /// Probe every healthy or degraded realm each `interval`.
    ///
    /// Healthy realms that fail a probe become `Degraded`; degraded realms that
    /// probe healthy again return to `Healthy`. The monitor ends when `cancel` fires
    /// or the handle is shut down.
    pub fn spawn_monitor(
        &self,
        cancel: &CancellationToken,
        interval: Duration,
    ) -> Result<MonitorHandle> {
        if *self.run.lock() != RunState::Started {
            return Err(OrchestratorError::NotStarted);
        }
        if interval.is_zero() {
            return Err(OrchestratorError::Config(
                "monitor interval must be greater than zero".into(),
            ));
        }

        let token = cancel.child_token();
        let task_token = token.clone();
        let handles = self.handles.read().clone();
        let status = self.status.clone();
        let metrics = self.metrics.clone();
        let probe = HealthProbe::for_poll_interval(interval);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "health monitor started");
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = sweep(&handles, &status, metrics.as_ref(), probe) => {}
                }
            }
            debug!("health monitor stopped");
        });

        Ok(MonitorHandle { token, task })
    }
}

/// Probe every watched realm once, concurrently across realms.
async fn sweep(
    handles: &[ServiceHandle],
    status: &Arc<StatusAggregator>,
    metrics: Option<&LifecycleMetrics>,
    probe: HealthProbe,
) {
    let watched = handles.iter().filter(|handle| {
        matches!(
            status.status_of(handle.id().as_str()),
            Ok(RealmStatus::Healthy | RealmStatus::Degraded)
        )
    });
    let results = join_all(watched.map(|handle| async move {
        let result = AssertUnwindSafe(probe.probe(handle))
            .catch_unwind()
            .await
            .unwrap_or(Err(ProbeError::Panicked));
        (handle, result)
    }))
    .await;

    for (handle, result) in results {
        let realm = handle.id();
        let streak = status.record_probe(realm, ProbeOutcome::from(&result));
        let healthy = match &result {
            Ok(health) => {
                if !health.healthy {
                    debug!(realm = %realm, detail = %health.detail, "realm reported unhealthy");
                }
                health.healthy
            }
            Err(err) => {
                if let Some(metrics) = metrics {
                    metrics.record_probe_failure(realm.as_str());
                }
                warn!(realm = %realm, error = %err, streak, "health probe failed");
                false
            }
        };

        let current = status.status_of(realm.as_str()).ok();
        match (current, healthy) {
            (Some(RealmStatus::Healthy), false) => {
                if status.record(realm, RealmStatus::Degraded) {
                    warn!(realm = %realm, streak, "realm degraded");
                }
            }
            (Some(RealmStatus::Degraded), true) => {
                if status.record(realm, RealmStatus::Healthy) {
                    info!(realm = %realm, "realm recovered");
                }
            }
            _ => {}
        }
    }
}
