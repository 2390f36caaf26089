//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Wave-ordered startup and reverse-order shutdown of realms."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use realm_logging::{
    log_lifecycle_event, realm_debug, realm_info, realm_warn, LifecycleOutcome, LifecyclePhase,
    LogContext,
};
use realm_metrics::LifecycleMetrics;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::error::Elapsed;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result, ShutdownError, StopFailure, StopFailureReason};
use crate::graph::{build_graph, DependencyGraph};
use crate::options::{ShutdownOptions, StartupOptions};
use crate::probe::{HealthProbe, HealthSample, ProbeOutcome};
use crate::realm::{RealmId, ServiceHandle};
use crate::report::{FailureReason, RealmFailure, StartupReport};
use crate::scheduler::{compute_waves, Wave};
use crate::status::{
    OverallStatus, PlatformStatus, RealmStatus, StatusAggregator, TransitionRecord,
};

/// Validated graph plus the waves derived from it.
#[derive(Debug)]
pub struct StartupPlan {
    graph: DependencyGraph,
    waves: Vec<Wave>,
}

impl StartupPlan {
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn waves(&self) -> &[Wave] {
        &self.waves
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Idle,
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// Root coordinator owning registrations, the derived plan, and every realm status.
///
/// A run is single-use: once `start` has been called, registration is closed and a
/// second `start` returns [`OrchestratorError::AlreadyStarted`].
pub struct LifecycleOrchestrator {
    pub(crate) handles: RwLock<Vec<ServiceHandle>>,
    plan: Mutex<Option<Arc<StartupPlan>>>,
    pub(crate) status: Arc<StatusAggregator>,
    pub(crate) metrics: Option<LifecycleMetrics>,
    pub(crate) run: Mutex<RunState>,
    launched: Mutex<BTreeSet<RealmId>>,
    run_id: Mutex<Option<Uuid>>,
}

impl Default for LifecycleOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleOrchestrator {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_metrics(metrics: LifecycleMetrics) -> Self {
        Self::build(Some(metrics))
    }

    fn build(metrics: Option<LifecycleMetrics>) -> Self {
        Self {
            handles: RwLock::new(Vec::new()),
            plan: Mutex::new(None),
            status: Arc::new(StatusAggregator::new(metrics.clone())),
            metrics,
            run: Mutex::new(RunState::Idle),
            launched: Mutex::new(BTreeSet::new()),
            run_id: Mutex::new(None),
        }
    }

    /// Add a realm. Invalidates the cached plan.
    ///
    /// An id that is already registered is rejected and leaves the registration
    /// set untouched.
    pub fn register(&self, handle: ServiceHandle) -> Result<()> {
        let run = self.run.lock();
        if *run != RunState::Idle {
            return Err(OrchestratorError::AlreadyStarted);
        }
        if self
            .handles
            .read()
            .iter()
            .any(|registered| registered.id() == handle.id())
        {
            return Err(OrchestratorError::DuplicateRealm(handle.id().clone()));
        }
        self.status.track(&handle);
        debug!(
            realm = %handle.id(),
            dependencies = handle.dependencies().len(),
            required = handle.is_required(),
            "realm registered"
        );
        self.handles.write().push(handle);
        *self.plan.lock() = None;
        drop(run);
        Ok(())
    }

    /// Withdraw a realm before startup so a rejected topology can be corrected.
    pub fn unregister(&self, realm: &str) -> Result<ServiceHandle> {
        let run = self.run.lock();
        if *run != RunState::Idle {
            return Err(OrchestratorError::AlreadyStarted);
        }
        let mut handles = self.handles.write();
        let Some(position) = handles.iter().position(|handle| handle.id().as_str() == realm)
        else {
            return Err(OrchestratorError::UnknownRealm(RealmId::from(realm)));
        };
        let handle = handles.remove(position);
        drop(handles);
        self.status.untrack(realm);
        *self.plan.lock() = None;
        drop(run);
        debug!(realm = %realm, "realm unregistered");
        Ok(handle)
    }

    pub fn register_all<I>(&self, handles: I) -> Result<()>
    where
        I: IntoIterator<Item = ServiceHandle>,
    {
        for handle in handles {
            self.register(handle)?;
        }
        Ok(())
    }

    /// Registered realm ids in registration order.
    pub fn realms(&self) -> Vec<RealmId> {
        self.handles
            .read()
            .iter()
            .map(|handle| handle.id().clone())
            .collect()
    }

    /// Build (or reuse) the validated graph and start waves.
    pub fn plan(&self) -> Result<Arc<StartupPlan>> {
        let mut cached = self.plan.lock();
        if let Some(plan) = cached.as_ref() {
            return Ok(plan.clone());
        }
        let handles = self.handles.read();
        let graph = build_graph(&handles)?;
        let waves = compute_waves(&graph)?;
        if let Some(metrics) = &self.metrics {
            metrics.set_wave_count(waves.len());
        }
        let plan = Arc::new(StartupPlan { graph, waves });
        *cached = Some(plan.clone());
        Ok(plan)
    }

    pub fn waves(&self) -> Result<Vec<Wave>> {
        Ok(self.plan()?.waves().to_vec())
    }

    pub fn report(&self) -> PlatformStatus {
        self.status.report()
    }

    pub fn per_realm_status(&self, realm: &str) -> Result<RealmStatus> {
        self.status.status_of(realm)
    }

    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.status.transitions()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionRecord> {
        self.status.subscribe()
    }

    pub fn health_history(&self, realm: &str) -> Result<Vec<HealthSample>> {
        self.status.health_history(realm)
    }

    /// Lifecycle collectors, when the orchestrator was built with metrics.
    pub fn metrics(&self) -> Option<&LifecycleMetrics> {
        self.metrics.as_ref()
    }

    pub fn aggregator(&self) -> Arc<StatusAggregator> {
        self.status.clone()
    }

    /// Correlation id of the most recent run.
    pub fn run_id(&self) -> Option<Uuid> {
        *self.run_id.lock()
    }

    /// Start every realm and return the platform status once all waves settled.
    pub async fn start(
        &self,
        cancel: &CancellationToken,
        options: StartupOptions,
    ) -> Result<PlatformStatus> {
        self.start_with_report(cancel, options)
            .await
            .map(|report| report.status)
    }

    /// Start every realm wave by wave.
    ///
    /// Planning errors leave the orchestrator idle so registration can be fixed.
    /// Per-realm failures are contained and listed in the report. Cancellation tears
    /// down every launched realm and returns [`OrchestratorError::Cancelled`].
    pub async fn start_with_report(
        &self,
        cancel: &CancellationToken,
        options: StartupOptions,
    ) -> Result<StartupReport> {
        let plan = {
            let mut run = self.run.lock();
            if *run != RunState::Idle {
                return Err(OrchestratorError::AlreadyStarted);
            }
            let plan = match self.plan() {
                Ok(plan) => plan,
                Err(err) => {
                    let ctx = LogContext::new().with_phase(LifecyclePhase::Planning);
                    log_lifecycle_event(
                        Some(&ctx),
                        "plan",
                        &err.to_string(),
                        LifecycleOutcome::Fault,
                    );
                    return Err(err);
                }
            };
            *run = RunState::Starting;
            plan
        };

        let run_id = Uuid::new_v4();
        *self.run_id.lock() = Some(run_id);
        self.launched.lock().clear();
        let run_label = run_id.to_string();
        let handles = self.handles_by_id();
        let probe = options.probe();
        let started_at = Instant::now();

        let mut started = Vec::new();
        let mut failures = Vec::new();
        let mut cancelled = false;

        info!(
            run_id = %run_id,
            realms = handles.len(),
            waves = plan.waves().len(),
            fail_fast = options.fail_fast,
            timeout_ms = options.per_realm_timeout.as_millis() as u64,
            "startup begins"
        );

        for wave in plan.waves() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let ctx = LogContext::new()
                .with_run_id(&run_label)
                .with_wave(wave.index())
                .with_phase(LifecyclePhase::Startup);

            let mut workers = JoinSet::new();
            for realm in wave.realms() {
                if self.status.status_of(realm.as_str()).ok() != Some(RealmStatus::Pending) {
                    continue;
                }
                let Some(handle) = handles.get(realm.as_str()) else {
                    continue;
                };
                self.status.record(realm, RealmStatus::Starting);
                self.launched.lock().insert(realm.clone());
                started.push(realm.clone());

                let worker = RealmWorker {
                    handle: handle.clone(),
                    probe,
                    budget: options.per_realm_timeout,
                    poll_interval: options.health_poll_interval,
                    status: self.status.clone(),
                    metrics: self.metrics.clone(),
                    cancel: cancel.clone(),
                    run_id: run_label.clone(),
                    wave: wave.index(),
                };
                let realm_id = realm.clone();
                workers.spawn(async move {
                    let began = Instant::now();
                    let result = AssertUnwindSafe(worker.run())
                        .catch_unwind()
                        .await
                        .unwrap_or(Err(FailureReason::Panicked));
                    (realm_id, began.elapsed(), result)
                });
            }
            realm_info!(context = ctx, "wave dispatched with {} realm(s)", workers.len());

            let mut wave_failed = false;
            while let Some(joined) = workers.join_next().await {
                let (realm, elapsed, result) = match joined {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        error!(run_id = %run_id, error = %err, "realm start task aborted");
                        wave_failed = true;
                        continue;
                    }
                };
                let realm_ctx = ctx.with_realm(realm.as_str());
                match result {
                    Ok(()) => {
                        if let Some(metrics) = &self.metrics {
                            metrics.observe_start(realm.as_str(), elapsed.as_secs_f64());
                        }
                        self.status.record(&realm, RealmStatus::Healthy);
                        realm_info!(context = realm_ctx, "realm healthy after {elapsed:?}");
                    }
                    Err(reason) => {
                        wave_failed = true;
                        cancelled |= reason == FailureReason::Cancelled;
                        self.status.record(&realm, RealmStatus::Failed);
                        realm_warn!(context = realm_ctx, "realm failed: {reason}");
                        if !options.fail_fast && !cancelled {
                            self.contain(&plan, &realm, &mut failures);
                        }
                        failures.push(RealmFailure { realm, reason });
                    }
                }
            }

            // A task that vanished without reporting leaves its realm short of the barrier.
            for realm in wave.realms() {
                let settled = self
                    .status
                    .status_of(realm.as_str())
                    .map_or(true, |status| status.is_terminal_for_startup());
                if !settled {
                    self.status.record(realm, RealmStatus::Failed);
                    failures.push(RealmFailure {
                        realm: realm.clone(),
                        reason: FailureReason::Panicked,
                    });
                }
            }
            realm_debug!(context = ctx, "wave barrier closed");

            if cancelled {
                break;
            }
            if wave_failed && options.fail_fast {
                for realm in self.status.realms_in(RealmStatus::Pending) {
                    self.status.record(&realm, RealmStatus::Failed);
                    failures.push(RealmFailure {
                        realm,
                        reason: FailureReason::Aborted,
                    });
                }
                realm_warn!(context = ctx, "fail-fast: remaining waves aborted");
                break;
            }
        }

        if cancelled {
            for realm in self.status.realms_in(RealmStatus::Pending) {
                self.status.record(&realm, RealmStatus::Failed);
            }
            let ctx = LogContext::new()
                .with_run_id(&run_label)
                .with_phase(LifecyclePhase::Startup);
            log_lifecycle_event(
                Some(&ctx),
                "startup",
                &format!("cancelled; tearing down {} launched realm(s)", started.len()),
                LifecycleOutcome::Fault,
            );
            *self.run.lock() = RunState::Stopping;
            let leftovers = self
                .teardown(&plan, None, &ShutdownOptions::default(), &run_label)
                .await;
            if !leftovers.is_empty() {
                warn!(
                    run_id = %run_id,
                    failures = leftovers.len(),
                    "teardown after cancellation left realms unclean"
                );
            }
            *self.run.lock() = RunState::Stopped;
            return Err(OrchestratorError::Cancelled);
        }

        *self.run.lock() = RunState::Started;
        let status = self.status.report();
        let outcome = match status.overall {
            OverallStatus::Healthy => LifecycleOutcome::Success,
            OverallStatus::Failed => LifecycleOutcome::Fault,
            _ => LifecycleOutcome::Partial,
        };
        let ctx = LogContext::new()
            .with_run_id(&run_label)
            .with_phase(LifecyclePhase::Startup);
        log_lifecycle_event(
            Some(&ctx),
            "startup",
            &format!(
                "{} realm(s) started, {} failure(s), platform {}",
                started.len(),
                failures.len(),
                status.overall
            ),
            outcome,
        );

        Ok(StartupReport {
            run_id,
            status,
            waves: plan.waves().to_vec(),
            started,
            failures,
            elapsed: started_at.elapsed(),
        })
    }

    /// Stop every launched realm in reverse wave order.
    ///
    /// Every wave is attempted regardless of earlier failures; all failures come back
    /// together as [`OrchestratorError::Shutdown`]. Stopping twice is a no-op.
    pub async fn stop(&self, cancel: &CancellationToken, options: ShutdownOptions) -> Result<()> {
        {
            let mut run = self.run.lock();
            match *run {
                RunState::Idle => return Err(OrchestratorError::NotStarted),
                RunState::Starting => return Err(OrchestratorError::StartupInProgress),
                RunState::Stopping | RunState::Stopped => {
                    debug!("shutdown already performed");
                    return Ok(());
                }
                RunState::Started => *run = RunState::Stopping,
            }
        }

        let plan = self.plan()?;
        let run_label = self.run_id().map(|id| id.to_string()).unwrap_or_default();
        let started_at = Instant::now();
        let failures = self
            .teardown(&plan, Some(cancel), &options, &run_label)
            .await;
        *self.run.lock() = RunState::Stopped;

        let ctx = LogContext::new()
            .with_run_id(&run_label)
            .with_phase(LifecyclePhase::Shutdown);
        if failures.is_empty() {
            log_lifecycle_event(
                Some(&ctx),
                "shutdown",
                &format!("all realms stopped in {:?}", started_at.elapsed()),
                LifecycleOutcome::Success,
            );
            Ok(())
        } else {
            log_lifecycle_event(
                Some(&ctx),
                "shutdown",
                &format!("{} realm(s) failed to stop cleanly", failures.len()),
                LifecycleOutcome::Partial,
            );
            Err(ShutdownError { failures }.into())
        }
    }

    fn handles_by_id(&self) -> IndexMap<RealmId, ServiceHandle> {
        self.handles
            .read()
            .iter()
            .map(|handle| (handle.id().clone(), handle.clone()))
            .collect()
    }

    /// Fail every pending realm downstream of `failed` without starting it.
    fn contain(&self, plan: &StartupPlan, failed: &RealmId, failures: &mut Vec<RealmFailure>) {
        for dependent in plan.graph().transitive_dependents(failed.as_str()) {
            if self.status.record(&dependent, RealmStatus::Failed) {
                debug!(realm = %dependent, dependency = %failed, "realm skipped after dependency failure");
                failures.push(RealmFailure {
                    realm: dependent,
                    reason: FailureReason::DependencyFailed {
                        dependency: failed.clone(),
                    },
                });
            }
        }
    }

    async fn teardown(
        &self,
        plan: &StartupPlan,
        cancel: Option<&CancellationToken>,
        options: &ShutdownOptions,
        run_label: &str,
    ) -> Vec<StopFailure> {
        let handles = self.handles_by_id();
        let launched = self.launched.lock().clone();
        let budget = options.per_realm_timeout;
        let mut failures = Vec::new();

        for wave in plan.waves().iter().rev() {
            let targets: Vec<ServiceHandle> = wave
                .realms()
                .iter()
                .filter(|realm| launched.contains(*realm))
                .filter(|realm| {
                    matches!(
                        self.status.status_of(realm.as_str()),
                        Ok(status) if status.is_running() || status == RealmStatus::Failed
                    )
                })
                .filter_map(|realm| handles.get(realm.as_str()).cloned())
                .collect();
            if targets.is_empty() {
                continue;
            }

            let ctx = LogContext::new()
                .with_run_id(run_label)
                .with_wave(wave.index())
                .with_phase(LifecyclePhase::Shutdown);
            realm_info!(context = ctx, "stopping {} realm(s)", targets.len());

            let mut stops = JoinSet::new();
            for handle in targets {
                self.status.record(handle.id(), RealmStatus::Stopping);
                let cancel_clone = cancel.cloned();
                stops.spawn(async move {
                    let realm = handle.id().clone();
                    let stop = AssertUnwindSafe(timeout(budget, handle.service().stop()))
                        .catch_unwind();
                    let outcome = match cancel_clone {
                        Some(token) => tokio::select! {
                            biased;
                            _ = token.cancelled() => Err(StopFailureReason::Cancelled),
                            result = stop => classify_stop(result, budget),
                        },
                        None => classify_stop(stop.await, budget),
                    };
                    (realm, outcome)
                });
            }

            while let Some(joined) = stops.join_next().await {
                match joined {
                    Ok((realm, outcome)) => {
                        self.status.record(&realm, RealmStatus::Stopped);
                        let realm_ctx = ctx.with_realm(realm.as_str());
                        match outcome {
                            Ok(()) => realm_debug!(context = realm_ctx, "realm stopped"),
                            Err(reason) => {
                                realm_warn!(context = realm_ctx, "realm forced to stopped: {reason}");
                                failures.push(StopFailure { realm, reason });
                            }
                        }
                    }
                    Err(err) => error!(error = %err, "realm stop task aborted"),
                }
            }

            for realm in wave.realms() {
                if self.status.status_of(realm.as_str()).ok() == Some(RealmStatus::Stopping) {
                    self.status.record(realm, RealmStatus::Stopped);
                    failures.push(StopFailure {
                        realm: realm.clone(),
                        reason: StopFailureReason::Panicked,
                    });
                }
            }
        }

        failures
    }
}

fn classify_stop(
    result: std::thread::Result<std::result::Result<anyhow::Result<()>, Elapsed>>,
    budget: Duration,
) -> std::result::Result<(), StopFailureReason> {
    match result {
        Err(_) => Err(StopFailureReason::Panicked),
        Ok(Err(_)) => Err(StopFailureReason::Timeout(budget)),
        Ok(Ok(Err(err))) => Err(StopFailureReason::Error(format!("{err:#}"))),
        Ok(Ok(Ok(()))) => Ok(()),
    }
}

/// Deadline used when a start budget does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Everything one realm's start task needs, owned so it can be spawned.
struct RealmWorker {
    handle: ServiceHandle,
    probe: HealthProbe,
    budget: Duration,
    poll_interval: Duration,
    status: Arc<StatusAggregator>,
    metrics: Option<LifecycleMetrics>,
    cancel: CancellationToken,
    run_id: String,
    wave: usize,
}

impl RealmWorker {
    /// Invoke `start`, then poll health until healthy or the budget is spent.
    async fn run(self) -> std::result::Result<(), FailureReason> {
        let realm = self.handle.id();
        let ctx = LogContext::new()
            .with_realm(realm.as_str())
            .with_wave(self.wave)
            .with_run_id(&self.run_id)
            .with_phase(LifecyclePhase::Startup);
        let now = Instant::now();
        let deadline = now.checked_add(self.budget).unwrap_or(now + FAR_FUTURE);

        let launched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FailureReason::Cancelled),
            result = timeout_at(deadline, self.handle.service().start()) => result,
        };
        match launched {
            Err(_) => {
                return Err(FailureReason::StartTimeout {
                    timeout: self.budget,
                })
            }
            Ok(Err(err)) => {
                return Err(FailureReason::StartFailed {
                    reason: format!("{err:#}"),
                })
            }
            Ok(Ok(())) => realm_debug!(context = ctx, "start returned; polling health"),
        }

        let mut last_probe_error = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FailureReason::Cancelled),
                result = self.probe.probe_within(&self.handle, remaining) => result,
            };
            self.status.record_probe(realm, ProbeOutcome::from(&result));
            match result {
                Ok(health) if health.healthy => return Ok(()),
                Ok(health) => {
                    last_probe_error = None;
                    realm_debug!(context = ctx, "not healthy yet: {}", health.detail);
                }
                Err(err) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_probe_failure(realm.as_str());
                    }
                    realm_warn!(context = ctx, "health probe failed: {err}");
                    last_probe_error = Some(err.to_string());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FailureReason::Cancelled),
                _ = sleep(self.poll_interval.min(remaining)) => {}
            }
        }

        Err(match last_probe_error {
            Some(reason) => FailureReason::HealthProbeFailed { reason },
            None => FailureReason::StartTimeout {
                timeout: self.budget,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::{FnRealm, HealthReport};

    fn healthy(id: &str) -> ServiceHandle {
        ServiceHandle::from_service(
            id,
            FnRealm::new(
                || async { Ok(()) },
                || async { Ok(()) },
                || async { Ok(HealthReport::healthy()) },
            ),
        )
    }

    #[tokio::test]
    async fn registration_closes_after_start() {
        let orchestrator = LifecycleOrchestrator::new();
        orchestrator.register(healthy("city_manager")).expect("register");
        orchestrator
            .start(&CancellationToken::new(), StartupOptions::default())
            .await
            .expect("start");

        let err = orchestrator.register(healthy("content")).expect_err("closed");
        assert!(matches!(err, OrchestratorError::AlreadyStarted));
        let err = orchestrator
            .start(&CancellationToken::new(), StartupOptions::default())
            .await
            .expect_err("single use");
        assert!(matches!(err, OrchestratorError::AlreadyStarted));
    }

    #[tokio::test]
    async fn planning_failure_leaves_orchestrator_idle() {
        let orchestrator = LifecycleOrchestrator::new();
        orchestrator
            .register(healthy("content").depends_on(["librarian"]))
            .expect("register");
        let err = orchestrator
            .start(&CancellationToken::new(), StartupOptions::default())
            .await
            .expect_err("unknown dependency");
        assert!(err.is_configuration());
        assert_eq!(
            orchestrator.per_realm_status("content").expect("tracked"),
            RealmStatus::Pending
        );

        orchestrator.register(healthy("librarian")).expect("still open");
        let status = orchestrator
            .start(&CancellationToken::new(), StartupOptions::default())
            .await
            .expect("start after fix");
        assert_eq!(status.overall, OverallStatus::Healthy);
    }

    #[tokio::test]
    async fn registration_invalidates_cached_plan() {
        let orchestrator = LifecycleOrchestrator::new();
        orchestrator.register(healthy("city_manager")).expect("register");
        assert_eq!(orchestrator.waves().expect("waves").len(), 1);
        orchestrator
            .register(healthy("content").depends_on(["city_manager"]))
            .expect("register");
        assert_eq!(orchestrator.waves().expect("waves").len(), 2);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected_and_set_stays_consistent() {
        let orchestrator = LifecycleOrchestrator::new();
        orchestrator.register(healthy("city_manager")).expect("register");
        let err = orchestrator
            .register(healthy("city_manager").optional())
            .expect_err("duplicate");
        assert!(matches!(err, OrchestratorError::DuplicateRealm(ref id) if id.as_str() == "city_manager"));
        assert_eq!(orchestrator.realms().len(), 1);
        assert_eq!(orchestrator.report().realms.len(), 1);
        assert!(orchestrator.report().realms[0].required);

        let status = orchestrator
            .start(&CancellationToken::new(), StartupOptions::default())
            .await
            .expect("start");
        assert_eq!(status.overall, OverallStatus::Healthy);
    }

    #[tokio::test]
    async fn cyclic_registration_can_be_corrected() {
        let orchestrator = LifecycleOrchestrator::new();
        orchestrator
            .register_all([
                healthy("content").depends_on(["librarian"]),
                healthy("librarian").depends_on(["content"]),
            ])
            .expect("register");
        let err = orchestrator
            .start(&CancellationToken::new(), StartupOptions::default())
            .await
            .expect_err("cycle");
        assert!(matches!(err, OrchestratorError::CyclicDependency { .. }));

        let removed = orchestrator.unregister("librarian").expect("unregister");
        assert_eq!(removed.id().as_str(), "librarian");
        assert!(matches!(
            orchestrator.per_realm_status("librarian"),
            Err(OrchestratorError::UnknownRealm(_))
        ));
        orchestrator.register(healthy("librarian")).expect("register fixed");

        let status = orchestrator
            .start(&CancellationToken::new(), StartupOptions::default())
            .await
            .expect("start after fix");
        assert_eq!(status.overall, OverallStatus::Healthy);
        assert!(matches!(
            orchestrator.unregister("content"),
            Err(OrchestratorError::AlreadyStarted)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_budget_does_not_fail_a_healthy_realm() {
        let orchestrator = LifecycleOrchestrator::new();
        orchestrator.register(healthy("agents")).expect("register");
        let report = orchestrator
            .start_with_report(
                &CancellationToken::new(),
                StartupOptions::default().with_timeout(Duration::MAX),
            )
            .await
            .expect("start");
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.status.realm("agents"), Some(RealmStatus::Healthy));
    }

    #[tokio::test]
    async fn stop_requires_a_started_run() {
        let orchestrator = LifecycleOrchestrator::new();
        let err = orchestrator
            .stop(&CancellationToken::new(), ShutdownOptions::default())
            .await
            .expect_err("not started");
        assert!(matches!(err, OrchestratorError::NotStarted));
    }

    #[tokio::test]
    async fn panicking_start_is_contained() {
        let orchestrator = LifecycleOrchestrator::new();
        orchestrator
            .register(ServiceHandle::from_service(
                "nurse",
                FnRealm::new(
                    || async { panic!("boom") },
                    || async { Ok(()) },
                    || async { Ok(HealthReport::healthy()) },
                ),
            ))
            .expect("register");
        orchestrator.register(healthy("content")).expect("register");

        let report = orchestrator
            .start_with_report(&CancellationToken::new(), StartupOptions::default())
            .await
            .expect("run completes");
        assert_eq!(
            report.failure_for("nurse").map(|failure| &failure.reason),
            Some(&FailureReason::Panicked)
        );
        assert_eq!(report.status.realm("content"), Some(RealmStatus::Healthy));
        assert_eq!(report.status.overall, OverallStatus::Failed);
    }
}
