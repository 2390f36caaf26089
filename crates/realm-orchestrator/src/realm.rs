//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Realm identifiers, service callbacks, and registration handles."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

/// Opaque identifier of a realm (e.g. `city_manager`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RealmId(String);

impl RealmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RealmId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for RealmId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for RealmId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RealmId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for RealmId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for RealmId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Answer returned by a realm's health callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub detail: String,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            detail: String::new(),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
        }
    }
}

/// Lifecycle callbacks supplied by the domain service owning a realm.
///
/// The orchestrator treats implementations as opaque. `start` should return once the
/// realm has been launched; readiness is established separately through `health`.
#[async_trait]
pub trait RealmService: Send + Sync + 'static {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn health(&self) -> anyhow::Result<HealthReport>;
}

type UnitFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type HealthFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<HealthReport>> + Send + Sync>;

/// [`RealmService`] assembled from three closures.
pub struct FnRealm {
    start: UnitFn,
    stop: UnitFn,
    health: HealthFn,
}

impl FnRealm {
    pub fn new<S, SF, T, TF, H, HF>(start: S, stop: T, health: H) -> Self
    where
        S: Fn() -> SF + Send + Sync + 'static,
        SF: Future<Output = anyhow::Result<()>> + Send + 'static,
        T: Fn() -> TF + Send + Sync + 'static,
        TF: Future<Output = anyhow::Result<()>> + Send + 'static,
        H: Fn() -> HF + Send + Sync + 'static,
        HF: Future<Output = anyhow::Result<HealthReport>> + Send + 'static,
    {
        Self {
            start: Box::new(move || start().boxed()),
            stop: Box::new(move || stop().boxed()),
            health: Box::new(move || health().boxed()),
        }
    }
}

impl fmt::Debug for FnRealm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRealm").finish_non_exhaustive()
    }
}

#[async_trait]
impl RealmService for FnRealm {
    async fn start(&self) -> anyhow::Result<()> {
        (self.start)().await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        (self.stop)().await
    }

    async fn health(&self) -> anyhow::Result<HealthReport> {
        (self.health)().await
    }
}

/// Registration record for one realm.
///
/// Handles are immutable once built; cloning shares the underlying service.
#[derive(Clone)]
pub struct ServiceHandle {
    id: RealmId,
    depends_on: BTreeSet<RealmId>,
    required: bool,
    grace_period: Duration,
    service: Arc<dyn RealmService>,
}

impl ServiceHandle {
    pub fn new(id: impl Into<RealmId>, service: Arc<dyn RealmService>) -> Self {
        Self {
            id: id.into(),
            depends_on: BTreeSet::new(),
            required: true,
            grace_period: Duration::ZERO,
            service,
        }
    }

    /// Convenience constructor wrapping an owned service.
    pub fn from_service<S: RealmService>(id: impl Into<RealmId>, service: S) -> Self {
        Self::new(id, Arc::new(service))
    }

    /// Declare realms that must be healthy before this one starts.
    pub fn depends_on<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<RealmId>,
    {
        self.depends_on
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Mark the realm optional: its failure degrades the platform without failing it.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// How long the realm may stay failed before the platform reports `Failed`.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn id(&self) -> &RealmId {
        &self.id
    }

    pub fn dependencies(&self) -> &BTreeSet<RealmId> {
        &self.depends_on
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn service(&self) -> &Arc<dyn RealmService> {
        &self.service
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .field("required", &self.required)
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_realm_forwards_callbacks() {
        let realm = FnRealm::new(
            || async { Ok(()) },
            || async { anyhow::bail!("stop refused") },
            || async { Ok(HealthReport::unhealthy("warming up")) },
        );
        assert!(realm.start().await.is_ok());
        assert_eq!(realm.stop().await.unwrap_err().to_string(), "stop refused");
        let report = realm.health().await.expect("health answered");
        assert!(!report.healthy);
        assert_eq!(report.detail, "warming up");
    }

    #[test]
    fn handle_builder_collects_dependencies() {
        let handle = ServiceHandle::from_service(
            "delivery_manager",
            FnRealm::new(
                || async { Ok(()) },
                || async { Ok(()) },
                || async { Ok(HealthReport::healthy()) },
            ),
        )
        .depends_on(["city_manager", "content", "city_manager"])
        .optional()
        .with_grace_period(Duration::from_secs(3));

        assert_eq!(handle.id().as_str(), "delivery_manager");
        let deps: Vec<&str> = handle.dependencies().iter().map(RealmId::as_str).collect();
        assert_eq!(deps, ["city_manager", "content"]);
        assert!(!handle.is_required());
        assert_eq!(handle.grace_period(), Duration::from_secs(3));
    }
}
