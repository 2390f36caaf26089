//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binds configured realm declarations to service implementations."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use realm_common::PlatformConfig;
use realm_metrics::{new_registry, LifecycleMetrics};
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::orchestrator::LifecycleOrchestrator;
use crate::realm::{RealmId, RealmService, ServiceHandle};

/// Service implementations keyed by the realm id they serve.
#[derive(Default)]
pub struct RealmCatalog {
    services: IndexMap<RealmId, Arc<dyn RealmService>>,
}

impl RealmCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<S: RealmService>(self, realm: impl Into<RealmId>, service: S) -> Self {
        self.bind_shared(realm, Arc::new(service))
    }

    pub fn bind_shared(mut self, realm: impl Into<RealmId>, service: Arc<dyn RealmService>) -> Self {
        self.services.insert(realm.into(), service);
        self
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Build one handle per configured realm, in declaration order.
    pub fn handles(&self, config: &PlatformConfig) -> Result<Vec<ServiceHandle>> {
        let mut handles = Vec::with_capacity(config.realms.len());
        for (realm_id, realm) in &config.realms {
            let Some(service) = self.services.get(realm_id.as_str()) else {
                return Err(OrchestratorError::Config(format!(
                    "realm '{realm_id}' is configured but no service is bound to it"
                )));
            };
            handles.push(
                ServiceHandle::new(realm_id.as_str(), service.clone())
                    .depends_on(realm.depends_on.iter().map(String::as_str))
                    .with_required(realm.required)
                    .with_grace_period(realm.grace_period),
            );
        }
        for bound in self.services.keys() {
            if !config.realms.contains_key(bound.as_str()) {
                warn!(realm = %bound, "service bound to a realm missing from configuration");
            }
        }
        Ok(handles)
    }
}

impl fmt::Debug for RealmCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealmCatalog")
            .field("realms", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LifecycleOrchestrator {
    /// Validate `config`, bind every configured realm, and register the result.
    ///
    /// With `[metrics] enabled`, lifecycle collectors are registered on a fresh
    /// registry reachable through [`LifecycleOrchestrator::metrics`].
    pub fn from_config(config: &PlatformConfig, catalog: &RealmCatalog) -> Result<Self> {
        config
            .validate()
            .map_err(|err| OrchestratorError::Config(format!("{err:#}")))?;
        let handles = catalog.handles(config)?;
        let orchestrator = if config.metrics.enabled {
            let metrics = LifecycleMetrics::new(new_registry()).map_err(|err| {
                OrchestratorError::Config(format!("metrics registration failed: {err:#}"))
            })?;
            LifecycleOrchestrator::with_metrics(metrics)
        } else {
            LifecycleOrchestrator::new()
        };
        orchestrator.register_all(handles)?;
        info!(
            realms = config.realms.len(),
            metrics = config.metrics.enabled,
            "orchestrator assembled from configuration"
        );
        Ok(orchestrator)
    }
}
