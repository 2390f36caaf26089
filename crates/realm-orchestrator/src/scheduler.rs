//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Start wave computation over the dependency graph."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use petgraph::Direction;
use serde::Serialize;
use tracing::trace;

use crate::error::{OrchestratorError, Result};
use crate::graph::DependencyGraph;
use crate::realm::RealmId;

/// Set of realms that may start concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wave {
    index: usize,
    realms: Vec<RealmId>,
}

impl Wave {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Members sorted lexicographically.
    pub fn realms(&self) -> &[RealmId] {
        &self.realms
    }

    pub fn len(&self) -> usize {
        self.realms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.realms.is_empty()
    }

    pub fn contains(&self, realm: &str) -> bool {
        self.realms.iter().any(|member| member.as_str() == realm)
    }
}

/// Group realms into waves with Kahn layering.
///
/// A realm lands in the first wave after all of its dependencies have been placed.
pub fn compute_waves(graph: &DependencyGraph) -> Result<Vec<Wave>> {
    let mut pending: Vec<usize> = vec![0; graph.len()];
    for node in graph.nodes() {
        pending[node.index()] = graph.neighbor_nodes(node, Direction::Incoming).count();
    }

    let mut placed = vec![false; graph.len()];
    let mut remaining = graph.len();
    let mut waves = Vec::new();

    while remaining > 0 {
        let ready: Vec<_> = graph
            .nodes()
            .filter(|node| !placed[node.index()] && pending[node.index()] == 0)
            .collect();

        if ready.is_empty() {
            let mut stalled: Vec<RealmId> = graph
                .nodes()
                .filter(|node| !placed[node.index()])
                .map(|node| graph.realm_at(node).clone())
                .collect();
            stalled.sort();
            return Err(OrchestratorError::SchedulingStalled { remaining: stalled });
        }

        for node in &ready {
            placed[node.index()] = true;
            for dependent in graph.neighbor_nodes(*node, Direction::Outgoing) {
                pending[dependent.index()] = pending[dependent.index()].saturating_sub(1);
            }
        }
        remaining -= ready.len();

        let mut realms: Vec<RealmId> = ready
            .into_iter()
            .map(|node| graph.realm_at(node).clone())
            .collect();
        realms.sort();
        trace!(wave = waves.len(), members = ?realms, "wave computed");
        waves.push(Wave {
            index: waves.len(),
            realms,
        });
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::graph::build_graph;
    use crate::realm::{FnRealm, HealthReport, ServiceHandle};

    fn handle(id: &str, deps: &[&str]) -> ServiceHandle {
        ServiceHandle::from_service(
            id,
            FnRealm::new(
                || async { Ok(()) },
                || async { Ok(()) },
                || async { Ok(HealthReport::healthy()) },
            ),
        )
        .depends_on(deps.iter().copied())
    }

    fn names(wave: &Wave) -> Vec<&str> {
        wave.realms().iter().map(RealmId::as_str).collect()
    }

    #[test]
    fn layers_platform_topology() {
        let graph = build_graph(&[
            handle("librarian", &["city_manager"]),
            handle("city_manager", &[]),
            handle("content", &["city_manager"]),
            handle("agents", &[]),
            handle("delivery_manager", &["content", "librarian"]),
            handle("insights", &["delivery_manager"]),
        ])
        .expect("graph");
        let waves = compute_waves(&graph).expect("waves");

        assert_eq!(waves.len(), 4);
        assert_eq!(names(&waves[0]), ["agents", "city_manager"]);
        assert_eq!(names(&waves[1]), ["content", "librarian"]);
        assert_eq!(names(&waves[2]), ["delivery_manager"]);
        assert_eq!(names(&waves[3]), ["insights"]);
        assert_eq!(waves[2].index(), 2);
    }

    #[test]
    fn waves_cover_every_realm_once_after_dependencies() {
        let handles = [
            handle("a", &[]),
            handle("b", &["a"]),
            handle("c", &["a", "b"]),
            handle("d", &[]),
            handle("e", &["d", "c"]),
            handle("f", &["b"]),
        ];
        let graph = build_graph(&handles).expect("graph");
        let waves = compute_waves(&graph).expect("waves");

        let mut seen = HashSet::new();
        for wave in &waves {
            for realm in wave.realms() {
                assert!(seen.insert(realm.clone()), "{realm} placed twice");
            }
        }
        assert_eq!(seen.len(), handles.len());

        let wave_of = |realm: &str| {
            waves
                .iter()
                .position(|wave| wave.contains(realm))
                .expect("placed")
        };
        for handle in &handles {
            for dependency in handle.dependencies() {
                assert!(wave_of(dependency.as_str()) < wave_of(handle.id().as_str()));
            }
        }
    }

    #[test]
    fn empty_graph_has_no_waves() {
        let graph = build_graph(&[]).expect("graph");
        assert!(compute_waves(&graph).expect("waves").is_empty());
    }

    #[test]
    fn unresolvable_graph_stalls() {
        let graph = DependencyGraph::from_edges_unchecked(
            &["a", "b", "c"],
            &[("a", "b"), ("b", "a")],
        );
        let err = compute_waves(&graph).expect_err("stall");
        match err {
            OrchestratorError::SchedulingStalled { remaining } => {
                let remaining: Vec<&str> = remaining.iter().map(RealmId::as_str).collect();
                assert_eq!(remaining, ["a", "b"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
