//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Validated realm dependency graph."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::realm::{RealmId, ServiceHandle};

/// Read-only dependency graph over registered realms.
///
/// Edges point from a dependency to its dependent, so walking outgoing edges follows
/// startup order and walking incoming edges follows shutdown order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<RealmId, ()>,
    index: IndexMap<RealmId, NodeIndex>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, realm: &str) -> bool {
        self.index.contains_key(realm)
    }

    /// Realms in registration order.
    pub fn realms(&self) -> impl Iterator<Item = &RealmId> {
        self.index.keys()
    }

    /// Direct dependencies of `realm`, sorted.
    pub fn dependencies(&self, realm: &str) -> Vec<&RealmId> {
        self.neighbors(realm, Direction::Incoming)
    }

    /// Realms that declare a direct dependency on `realm`, sorted.
    pub fn dependents(&self, realm: &str) -> Vec<&RealmId> {
        self.neighbors(realm, Direction::Outgoing)
    }

    /// Every realm that depends on `realm` directly or through other realms.
    pub fn transitive_dependents(&self, realm: &str) -> BTreeSet<RealmId> {
        let Some(&start) = self.index.get(realm) else {
            return BTreeSet::new();
        };
        let mut reached = BTreeSet::new();
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(node) = bfs.next(&self.graph) {
            if node != start {
                reached.insert(self.graph[node].clone());
            }
        }
        reached
    }

    pub(crate) fn node(&self, realm: &str) -> Option<NodeIndex> {
        self.index.get(realm).copied()
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.index.values().copied()
    }

    pub(crate) fn realm_at(&self, node: NodeIndex) -> &RealmId {
        &self.graph[node]
    }

    pub(crate) fn neighbor_nodes(
        &self,
        node: NodeIndex,
        direction: Direction,
    ) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(node, direction)
    }

    fn neighbors(&self, realm: &str, direction: Direction) -> Vec<&RealmId> {
        let Some(node) = self.node(realm) else {
            return Vec::new();
        };
        let mut neighbors: Vec<&RealmId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|neighbor| &self.graph[neighbor])
            .collect();
        neighbors.sort();
        neighbors.dedup();
        neighbors
    }

    fn add_realm(&mut self, realm: RealmId) -> NodeIndex {
        let node = self.graph.add_node(realm.clone());
        self.index.insert(realm, node);
        node
    }

    /// Build a graph from raw edges without validation. Test-only.
    #[cfg(test)]
    pub(crate) fn from_edges_unchecked(realms: &[&str], edges: &[(&str, &str)]) -> Self {
        let mut graph = Self::default();
        for realm in realms {
            graph.add_realm(RealmId::from(*realm));
        }
        for (dependency, dependent) in edges {
            let from = graph.index[*dependency];
            let to = graph.index[*dependent];
            graph.graph.add_edge(from, to, ());
        }
        graph
    }
}

/// Validate the registration set and build its dependency graph.
///
/// Fails on duplicate ids, dependencies on unregistered realms, and cycles. The
/// cycle error carries the full path in "depends on" order, closed on its first realm.
pub fn build_graph(handles: &[ServiceHandle]) -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::default();
    for handle in handles {
        if graph.contains(handle.id().as_str()) {
            return Err(OrchestratorError::DuplicateRealm(handle.id().clone()));
        }
        graph.add_realm(handle.id().clone());
    }

    for handle in handles {
        let dependent = graph.index[handle.id().as_str()];
        for dependency in handle.dependencies() {
            let Some(&from) = graph.index.get(dependency.as_str()) else {
                return Err(OrchestratorError::UnknownDependency {
                    realm: handle.id().clone(),
                    dependency: dependency.clone(),
                });
            };
            graph.graph.add_edge(from, dependent, ());
        }
    }

    if let Some(path) = find_cycle(&graph) {
        return Err(OrchestratorError::CyclicDependency { path });
    }

    debug!(
        realms = graph.len(),
        edges = graph.graph.edge_count(),
        "dependency graph built"
    );
    Ok(graph)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search along dependency edges with an explicit recursion stack.
fn find_cycle(graph: &DependencyGraph) -> Option<Vec<RealmId>> {
    let mut marks = vec![Mark::Unvisited; graph.graph.node_count()];
    let mut stack = Vec::new();
    for root in graph.nodes() {
        if marks[root.index()] == Mark::Unvisited {
            if let Some(cycle) = visit(graph, root, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    graph: &DependencyGraph,
    node: NodeIndex,
    marks: &mut [Mark],
    stack: &mut Vec<NodeIndex>,
) -> Option<Vec<RealmId>> {
    marks[node.index()] = Mark::OnStack;
    stack.push(node);

    let mut dependencies: Vec<NodeIndex> = graph
        .neighbor_nodes(node, Direction::Incoming)
        .collect();
    dependencies.sort_by(|a, b| graph.realm_at(*a).cmp(graph.realm_at(*b)));

    for dependency in dependencies {
        match marks[dependency.index()] {
            Mark::OnStack => {
                let start = stack
                    .iter()
                    .position(|entry| *entry == dependency)
                    .unwrap_or_default();
                let mut path: Vec<RealmId> = stack[start..]
                    .iter()
                    .map(|entry| graph.realm_at(*entry).clone())
                    .collect();
                path.push(graph.realm_at(dependency).clone());
                return Some(path);
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(graph, dependency, marks, stack) {
                    return Some(cycle);
                }
            }
            Mark::Done => {}
        }
    }

    stack.pop();
    marks[node.index()] = Mark::Done;
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::{FnRealm, HealthReport};

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

    #[test]
    fn builds_dependencies_and_dependents() {
        let graph = build_graph(&[
            handle("city_manager", &[]),
            handle("content", &["city_manager"]),
            handle("insights", &["city_manager", "content"]),
        ])
        .expect("valid graph");

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependencies("insights"), ["city_manager", "content"]);
        assert_eq!(graph.dependents("city_manager"), ["content", "insights"]);
        let downstream: Vec<String> = graph
            .transitive_dependents("city_manager")
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(downstream, ["content", "insights"]);
        assert!(graph.transitive_dependents("insights").is_empty());
    }

    #[test]
    fn duplicate_realm_is_rejected() {
        let err = build_graph(&[handle("city_manager", &[]), handle("city_manager", &[])])
            .expect_err("duplicate");
        assert!(matches!(err, OrchestratorError::DuplicateRealm(id) if id.as_str() == "city_manager"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = build_graph(&[handle("content", &["librarian"])]).expect_err("unknown");
        match err {
            OrchestratorError::UnknownDependency { realm, dependency } => {
                assert_eq!(realm.as_str(), "content");
                assert_eq!(dependency.as_str(), "librarian");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cycle_reports_full_path() {
        let err = build_graph(&[
            handle("a", &["c"]),
            handle("b", &["a"]),
            handle("c", &["b"]),
            handle("d", &[]),
        ])
        .expect_err("cycle");
        match err {
            OrchestratorError::CyclicDependency { path } => {
                let path: Vec<&str> = path.iter().map(RealmId::as_str).collect();
                assert_eq!(path, ["a", "c", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = build_graph(&[handle("nurse", &["nurse"])]).expect_err("self cycle");
        assert_eq!(
            err.to_string(),
            "cyclic dependency detected: nurse -> nurse"
        );
    }

    #[test]
    fn empty_registration_builds_empty_graph() {
        let graph = build_graph(&[]).expect("empty graph");
        assert!(graph.is_empty());
    }
}
