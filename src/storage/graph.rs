//! Aggregate call network.
//!
//! A simple directed graph keyed by node name. File nodes carry
//! [`NodeRole::File`]; every other node is a qualified function name. Edges
//! carry an [`Action`], and adding a second edge between the same pair
//! replaces the action of the first.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Kind of relationship an edge records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// File defines a block-local function.
    Define,
    /// File exports a function (including its synthetic main).
    Export,
    /// Function calls a function.
    Call,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Define => "define",
            Self::Export => "export",
            Self::Call => "call",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkNode {
    pub name: String,
    pub role: Option<NodeRole>,
}

impl NetworkNode {
    pub fn is_file(&self) -> bool {
        self.role == Some(NodeRole::File)
    }
}

/// The whole-program call network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "NetworkSnapshot", from = "NetworkSnapshot")]
pub struct CallNetwork {
    graph: DiGraph<NetworkNode, Action>,
    node_map: HashMap<String, NodeIndex>,
}

impl CallNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or mark) a file node.
    pub fn ensure_file(&mut self, relative_path: &str) -> NodeIndex {
        let idx = self.ensure_symbol(relative_path);
        self.graph[idx].role = Some(NodeRole::File);
        idx
    }

    /// Add a node if missing. An existing node keeps its role.
    pub fn ensure_symbol(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(NetworkNode {
            name: name.to_string(),
            role: None,
        });
        self.node_map.insert(name.to_string(), idx);
        idx
    }

    /// Add `from -action-> to`, creating missing endpoints.
    pub fn add_edge(&mut self, from: &str, to: &str, action: Action) {
        let from_idx = self.ensure_symbol(from);
        let to_idx = self.ensure_symbol(to);
        self.graph.update_edge(from_idx, to_idx, action);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node_map.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&NetworkNode> {
        self.node_map.get(name).map(|&idx| &self.graph[idx])
    }

    pub fn is_file(&self, name: &str) -> bool {
        self.node(name).is_some_and(NetworkNode::is_file)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NetworkNode> {
        self.graph.node_weights()
    }

    /// Action of the edge `from -> to`, if present.
    pub fn edge(&self, from: &str, to: &str) -> Option<Action> {
        let from_idx = *self.node_map.get(from)?;
        let to_idx = *self.node_map.get(to)?;
        let edge = self.graph.find_edge(from_idx, to_idx)?;
        self.graph.edge_weight(edge).copied()
    }

    /// All edges as `(from, to, action)`.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, Action)> {
        self.graph.edge_references().map(|edge| {
            (
                self.graph[edge.source()].name.as_str(),
                self.graph[edge.target()].name.as_str(),
                *edge.weight(),
            )
        })
    }

    /// Every node with a path to `name`, excluding `name` itself.
    pub fn ancestors(&self, name: &str) -> Option<BTreeSet<String>> {
        self.reachable(name, Direction::Incoming)
    }

    /// Every node reachable from `name`, excluding `name` itself.
    pub fn descendants(&self, name: &str) -> Option<BTreeSet<String>> {
        self.reachable(name, Direction::Outgoing)
    }

    fn reachable(&self, name: &str, direction: Direction) -> Option<BTreeSet<String>> {
        let start = *self.node_map.get(name)?;
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut found = BTreeSet::new();

        while let Some(idx) = queue.pop_front() {
            for next in self.graph.neighbors_directed(idx, direction) {
                if seen.insert(next) {
                    found.insert(self.graph[next].name.clone());
                    queue.push_back(next);
                }
            }
        }
        Some(found)
    }

    /// Direct callers of `name` (sources of incoming `call` edges).
    pub fn callers(&self, name: &str) -> Vec<String> {
        self.neighbors_by_action(name, Direction::Incoming, Action::Call)
    }

    /// Direct callees of `name` (targets of outgoing `call` edges).
    pub fn callees(&self, name: &str) -> Vec<String> {
        self.neighbors_by_action(name, Direction::Outgoing, Action::Call)
    }

    /// Symbols a file exports, its synthetic main included.
    pub fn file_exports(&self, file: &str) -> Vec<String> {
        self.neighbors_by_action(file, Direction::Outgoing, Action::Export)
    }

    /// Block-local functions a file defines.
    pub fn file_defines(&self, file: &str) -> Vec<String> {
        self.neighbors_by_action(file, Direction::Outgoing, Action::Define)
    }

    fn neighbors_by_action(&self, name: &str, direction: Direction, action: Action) -> Vec<String> {
        let Some(&idx) = self.node_map.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .graph
            .edges_directed(idx, direction)
            .filter(|edge| *edge.weight() == action)
            .map(|edge| {
                let other = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                self.graph[other].name.clone()
            })
            .collect();
        names.sort();
        names
    }

    /// Non-file nodes that nothing calls.
    pub fn entry_points(&self) -> Vec<String> {
        let mut entries: Vec<String> = self
            .graph
            .node_indices()
            .filter(|&idx| !self.graph[idx].is_file())
            .filter(|&idx| {
                !self
                    .graph
                    .edges_directed(idx, Direction::Incoming)
                    .any(|edge| *edge.weight() == Action::Call)
            })
            .map(|idx| self.graph[idx].name.clone())
            .collect();
        entries.sort();
        entries
    }

    /// Non-file nodes ranked by in-degree, highest first; ties by name.
    pub fn most_called(&self, limit: usize) -> Vec<(String, usize)> {
        let mut ranked: Vec<(String, usize)> = self
            .graph
            .node_indices()
            .filter(|&idx| !self.graph[idx].is_file())
            .map(|idx| {
                let degree = self.graph.edges_directed(idx, Direction::Incoming).count();
                (self.graph[idx].name.clone(), degree)
            })
            .filter(|(_, degree)| *degree > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    /// Simple paths from `source` to `target` with at most `max_depth` edges.
    ///
    /// Stops after `max_paths` paths. Neighbours are explored in name order,
    /// so the result is deterministic.
    pub fn call_paths(
        &self,
        source: &str,
        target: &str,
        max_depth: usize,
        max_paths: usize,
    ) -> Vec<Vec<String>> {
        let (Some(&from_idx), Some(&to_idx)) =
            (self.node_map.get(source), self.node_map.get(target))
        else {
            return Vec::new();
        };

        let mut paths = Vec::new();
        if max_paths == 0 {
            return paths;
        }
        let mut current_path = Vec::new();
        let mut on_path = HashSet::new();
        self.dfs_paths(
            from_idx,
            to_idx,
            max_depth,
            max_paths,
            &mut current_path,
            &mut on_path,
            &mut paths,
        );
        paths
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_paths(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        remaining: usize,
        max_paths: usize,
        current_path: &mut Vec<NodeIndex>,
        on_path: &mut HashSet<NodeIndex>,
        all_paths: &mut Vec<Vec<String>>,
    ) {
        current_path.push(current);

        if current == target {
            all_paths.push(
                current_path
                    .iter()
                    .map(|&idx| self.graph[idx].name.clone())
                    .collect(),
            );
            current_path.pop();
            return;
        }

        if remaining > 0 {
            on_path.insert(current);

            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(current, Direction::Outgoing)
                .filter(|idx| !on_path.contains(idx))
                .collect();
            next.sort_by(|a, b| self.graph[*a].name.cmp(&self.graph[*b].name));
            next.dedup();

            for idx in next {
                if all_paths.len() >= max_paths {
                    break;
                }
                self.dfs_paths(
                    idx,
                    target,
                    remaining - 1,
                    max_paths,
                    current_path,
                    on_path,
                    all_paths,
                );
            }

            on_path.remove(&current);
        }

        current_path.pop();
    }

    /// Sorted, serializable form of the network.
    pub fn snapshot(&self) -> NetworkSnapshot {
        let mut nodes: Vec<SnapshotNode> = self
            .graph
            .node_weights()
            .map(|node| SnapshotNode {
                name: node.name.clone(),
                role: node.role,
            })
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut edges: Vec<SnapshotEdge> = self
            .edges()
            .map(|(from, to, action)| SnapshotEdge {
                from: from.to_string(),
                to: to.to_string(),
                action,
            })
            .collect();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));

        NetworkSnapshot { nodes, edges }
    }
}

/// Networks are equal when they have the same named nodes, roles and edges.
impl PartialEq for CallNetwork {
    fn eq(&self, other: &Self) -> bool {
        self.node_count() == other.node_count()
            && self.edge_count() == other.edge_count()
            && self.snapshot() == other.snapshot()
    }
}

impl Eq for CallNetwork {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<NodeRole>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub from: String,
    pub to: String,
    pub action: Action,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub nodes: Vec<SnapshotNode>,
    pub edges: Vec<SnapshotEdge>,
}

impl From<CallNetwork> for NetworkSnapshot {
    fn from(network: CallNetwork) -> Self {
        network.snapshot()
    }
}

impl From<NetworkSnapshot> for CallNetwork {
    fn from(snapshot: NetworkSnapshot) -> Self {
        let mut network = CallNetwork::new();
        for node in &snapshot.nodes {
            match node.role {
                Some(NodeRole::File) => network.ensure_file(&node.name),
                None => network.ensure_symbol(&node.name),
            };
        }
        for edge in &snapshot.edges {
            network.add_edge(&edge.from, &edge.to, edge.action);
        }
        network
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ensure_symbol_is_idempotent() {
        let mut network = CallNetwork::new();
        let a = network.ensure_symbol("a.run");
        let b = network.ensure_symbol("a.run");
        assert_eq!(a, b);
        assert_eq!(network.node_count(), 1);
    }

    #[test]
    fn test_file_role_survives_symbol_lookup() {
        let mut network = CallNetwork::new();
        network.ensure_file("/a.lua");
        network.ensure_symbol("/a.lua");
        assert!(network.is_file("/a.lua"));
    }

    #[test]
    fn test_parallel_edges_collapse_later_wins() {
        let mut network = CallNetwork::new();
        network.add_edge("/a.lua", "foo", Action::Define);
        network.add_edge("/a.lua", "foo", Action::Export);

        assert_eq!(network.edge_count(), 1);
        assert_eq!(network.edge("/a.lua", "foo"), Some(Action::Export));
    }

    #[test]
    fn test_ancestors_and_descendants_exclude_self() {
        let mut network = CallNetwork::new();
        network.add_edge("main", "helper", Action::Call);
        network.add_edge("helper", "os.execute", Action::Call);
        network.add_edge("other", "os.execute", Action::Call);

        let ancestors = network.ancestors("os.execute").unwrap();
        assert_eq!(
            ancestors.into_iter().collect::<Vec<_>>(),
            names(&["helper", "main", "other"])
        );

        let descendants = network.descendants("main").unwrap();
        assert_eq!(
            descendants.into_iter().collect::<Vec<_>>(),
            names(&["helper", "os.execute"])
        );

        assert!(network.ancestors("missing").is_none());
    }

    #[test]
    fn test_cycle_does_not_include_self() {
        let mut network = CallNetwork::new();
        network.add_edge("a", "b", Action::Call);
        network.add_edge("b", "a", Action::Call);

        let ancestors = network.ancestors("a").unwrap();
        assert_eq!(ancestors.into_iter().collect::<Vec<_>>(), names(&["b"]));
    }

    #[test]
    fn test_entry_points_skip_files_and_called_nodes() {
        let mut network = CallNetwork::new();
        network.ensure_file("/a.lua");
        network.add_edge("/a.lua", "a.main.0000abcd", Action::Export);
        network.add_edge("a.main.0000abcd", "init", Action::Call);
        network.add_edge("/a.lua", "foo", Action::Define);

        assert_eq!(network.entry_points(), names(&["a.main.0000abcd", "foo"]));
    }

    #[test]
    fn test_callers_callees_and_file_edges() {
        let mut network = CallNetwork::new();
        network.ensure_file("/m.lua");
        network.add_edge("/m.lua", "m.run", Action::Export);
        network.add_edge("/m.lua", "helper", Action::Define);
        network.add_edge("m.run", "helper", Action::Call);
        network.add_edge("m.run", "print", Action::Call);

        assert_eq!(network.callees("m.run"), names(&["helper", "print"]));
        assert_eq!(network.callers("helper"), names(&["m.run"]));
        assert_eq!(network.file_exports("/m.lua"), names(&["m.run"]));
        assert_eq!(network.file_defines("/m.lua"), names(&["helper"]));
        assert!(network.callers("missing").is_empty());
    }

    #[test]
    fn test_most_called_ranks_by_in_degree() {
        let mut network = CallNetwork::new();
        network.ensure_file("/a.lua");
        network.add_edge("/a.lua", "x", Action::Export);
        network.add_edge("x", "log", Action::Call);
        network.add_edge("y", "log", Action::Call);
        network.add_edge("y", "x", Action::Call);

        let ranked = network.most_called(10);
        assert_eq!(
            ranked,
            vec![("log".to_string(), 2), ("x".to_string(), 2)]
        );
        assert_eq!(network.most_called(1).len(), 1);
    }

    #[test]
    fn test_call_paths_respect_limits() {
        let mut network = CallNetwork::new();
        // 1 -> 2 -> 4, 1 -> 3 -> 4, 1 -> 4
        network.add_edge("n1", "n2", Action::Call);
        network.add_edge("n1", "n3", Action::Call);
        network.add_edge("n2", "n4", Action::Call);
        network.add_edge("n3", "n4", Action::Call);
        network.add_edge("n1", "n4", Action::Call);

        let paths = network.call_paths("n1", "n4", 5, 10);
        assert_eq!(paths.len(), 3);
        for path in &paths {
            assert_eq!(path.first().map(String::as_str), Some("n1"));
            assert_eq!(path.last().map(String::as_str), Some("n4"));
        }

        let short = network.call_paths("n1", "n4", 1, 10);
        assert_eq!(short, vec![names(&["n1", "n4"])]);

        let capped = network.call_paths("n1", "n4", 5, 2);
        assert_eq!(capped.len(), 2);

        assert!(network.call_paths("n4", "n1", 5, 10).is_empty());
    }

    #[test]
    fn test_call_paths_terminate_on_cycles() {
        let mut network = CallNetwork::new();
        network.add_edge("a", "b", Action::Call);
        network.add_edge("b", "a", Action::Call);
        network.add_edge("b", "c", Action::Call);

        let paths = network.call_paths("a", "c", 10, 10);
        assert_eq!(paths, vec![names(&["a", "b", "c"])]);
    }

    #[test]
    fn test_snapshot_rebuilds_equal_network() {
        let mut network = CallNetwork::new();
        network.ensure_file("/a.lua");
        network.add_edge("/a.lua", "foo", Action::Define);
        network.add_edge("foo", "bar", Action::Call);

        let json = serde_json::to_string(&network).unwrap();
        let back: CallNetwork = serde_json::from_str(&json).unwrap();

        assert_eq!(back, network);
        assert!(back.is_file("/a.lua"));
        assert_eq!(back.edge("foo", "bar"), Some(Action::Call));
    }
}
