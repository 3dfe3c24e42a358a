use std::collections::BTreeMap;

use crate::core::{Edge, EdgeKind, UnitKind};

/// What a graph node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Unit(UnitKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    /// Id of the owning file node (a file node owns itself)
    pub group: String,
    pub kind: NodeKind,
    pub private: bool,
}

impl GraphNode {
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }
}

/// Weighted directed graph over file and unit nodes.
///
/// Import edges keep their raw accumulated weight; strengths are derived on
/// demand by normalizing against the source's heaviest outgoing edge. Git edges
/// are undirected in meaning and stored once per pair with a final strength.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    index: BTreeMap<String, usize>,
    imports: BTreeMap<(String, String), f64>,
    git: BTreeMap<(String, String), f64>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node; re-adding an existing id is a no-op.
    pub fn add_node(&mut self, node: GraphNode) {
        if self.index.contains_key(&node.id) {
            return;
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    /// Accumulates `weight` on the import edge `from -> to`.
    ///
    /// Returns false (and records nothing) for self-edges, non-positive weights
    /// and endpoints that are not nodes of the graph.
    pub fn add_edge(&mut self, from: &str, to: &str, weight: f64) -> bool {
        if from == to || weight <= 0.0 || !self.has_node(from) || !self.has_node(to) {
            return false;
        }
        *self
            .imports
            .entry((from.to_string(), to.to_string()))
            .or_insert(0.0) += weight;
        true
    }

    /// Records a co-change edge. The pair is stored with the smaller id first.
    pub fn add_git_edge(&mut self, a: &str, b: &str, strength: f64) -> bool {
        if a == b || !(strength > 0.0) || !self.has_node(a) || !self.has_node(b) {
            return false;
        }
        let key = if a < b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        self.git.insert(key, strength.min(1.0));
        true
    }

    /// Nodes in insertion order
    pub fn get_nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Raw accumulated import weights keyed by (source, target)
    pub fn raw_weights(&self) -> &BTreeMap<(String, String), f64> {
        &self.imports
    }

    pub fn import_edge_count(&self) -> usize {
        self.imports.len()
    }

    /// All edges with normalized strengths, import edges first, each kind in key order.
    pub fn get_edges(&self) -> Vec<Edge> {
        let mut max_out: BTreeMap<&str, f64> = BTreeMap::new();
        for ((from, _), weight) in &self.imports {
            let max = max_out.entry(from.as_str()).or_insert(0.0);
            *max = max.max(*weight);
        }

        let imports = self.imports.iter().map(|((from, to), weight)| Edge {
            source: from.clone(),
            target: to.clone(),
            kind: EdgeKind::Import,
            strength: weight / max_out[from.as_str()],
        });
        let git = self.git.iter().map(|((a, b), strength)| Edge {
            source: a.clone(),
            target: b.clone(),
            kind: EdgeKind::Git,
            strength: *strength,
        });
        imports.chain(git).collect()
    }
}
