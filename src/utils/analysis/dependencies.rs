//! Dependency graph construction
//!
//! The unit graph is built once from the resolver output; the module graph is
//! always derived from it by contraction so the two levels cannot disagree.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::{FileNode, Incident, IncidentStage};
use crate::utils::analysis::graph::{DependencyGraph, GraphNode, NodeKind};
use crate::utils::analysis::imports::ResolvedFile;

/// Both levels of the dependency graph
#[derive(Debug, Clone, Default)]
pub struct BuiltGraphs {
    /// File nodes plus their units
    pub units: DependencyGraph,
    /// File nodes only
    pub modules: DependencyGraph,
}

pub fn file_graph_node(file: &FileNode) -> GraphNode {
    GraphNode {
        id: file.path.clone(),
        label: file.module.clone(),
        group: file.path.clone(),
        kind: NodeKind::File,
        private: file.is_private(),
    }
}

/// Folds the units of every plain module shadowed by a package of the same
/// dotted name (`pkg/a.py` next to `pkg/a/__init__.py`) into its file node.
///
/// Both files would claim the same unit ids. Imports already resolve to the
/// package, so the module keeps its file node and its references, attributed
/// to the file itself.
pub fn fold_shadowed_modules(files: &mut [FileNode]) -> Vec<Incident> {
    let packages: BTreeMap<String, String> = files
        .iter()
        .filter(|f| f.is_init)
        .map(|f| (f.module.clone(), f.path.clone()))
        .collect();

    let mut incidents = Vec::new();
    for file in files.iter_mut().filter(|f| !f.is_init) {
        let Some(package) = packages.get(&file.module) else {
            continue;
        };
        if file.units.is_empty() {
            continue;
        }
        let units = std::mem::take(&mut file.units);
        for unit in units {
            file.module_references.extend(unit.references);
        }
        incidents.push(Incident {
            path: file.path.clone(),
            stage: IncidentStage::Resolve,
            message: format!(
                "module {} is shadowed by package {}; its units are folded into the file",
                file.module, package
            ),
        });
    }
    incidents
}

/// Builds the unit-level graph: each file node followed by its units in source order.
///
/// Every resolved reference adds one unit of weight to its edge; references
/// from a node to itself are dropped.
pub fn build_unit_graph(files: &[FileNode], resolved: &[ResolvedFile]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();

    for file in files {
        graph.add_node(file_graph_node(file));
        for unit in &file.units {
            graph.add_node(GraphNode {
                id: unit.qualified_name.clone(),
                label: unit.name.clone(),
                group: file.path.clone(),
                kind: NodeKind::Unit(unit.kind),
                private: unit.is_private(),
            });
        }
    }

    let mut dropped = 0usize;
    for file in resolved {
        for reference in &file.references {
            if !graph.add_edge(&reference.source, reference.target.node_id(), 1.0) {
                dropped += 1;
            }
        }
    }
    debug!(
        "Unit graph: {} nodes, {} import edges ({} self or dangling references dropped)",
        graph.node_count(),
        graph.import_edge_count(),
        dropped
    );
    graph
}

/// Contracts a unit graph onto its file nodes.
///
/// Edge weights between nodes of two different files are summed into one
/// file-to-file edge; edges inside one file vanish.
pub fn contract_to_modules(units: &DependencyGraph) -> DependencyGraph {
    let mut modules = DependencyGraph::new();
    for node in units.get_nodes().iter().filter(|n| n.is_file()) {
        modules.add_node(node.clone());
    }

    let group_of = |id: &str| units.node(id).map(|n| n.group.clone());
    let mut contracted: BTreeMap<(String, String), f64> = BTreeMap::new();
    for ((from, to), weight) in units.raw_weights() {
        let (Some(a), Some(b)) = (group_of(from), group_of(to)) else {
            continue;
        };
        if a != b {
            *contracted.entry((a, b)).or_insert(0.0) += weight;
        }
    }
    for ((a, b), weight) in contracted {
        modules.add_edge(&a, &b, weight);
    }

    debug!(
        "Module graph: {} nodes, {} import edges",
        modules.node_count(),
        modules.import_edge_count()
    );
    modules
}

pub fn build_graphs(files: &[FileNode], resolved: &[ResolvedFile]) -> BuiltGraphs {
    let units = build_unit_graph(files, resolved);
    let modules = contract_to_modules(&units);
    BuiltGraphs { units, modules }
}
