//! JSON graph documents consumed by the visualization.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{AnalysisError, EdgeKind, UnitKind};
use crate::utils::analysis::graph::{DependencyGraph, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Unit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub size: f64,
    pub color: Option<String>,
    /// Id of the owning file node
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<UnitKind>,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub link_type: EdgeKind,
    pub strength: f64,
}

/// One output document; node order is the sequenced position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<NodeRecord>,
    pub links: Vec<LinkRecord>,
}

/// Visual encodings of one file node
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeStyle {
    pub size: f64,
    pub color: Option<String>,
}

impl GraphDocument {
    /// Lays out `graph` in `order`. Nodes missing from `order` are not emitted,
    /// and neither are the links touching them.
    pub fn from_graph(
        graph: &DependencyGraph,
        order: &[String],
        styles: &BTreeMap<String, NodeStyle>,
    ) -> Self {
        let mut position: BTreeMap<&str, usize> = BTreeMap::new();
        let mut nodes = Vec::with_capacity(order.len());

        for id in order {
            let Some(node) = graph.node(id) else {
                continue;
            };
            if position.contains_key(id.as_str()) {
                continue;
            }
            position.insert(id.as_str(), nodes.len());

            let (node_type, kind) = match node.kind {
                NodeKind::File => (NodeType::File, None),
                NodeKind::Unit(kind) => (NodeType::Unit, Some(kind)),
            };
            let style = match node_type {
                NodeType::File => styles.get(&node.id).cloned().unwrap_or_default(),
                NodeType::Unit => NodeStyle::default(),
            };
            nodes.push(NodeRecord {
                id: node.id.clone(),
                label: node.label.clone(),
                node_type,
                size: style.size,
                color: style.color,
                group: node.group.clone(),
                kind,
                private: node.private,
            });
        }

        let mut links: Vec<(usize, usize, LinkRecord)> = graph
            .get_edges()
            .into_iter()
            .filter_map(|edge| {
                let s = *position.get(edge.source.as_str())?;
                let t = *position.get(edge.target.as_str())?;
                Some((
                    s,
                    t,
                    LinkRecord {
                        source: edge.source,
                        target: edge.target,
                        link_type: edge.kind,
                        strength: edge.strength,
                    },
                ))
            })
            .collect();
        links.sort_by(|a, b| (a.0, a.1, a.2.link_type).cmp(&(b.0, b.1, b.2.link_type)));

        Self {
            nodes,
            links: links.into_iter().map(|(_, _, link)| link).collect(),
        }
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn write(&self, output: &mut dyn Write) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        writeln!(output, "{}", text)?;
        Ok(())
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create output file: {:?}", path))?;
        self.write(&mut file)
    }
}

/// Node ids of a previously emitted document, in their array order.
pub fn read_node_order(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed order {:?}", path))?;

    #[derive(Deserialize)]
    struct SeedNode {
        id: String,
    }
    #[derive(Deserialize)]
    struct SeedDocument {
        nodes: Vec<SeedNode>,
    }

    let document: SeedDocument =
        serde_json::from_str(&text).map_err(|err| AnalysisError::InvalidSeedOrder {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    Ok(document.nodes.into_iter().map(|n| n.id).collect())
}
