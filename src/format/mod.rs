//! Output formats for pydeptree

pub mod json;

pub use json::{GraphDocument, LinkRecord, NodeRecord, NodeStyle, NodeType, read_node_order};

/// Full (unit-level) document file name
pub const FULL_DOCUMENT: &str = "graph_data.json";
/// Modules-only document file name
pub const MODULES_DOCUMENT: &str = "graph_data_modules.json";
