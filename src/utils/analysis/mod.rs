//! Static analysis of Python packages
//!
//! Extraction, import resolution, graph construction and node sequencing.

pub mod dependencies;
pub mod extract;
pub mod graph;
pub mod imports;
pub mod sequence;

pub use dependencies::{BuiltGraphs, build_graphs};
pub use graph::{DependencyGraph, GraphNode, NodeKind};
pub use imports::{PackageIndex, Target};
pub use sequence::{SequenceOutcome, sequence};
