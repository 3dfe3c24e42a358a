//! Utility modules for pydeptree
//!
//! Organized into logical groups:
//! - `analysis/` - Source analysis (extraction, imports, graph, sequencing)
//! - `integrations/` - Repository history
//! - `metrics` - File statistics and visual encodings

pub mod analysis;
pub mod integrations;
pub mod metrics;
