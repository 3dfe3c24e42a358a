pub mod config;
pub mod core;
pub mod format;
pub mod fs;
pub mod runner;
pub mod utils;

// Re-export key items for convenience
pub use config::{AnalysisMode, DepTreeConfig, HistoryConfig, SequencerConfig};
pub use core::{AnalysisError, AnalysisEvent, HistoryStatus, Incident};
pub use format::GraphDocument;
pub use runner::{AnalysisResult, analyze, run, write_outputs};
