//! Version-control integration
//!
//! History collaborators and the miner that turns their commits into metrics.

pub mod git_stats;
pub mod history;

pub use git_stats::{GitRepository, HistorySource, NumstatLog};
pub use history::{MinedHistory, PathScope, mine_package};
