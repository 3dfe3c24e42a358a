//! Error types for pydeptree
//!
//! Per-file problems are recoverable and surface as `Incident`s; only
//! `AnalysisError` stops a run.

use std::path::PathBuf;

/// A source file could not be parsed; the file is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}:{line}: {message}")]
pub struct ParseError {
    pub path: String,
    pub line: usize,
    pub message: String,
}

/// Conditions that prevent the output documents from being produced.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Not a directory: {0:?}")]
    NotADirectory(PathBuf),

    #[error("No Python source files found under {0:?}")]
    NoSourceFiles(PathBuf),

    #[error("None of the {0} source files could be parsed")]
    NoResolvableFiles(usize),

    #[error("No files with history found under {0:?}")]
    NoHistoryFiles(PathBuf),

    #[error("Invalid seed order in {path:?}: {reason}")]
    InvalidSeedOrder { path: PathBuf, reason: String },
}
