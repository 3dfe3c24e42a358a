//! Core module for pydeptree
//!
//! This module contains the data model, error types and package discovery.

pub mod error;
pub mod scanner;
mod types;

pub use error::{AnalysisError, ParseError};
pub use scanner::{PackageSource, discover_package};
pub use types::*;
