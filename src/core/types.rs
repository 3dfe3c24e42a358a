//! Core types shared across pydeptree modules

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Events emitted during an analysis run
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    /// Discovery has started
    StartScanning,
    /// Number of source files discovered
    FilesFound(usize),
    /// A file has been parsed (successfully or not)
    FileProcessed(String),
    /// A file was excluded from the graph, wholly or in part
    FileSkipped(Incident),
    /// History mining finished
    HistoryMined(HistoryStatus),
    /// Analysis complete with message
    Complete(String),
    /// Error occurred
    Error(String),
}

/// A measured value, or the explicit fact that it could not be measured.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Metric {
    #[default]
    Unavailable,
    Measured(f64),
}

impl Metric {
    pub fn value(self) -> Option<f64> {
        match self {
            Metric::Measured(v) => Some(v),
            Metric::Unavailable => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Function,
    Class,
    Global,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Function => write!(f, "function"),
            UnitKind::Class => write!(f, "class"),
            UnitKind::Global => write!(f, "global"),
        }
    }
}

/// 1-based inclusive line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start_line: usize,
    pub end_line: usize,
}

/// A top-level function, class or module-level binding of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub name: String,
    /// Dotted `module.name`, also the unit's node id
    pub qualified_name: String,
    /// Package-rooted path of the owning file
    pub file: String,
    pub kind: UnitKind,
    /// Names bound anywhere inside the unit (nested definitions included)
    pub defined: BTreeSet<String>,
    /// Free dotted references (`name` or `name.attr.attr`)
    pub references: BTreeSet<String>,
    pub span: Span,
}

impl Unit {
    pub fn is_private(&self) -> bool {
        is_private(&self.name)
    }
}

pub fn is_private(name: &str) -> bool {
    name.starts_with('_') && name != "__main__"
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedName {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportedName {
    /// Name the import binds in the importing file
    pub fn bound_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A top-level import statement, verbatim apart from whitespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawImport {
    /// `import a.b.c` / `import a.b.c as d`
    Module {
        module: String,
        alias: Option<String>,
        line: usize,
    },
    /// `from ..a import b as c` / `from . import *`
    From {
        level: usize,
        module: Option<String>,
        names: Vec<ImportedName>,
        wildcard: bool,
        line: usize,
    },
}

impl RawImport {
    pub fn line(&self) -> usize {
        match self {
            RawImport::Module { line, .. } | RawImport::From { line, .. } => *line,
        }
    }
}

/// One source file of the analyzed package.
#[derive(Debug, Clone)]
pub struct FileNode {
    /// Package-rooted path with `/` separators, also the node id
    pub path: String,
    /// Dotted module name (`pkg.sub` for `pkg/sub/__init__.py`)
    pub module: String,
    pub is_init: bool,
    pub units: Vec<Unit>,
    pub imports: Vec<RawImport>,
    /// References of top-level statements that are not units
    pub module_references: BTreeSet<String>,
    pub line_count: usize,
    pub complexity: Metric,
    pub volatility: Metric,
}

impl FileNode {
    pub fn is_private(&self) -> bool {
        let stem = self
            .module
            .rsplit('.')
            .next()
            .unwrap_or(self.module.as_str());
        !self.is_init && is_private(stem)
    }
}

/// A source file handed to the extractor
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub absolute: PathBuf,
    pub module: String,
    pub is_init: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Import,
    Git,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Import => write!(f, "import"),
            EdgeKind::Git => write!(f, "git"),
        }
    }
}

/// Directed, normalized relation between two node ids
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    /// Always within (0, 1]
    pub strength: f64,
}

/// Which stage rejected a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentStage {
    Read,
    Parse,
    Resolve,
}

/// A per-file problem reported back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub path: String,
    pub stage: IncidentStage,
    pub message: String,
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.stage {
            IncidentStage::Read => "read",
            IncidentStage::Parse => "parse",
            IncidentStage::Resolve => "resolve",
        };
        write!(f, "{} ({}): {}", self.path, stage, self.message)
    }
}

/// Outcome of the history mining step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryStatus {
    Mined { commits: usize, files: usize },
    Unavailable { reason: String },
    Disabled,
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryStatus::Mined { commits, files } => {
                write!(f, "{} commits touching {} files", commits, files)
            }
            HistoryStatus::Unavailable { reason } => write!(f, "unavailable ({})", reason),
            HistoryStatus::Disabled => write!(f, "disabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_private() {
        assert!(is_private("_private_function"));
        assert!(is_private("__private_function"));
        assert!(!is_private("__main__"));
        assert!(!is_private("not_private"));
    }

    #[test]
    fn test_metric_absence_is_not_zero() {
        assert_eq!(Metric::default(), Metric::Unavailable);
        assert_eq!(Metric::Unavailable.value(), None);
        assert_eq!(Metric::Measured(0.0).value(), Some(0.0));
    }

    #[test]
    fn test_bound_name_prefers_alias() {
        let plain = ImportedName {
            name: "foo".to_string(),
            alias: None,
        };
        let aliased = ImportedName {
            name: "foo".to_string(),
            alias: Some("bar".to_string()),
        };
        assert_eq!(plain.bound_name(), "foo");
        assert_eq!(aliased.bound_name(), "bar");
    }
}
