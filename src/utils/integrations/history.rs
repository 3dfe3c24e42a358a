//! History mining: volatility inputs and co-change edges per package file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::config::HistoryConfig;
use crate::core::{HistoryStatus, Metric, PackageSource};
use crate::utils::integrations::git_stats::{GitRepository, HistorySource, NumstatLog};

/// In-window activity of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileHistory {
    /// Commits touching the file
    pub commits: usize,
    /// Added plus removed lines over those commits
    pub lines_changed: usize,
}

/// History aggregated onto package node ids
#[derive(Debug, Clone, Default)]
pub struct MinedHistory {
    /// Commits in the window touching at least one package file
    pub commits: usize,
    pub files: BTreeMap<String, FileHistory>,
    /// Package files under version control; `None` when every file counts as tracked
    pub tracked: Option<BTreeSet<String>>,
    /// Co-change strength per unordered pair, smaller id first
    pub co_changes: BTreeMap<(String, String), f64>,
}

impl MinedHistory {
    pub fn is_tracked(&self, id: &str) -> bool {
        self.tracked.as_ref().is_none_or(|t| t.contains(id))
    }

    /// Fraction of the file's current lines changed in the window, clamped to [0, 1].
    pub fn volatility(&self, id: &str, line_count: usize) -> Metric {
        if !self.is_tracked(id) {
            return Metric::Unavailable;
        }
        let changed = self.files.get(id).map_or(0, |f| f.lines_changed);
        Metric::Measured((changed as f64 / line_count.max(1) as f64).min(1.0))
    }
}

/// Which changed paths under the package become nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathScope {
    /// Python sources only, matching the import graph
    Python,
    /// Every file, for history-only graphs
    AnyFile,
}

/// Maps history paths onto package node ids (`pkg/sub/mod.py`).
struct PathMapper {
    prefix: Option<String>,
    package: String,
    scope: PathScope,
}

impl PathMapper {
    fn new(history_root: &Path, package: &PackageSource, scope: PathScope) -> Self {
        let prefix = package.root.strip_prefix(history_root).ok().map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/")
        });
        Self {
            prefix,
            package: package.name.clone(),
            scope,
        }
    }

    fn node_id(&self, path: &str) -> Option<String> {
        if self.scope == PathScope::Python && !path.ends_with(".py") {
            return None;
        }
        let prefix = self.prefix.as_ref()?;
        let inner = if prefix.is_empty() {
            path
        } else {
            path.strip_prefix(prefix.as_str())?.strip_prefix('/')?
        };
        Some(format!("{}/{}", self.package, inner))
    }
}

/// Aggregate the commits of `source` inside the window onto package files.
pub fn mine(
    source: &dyn HistorySource,
    package: &PackageSource,
    since: NaiveDate,
    scope: PathScope,
) -> Result<MinedHistory> {
    let mapper = PathMapper::new(source.root(), package, scope);
    if mapper.prefix.is_none() {
        warn!(
            "Package {:?} is outside the history root {:?}",
            package.root,
            source.root()
        );
    }

    let mut mined = MinedHistory::default();
    let mut pair_counts: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut authors: BTreeSet<String> = BTreeSet::new();

    for commit in source.commits(since)? {
        let mut touched: BTreeSet<String> = BTreeSet::new();
        for change in &commit.changes {
            let Some(id) = mapper.node_id(&change.path) else {
                continue;
            };
            let entry = mined.files.entry(id.clone()).or_default();
            entry.lines_changed += change.lines_changed();
            if touched.insert(id) {
                entry.commits += 1;
            }
        }
        if touched.is_empty() {
            continue;
        }
        mined.commits += 1;
        authors.insert(commit.author.clone());

        let touched: Vec<String> = touched.into_iter().collect();
        for (i, a) in touched.iter().enumerate() {
            for b in &touched[i + 1..] {
                *pair_counts.entry((a.clone(), b.clone())).or_insert(0) += 1;
            }
        }
    }

    for ((a, b), co) in pair_counts {
        let n_a = mined.files.get(&a).map_or(0, |f| f.commits);
        let n_b = mined.files.get(&b).map_or(0, |f| f.commits);
        let union = (n_a + n_b).saturating_sub(co).max(co).max(1);
        mined.co_changes.insert((a, b), co as f64 / union as f64);
    }

    mined.tracked = source
        .tracked_files()?
        .map(|paths| paths.iter().filter_map(|p| mapper.node_id(p)).collect());

    debug!(
        "History: {} commits by {} authors, {} files changed, {} co-change pairs",
        mined.commits,
        authors.len(),
        mined.files.len(),
        mined.co_changes.len()
    );
    Ok(mined)
}

/// Start of the trailing history window
pub fn window_start(config: &HistoryConfig) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(i64::from(config.window_days))
}

/// Opens the configured history source and mines it.
///
/// Missing history is reported through the status, never as an error.
pub fn mine_package(
    config: &HistoryConfig,
    package: &PackageSource,
    scope: PathScope,
) -> (Option<MinedHistory>, HistoryStatus) {
    if !config.enabled {
        return (None, HistoryStatus::Disabled);
    }

    let source: Result<Box<dyn HistorySource>> = match &config.git_log {
        Some(log) => {
            let root = config.git_log_root.as_deref().unwrap_or(&package.root);
            NumstatLog::open(log, root).map(|s| Box::new(s) as Box<dyn HistorySource>)
        }
        None => GitRepository::discover(&package.root).map(|s| Box::new(s) as Box<dyn HistorySource>),
    };

    let mined = source.and_then(|source| mine(source.as_ref(), package, window_start(config), scope));
    match mined {
        Ok(mined) => {
            info!(
                "Mined {} commits touching {} files",
                mined.commits,
                mined.files.len()
            );
            let status = HistoryStatus::Mined {
                commits: mined.commits,
                files: mined.files.len(),
            };
            (Some(mined), status)
        }
        Err(err) => {
            let reason = format!("{:#}", err);
            warn!("History unavailable: {}", reason);
            (None, HistoryStatus::Unavailable { reason })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn package() -> PackageSource {
        PackageSource {
            root: PathBuf::from("/repo/src/pkg"),
            name: "pkg".to_string(),
            files: Vec::new(),
        }
    }

    fn log(entries: &[&[(&str, usize, usize)]]) -> NumstatLog {
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        let mut text = String::new();
        for files in entries {
            text.push_str(&format!("--COMMIT--{}--dev\n", today));
            for (path, added, removed) in *files {
                text.push_str(&format!("{}\t{}\t{}\n", added, removed, path));
            }
            text.push('\n');
        }
        NumstatLog::parse(&text, PathBuf::from("/repo"))
    }

    fn since() -> NaiveDate {
        window_start(&HistoryConfig::default())
    }

    #[test]
    fn test_volatility_is_clamped() {
        let source = log(&[&[("src/pkg/big.py", 300, 200)], &[("src/pkg/big.py", 400, 0)]]);
        let mined = mine(&source, &package(), since(), PathScope::Python).unwrap();

        assert_eq!(mined.files["pkg/big.py"].lines_changed, 900);
        assert_eq!(mined.volatility("pkg/big.py", 500), Metric::Measured(1.0));
        assert_eq!(mined.volatility("pkg/big.py", 1800), Metric::Measured(0.5));
    }

    #[test]
    fn test_exact_full_churn_is_one() {
        let source = log(&[&[("src/pkg/big.py", 250, 250)]]);
        let mined = mine(&source, &package(), since(), PathScope::Python).unwrap();
        assert_eq!(mined.volatility("pkg/big.py", 500), Metric::Measured(1.0));
    }

    #[test]
    fn test_untracked_file_has_no_volatility() {
        let mined = MinedHistory {
            tracked: Some(BTreeSet::from(["pkg/a.py".to_string()])),
            ..Default::default()
        };
        assert_eq!(mined.volatility("pkg/a.py", 10), Metric::Measured(0.0));
        assert_eq!(mined.volatility("pkg/new.py", 10), Metric::Unavailable);
    }

    #[test]
    fn test_co_change_strength() {
        let source = log(&[
            &[("src/pkg/a.py", 1, 0), ("src/pkg/b.py", 1, 0)],
            &[("src/pkg/a.py", 1, 0), ("src/pkg/b.py", 1, 0), ("README.md", 1, 0)],
            &[("src/pkg/a.py", 1, 0)],
            &[("src/pkg/c.py", 1, 0), ("docs/conf.py", 1, 0)],
        ]);
        let mined = mine(&source, &package(), since(), PathScope::Python).unwrap();

        assert_eq!(mined.commits, 4);
        assert_eq!(mined.files["pkg/a.py"].commits, 3);
        // co = 2, n(a) = 3, n(b) = 2
        let ab = mined.co_changes[&("pkg/a.py".to_string(), "pkg/b.py".to_string())];
        assert!((ab - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(mined.co_changes.len(), 1);
        assert!(!mined.files.contains_key("pkg/conf.py"));
    }

    #[test]
    fn test_any_file_scope_keeps_non_python_paths() {
        let source = log(&[
            &[("src/pkg/app.js", 4, 0), ("src/pkg/a.py", 1, 0)],
            &[("src/pkg/app.js", 2, 2), ("src/pkg/a.py", 1, 0)],
            &[("README.md", 1, 0)],
        ]);

        let python = mine(&source, &package(), since(), PathScope::Python).unwrap();
        assert!(!python.files.contains_key("pkg/app.js"));
        assert!(python.co_changes.is_empty());

        let any = mine(&source, &package(), since(), PathScope::AnyFile).unwrap();
        assert_eq!(any.commits, 2);
        assert_eq!(any.files["pkg/app.js"].lines_changed, 8);
        let pair = ("pkg/a.py".to_string(), "pkg/app.js".to_string());
        assert_eq!(any.co_changes[&pair], 1.0);
        assert!(!any.files.contains_key("pkg/README.md"));
    }

    #[test]
    fn test_old_commits_fall_outside_window() {
        let text = "--COMMIT--2001-01-01--dev\n5\t5\tsrc/pkg/a.py\n";
        let source = NumstatLog::parse(text, PathBuf::from("/repo"));
        let mined = mine(&source, &package(), since(), PathScope::Python).unwrap();
        assert_eq!(mined.commits, 0);
        assert_eq!(mined.volatility("pkg/a.py", 10), Metric::Measured(0.0));
    }

    #[test]
    fn test_disabled_history() {
        let config = HistoryConfig {
            enabled: false,
            ..Default::default()
        };
        let (mined, status) = mine_package(&config, &package(), PathScope::Python);
        assert!(mined.is_none());
        assert_eq!(status, HistoryStatus::Disabled);
    }
}
