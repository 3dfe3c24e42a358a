use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What the run analyzes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Import analysis plus history metrics
    #[default]
    Full,
    /// Only co-change edges and file metrics from version control
    GitOnly,
}

/// History mining settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Mine repository history at all
    pub enabled: bool,
    /// Size of the trailing history window in days
    pub window_days: u32,
    /// How many columns a leading tab counts for in the complexity metric
    pub tab_width: usize,
    /// Pre-generated `git log --numstat` file to read instead of the repository
    pub git_log: Option<PathBuf>,
    /// Directory the paths inside `git_log` are relative to (defaults to the package root)
    pub git_log_root: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_days: 365,
            tab_width: 4,
            git_log: None,
            git_log_root: None,
        }
    }
}

/// Node sequencer tunables
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Upper bound on improvement passes
    pub max_passes: usize,
    /// Minimum cost decrease for a pass to be accepted
    pub tolerance: f64,
    /// Weight of co-change edges when computing barycenters (0 disables)
    pub history_attraction: f64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            max_passes: 32,
            tolerance: 1e-9,
            history_attraction: 0.25,
        }
    }
}

/// Main configuration for pydeptree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepTreeConfig {
    /// Path to the package directory to analyze
    pub path: PathBuf,
    /// Directory receiving `graph_data.json` and `graph_data_modules.json`
    pub output_dir: PathBuf,
    pub mode: AnalysisMode,
    /// Track module-level assignments as units
    pub include_globals: bool,
    /// List of glob patterns to ignore (e.g. "tests/*")
    pub ignore_patterns: Vec<String>,
    /// Parse files on the rayon pool
    pub parallel: bool,
    /// Enabled verbose logging
    pub verbose: bool,
    /// Previously emitted document whose node order seeds the sequencer
    pub seed_order: Option<PathBuf>,
    pub history: HistoryConfig,
    pub sequencer: SequencerConfig,
}

impl DepTreeConfig {
    /// Validates the configuration, ensuring the path exists and tunables are usable.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.path.exists() {
            anyhow::bail!("Path does not exist: {:?}", self.path);
        }
        if self.sequencer.max_passes == 0 {
            anyhow::bail!("sequencer.max_passes must be at least 1");
        }
        if !(self.sequencer.tolerance >= 0.0) {
            anyhow::bail!("sequencer.tolerance must be non-negative");
        }
        if !(self.sequencer.history_attraction >= 0.0) {
            anyhow::bail!("sequencer.history_attraction must be non-negative");
        }
        if self.history.window_days == 0 {
            anyhow::bail!("history.window_days must be at least 1");
        }
        if let Some(log) = &self.history.git_log
            && !log.is_file()
        {
            anyhow::bail!("Git log file does not exist: {:?}", log);
        }
        Ok(())
    }

    /// Attempts to load configuration from `pydeptree.toml` in the current directory.
    pub fn load_from_file() -> Option<Self> {
        std::fs::read_to_string("pydeptree.toml")
            .ok()
            .and_then(|content| toml::from_str(&content).ok())
    }
}

impl Default for DepTreeConfig {
    fn default() -> Self {
        let defaults = vec![
            // Version Control
            ".git",
            ".hg",
            ".svn",
            // Environments and caches
            "venv",
            ".venv",
            ".tox",
            ".nox",
            "__pycache__",
            ".mypy_cache",
            ".pytest_cache",
            "*.egg-info",
        ];

        Self {
            path: PathBuf::from("."),
            output_dir: PathBuf::from("data"),
            mode: AnalysisMode::Full,
            include_globals: true,
            ignore_patterns: defaults.into_iter().map(String::from).collect(),
            parallel: true,
            verbose: false,
            seed_order: None,
            history: HistoryConfig::default(),
            sequencer: SequencerConfig::default(),
        }
    }
}
