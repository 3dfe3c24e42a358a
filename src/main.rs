use anyhow::Result;
use clap::Parser;
use pydeptree::{AnalysisMode, DepTreeConfig, run};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dependency graph builder for Python packages", long_about = None)]
struct Args {
    /// Package directory to analyze
    path: Option<PathBuf>,

    /// Only analyze version-control history (co-change edges and file metrics)
    #[arg(long)]
    git_only: bool,

    /// Directory for graph_data.json and graph_data_modules.json
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Do not track module-level assignments as units
    #[arg(long)]
    no_globals: bool,

    /// Skip history mining
    #[arg(long)]
    no_history: bool,

    /// Read history from a `git log --numstat` file instead of the repository
    #[arg(long)]
    git_log: Option<PathBuf>,

    /// Directory the paths in --git-log are relative to (defaults to the package directory)
    #[arg(long)]
    git_log_root: Option<PathBuf>,

    /// Length of the history window in days
    #[arg(long)]
    since_days: Option<u32>,

    /// Previously emitted graph_data.json whose node order seeds the sequencer
    #[arg(long)]
    seed_order: Option<PathBuf>,

    /// Upper bound on sequencer passes
    #[arg(long)]
    max_passes: Option<usize>,

    /// Add ignore pattern (glob)
    #[arg(long)]
    ignore: Vec<String>,

    /// Parse files on a single thread
    #[arg(long)]
    sequential: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load from file or default
    let mut config = DepTreeConfig::load_from_file().unwrap_or_default();

    // 2. Override with CLI args
    if let Some(p) = args.path {
        config.path = p;
    }
    if args.git_only {
        config.mode = AnalysisMode::GitOnly;
    }
    if let Some(o) = args.output_dir {
        config.output_dir = o;
    }
    if args.no_globals {
        config.include_globals = false;
    }
    if args.no_history {
        config.history.enabled = false;
    }
    if let Some(log) = args.git_log {
        config.history.git_log = Some(log);
    }
    if let Some(root) = args.git_log_root {
        config.history.git_log_root = Some(root);
    }
    if let Some(days) = args.since_days {
        config.history.window_days = days;
    }
    if let Some(seed) = args.seed_order {
        config.seed_order = Some(seed);
    }
    if let Some(passes) = args.max_passes {
        config.sequencer.max_passes = passes;
    }
    if !args.ignore.is_empty() {
        // CLI ignores ADD to config ignores
        config.ignore_patterns.extend(args.ignore);
    }
    if args.sequential {
        config.parallel = false;
    }
    if args.verbose {
        config.verbose = true;
    }

    let directive = if config.verbose {
        "pydeptree=debug"
    } else {
        "pydeptree=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(config)
}
