use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{AnalysisMode, DepTreeConfig};
use crate::core::{
    AnalysisError, AnalysisEvent, FileNode, HistoryStatus, Incident, IncidentStage, Metric,
    PackageSource, SourceFile, discover_package,
};
use crate::format::{FULL_DOCUMENT, GraphDocument, MODULES_DOCUMENT, NodeStyle, read_node_order};
use crate::utils::analysis::dependencies::{
    build_graphs, file_graph_node, fold_shadowed_modules,
};
use crate::utils::analysis::extract::extract_file;
use crate::utils::analysis::graph::DependencyGraph;
use crate::utils::analysis::imports::{PackageIndex, ResolvedFile, resolve_file};
use crate::utils::analysis::sequence::{sequence, sequence_within_files};
use crate::utils::integrations::history::{MinedHistory, PathScope, mine_package};
use crate::utils::metrics::{FileStats, MinMaxScaler, viridis_hex};

/// Both documents plus everything the caller should know about the run
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub full: GraphDocument,
    pub modules: GraphDocument,
    pub incidents: Vec<Incident>,
    pub history: HistoryStatus,
    /// False when the sequencer used its whole pass budget
    pub converged: bool,
}

impl AnalysisResult {
    pub fn summary(&self) -> String {
        let files = self.modules.nodes.len();
        let units = self.full.nodes.len() - files.min(self.full.nodes.len());
        format!(
            "{} files, {} units, {} module links, {} skipped; history {}",
            files,
            units,
            self.modules.links.len(),
            self.incidents.len(),
            self.history
        )
    }
}

/// Main entry point in CLI mode.
///
/// Runs the analysis on a background thread and reports its events through
/// tracing on the calling thread.
pub fn run(config: DepTreeConfig) -> Result<()> {
    let (tx, rx) = crossbeam_channel::unbounded();

    let config_clone = config.clone();
    std::thread::spawn(move || {
        let outcome = analyze(&config_clone, Some(tx.clone())).and_then(|result| {
            let written = write_outputs(&result, &config_clone.output_dir)?;
            Ok((result, written))
        });
        match outcome {
            Ok((result, written)) => {
                let _ = tx.send(AnalysisEvent::Complete(format!(
                    "{} -> {:?}",
                    result.summary(),
                    written
                )));
            }
            Err(e) => {
                let _ = tx.send(AnalysisEvent::Error(format!("{:#}", e)));
            }
        }
    });

    let mut failure = None;
    for event in rx {
        match event {
            AnalysisEvent::StartScanning => debug!("Scanning started..."),
            AnalysisEvent::FilesFound(n) => info!("Found {} python files", n),
            AnalysisEvent::FileProcessed(path) => debug!("Processed: {}", path),
            AnalysisEvent::FileSkipped(incident) => warn!("Skipped {}", incident),
            AnalysisEvent::HistoryMined(status) => info!("History: {}", status),
            AnalysisEvent::Complete(msg) => println!("{}", msg),
            AnalysisEvent::Error(e) => {
                eprintln!("Error: {}", e);
                failure = Some(e);
            }
        }
    }

    match failure {
        Some(e) => anyhow::bail!(e),
        None => Ok(()),
    }
}

/// Writes both documents into `output_dir`, returning the written paths.
pub fn write_outputs(result: &AnalysisResult, output_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", output_dir))?;

    let full = output_dir.join(FULL_DOCUMENT);
    let modules = output_dir.join(MODULES_DOCUMENT);
    result.full.write_to_file(&full)?;
    result.modules.write_to_file(&modules)?;
    Ok(vec![full, modules])
}

/// Runs one analysis and returns the documents without touching the output directory.
pub fn analyze(config: &DepTreeConfig, tx: Option<Sender<AnalysisEvent>>) -> Result<AnalysisResult> {
    let notify = |e: AnalysisEvent| {
        if let Some(ref tx) = tx {
            let _ = tx.send(e);
        }
    };

    notify(AnalysisEvent::StartScanning);
    config.validate()?;

    let package = discover_package(config)?;
    if package.files.is_empty() && config.mode == AnalysisMode::Full {
        return Err(AnalysisError::NoSourceFiles(package.root.clone()).into());
    }
    notify(AnalysisEvent::FilesFound(package.files.len()));

    let seed = match &config.seed_order {
        Some(path) => read_node_order(path)?,
        None => Vec::new(),
    };

    let scope = match config.mode {
        AnalysisMode::Full => PathScope::Python,
        AnalysisMode::GitOnly => PathScope::AnyFile,
    };
    // History mining reads disjoint data, so it overlaps with parsing.
    let (parsed, (mined, status)) = std::thread::scope(|s| {
        let history = s.spawn(|| mine_package(&config.history, &package, scope));
        let parsed = match config.mode {
            AnalysisMode::Full => parse_files(&package.files, config, &notify),
            AnalysisMode::GitOnly => Vec::new(),
        };
        let mined = history.join().unwrap_or_else(|_| {
            (
                None,
                HistoryStatus::Unavailable {
                    reason: "history worker panicked".to_string(),
                },
            )
        });
        (parsed, mined)
    });
    notify(AnalysisEvent::HistoryMined(status.clone()));

    let mut incidents = Vec::new();
    let mut files = Vec::new();
    for outcome in parsed {
        match outcome {
            Ok(file) => files.push(file),
            Err(incident) => {
                notify(AnalysisEvent::FileSkipped(incident.clone()));
                incidents.push(incident);
            }
        }
    }

    let (mut units, mut modules, mut files) = match config.mode {
        AnalysisMode::Full => {
            if files.is_empty() {
                return Err(AnalysisError::NoResolvableFiles(package.files.len()).into());
            }
            for incident in fold_shadowed_modules(&mut files) {
                notify(AnalysisEvent::FileSkipped(incident.clone()));
                incidents.push(incident);
            }
            let index = PackageIndex::new(&package.name, &files);
            let resolved: Vec<ResolvedFile> = if config.parallel {
                files.par_iter().map(|f| resolve_file(f, &index)).collect()
            } else {
                files.iter().map(|f| resolve_file(f, &index)).collect()
            };
            let built = build_graphs(&files, &resolved);
            (built.units, built.modules, files)
        }
        AnalysisMode::GitOnly => {
            let (files, more_incidents) = history_files(&package, mined.as_ref(), config)?;
            for incident in more_incidents {
                notify(AnalysisEvent::FileSkipped(incident.clone()));
                incidents.push(incident);
            }
            let mut graph = DependencyGraph::new();
            for file in &files {
                graph.add_node(file_graph_node(file));
            }
            (graph.clone(), graph, files)
        }
    };

    for file in &mut files {
        file.volatility = mined
            .as_ref()
            .map_or(Metric::Unavailable, |m| m.volatility(&file.path, file.line_count));
    }
    if let Some(mined) = &mined {
        for ((a, b), strength) in &mined.co_changes {
            modules.add_git_edge(a, b, *strength);
            units.add_git_edge(a, b, *strength);
        }
    }

    let module_outcome = sequence(&modules, &seed, &config.sequencer);
    if !module_outcome.converged {
        warn!(
            "Sequencer stopped after {} passes without converging (backward cost {:.4})",
            module_outcome.passes, module_outcome.cost
        );
    }
    let full_order = match config.mode {
        AnalysisMode::Full => {
            sequence_within_files(&units, &module_outcome.order, &seed, &config.sequencer)
        }
        AnalysisMode::GitOnly => module_outcome.order.clone(),
    };

    let styles = node_styles(&files);
    let result = AnalysisResult {
        full: GraphDocument::from_graph(&units, &full_order, &styles),
        modules: GraphDocument::from_graph(&modules, &module_outcome.order, &styles),
        incidents,
        history: status,
        converged: module_outcome.converged,
    };
    info!("{}", result.summary());
    Ok(result)
}

/// Parses every file, in input order; failures become incidents.
fn parse_files(
    sources: &[SourceFile],
    config: &DepTreeConfig,
    notify: &(dyn Fn(AnalysisEvent) + Sync),
) -> Vec<Result<FileNode, Incident>> {
    let parse_one = |source: &SourceFile| {
        let outcome = read_source(source).and_then(|text| {
            let mut file = extract_file(source, &text, config.include_globals).map_err(|err| {
                Incident {
                    path: source.path.clone(),
                    stage: IncidentStage::Parse,
                    message: err.to_string(),
                }
            })?;
            let stats = FileStats::measure(&text, config.history.tab_width);
            file.line_count = stats.line_count;
            file.complexity = Metric::Measured(stats.mean_indent);
            Ok(file)
        });
        notify(AnalysisEvent::FileProcessed(source.path.clone()));
        outcome
    };

    if config.parallel {
        sources.par_iter().map(parse_one).collect()
    } else {
        sources.iter().map(parse_one).collect()
    }
}

fn read_source(source: &SourceFile) -> Result<String, Incident> {
    std::fs::read_to_string(&source.absolute).map_err(|err| Incident {
        path: source.path.clone(),
        stage: IncidentStage::Read,
        message: err.to_string(),
    })
}

/// Git-only mode: every file changed inside the history window that still
/// exists, whatever its language. Files that are not text become incidents.
fn history_files(
    package: &PackageSource,
    mined: Option<&MinedHistory>,
    config: &DepTreeConfig,
) -> Result<(Vec<FileNode>, Vec<Incident>)> {
    let Some(mined) = mined else {
        return Err(AnalysisError::NoHistoryFiles(package.root.clone()).into());
    };

    let mut files = Vec::new();
    let mut incidents = Vec::new();
    for id in mined.files.keys() {
        let Some(source) = package.source_file(id) else {
            continue;
        };
        if !source.absolute.is_file() {
            debug!("{} changed in the window but no longer exists", id);
            continue;
        }
        match read_source(&source) {
            Ok(text) => {
                let stats = FileStats::measure(&text, config.history.tab_width);
                files.push(FileNode {
                    path: source.path.clone(),
                    module: source.module.clone(),
                    is_init: source.is_init,
                    units: Vec::new(),
                    imports: Vec::new(),
                    module_references: Default::default(),
                    line_count: stats.line_count,
                    complexity: Metric::Measured(stats.mean_indent),
                    volatility: Metric::Unavailable,
                });
            }
            Err(incident) => incidents.push(incident),
        }
    }

    if files.is_empty() {
        return Err(AnalysisError::NoHistoryFiles(package.root.clone()).into());
    }
    Ok((files, incidents))
}

/// Size from outlier-trimmed complexity, colour from volatility.
fn node_styles(files: &[FileNode]) -> BTreeMap<String, NodeStyle> {
    let complexities: Vec<f64> = files.iter().filter_map(|f| f.complexity.value()).collect();
    let scaler = MinMaxScaler::fit(&complexities);

    files
        .iter()
        .map(|file| {
            let style = NodeStyle {
                size: file.complexity.value().map_or(0.0, |c| scaler.scale(c)),
                color: file.volatility.value().map(viridis_hex),
            };
            (file.path.clone(), style)
        })
        .collect()
}
