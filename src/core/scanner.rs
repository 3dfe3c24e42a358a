//! Package discovery
//!
//! Turns the configured directory into the list of source files the extractor
//! works on, each tagged with its package-rooted path and dotted module name.

use crate::config::DepTreeConfig;
use crate::core::{AnalysisError, SourceFile};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The analyzed package: its root directory and the files inside it
#[derive(Debug, Clone)]
pub struct PackageSource {
    /// Canonical path of the package directory
    pub root: PathBuf,
    /// Top-level package name (the directory's name)
    pub name: String,
    pub files: Vec<SourceFile>,
}

impl PackageSource {
    /// The file behind a package-rooted id, whatever its extension.
    /// The file itself may no longer exist.
    pub fn source_file(&self, id: &str) -> Option<SourceFile> {
        let inner = id.strip_prefix(self.name.as_str())?.strip_prefix('/')?;
        let relative: PathBuf = inner.split('/').collect();
        let (module, is_init) = module_name(&self.name, &relative);
        Some(SourceFile {
            path: id.to_string(),
            absolute: self.root.join(&relative),
            module,
            is_init,
        })
    }
}

/// Discover the Python files of the configured package.
pub fn discover_package(config: &DepTreeConfig) -> Result<PackageSource> {
    let root = config
        .path
        .canonicalize()
        .with_context(|| format!("Failed to find directory: {:?}", config.path))?;

    if !root.is_dir() {
        return Err(AnalysisError::NotADirectory(root).into());
    }

    let name = package_name(&root);
    let paths = crate::fs::walk_python_files(&root, &config.ignore_patterns)?;
    debug!("Discovered {} python files under {:?}", paths.len(), root);

    let files = paths
        .into_iter()
        .filter_map(|absolute| {
            let relative = absolute.strip_prefix(&root).ok()?.to_path_buf();
            let (module, is_init) = module_name(&name, &relative);
            Some(SourceFile {
                path: join_id(&name, &relative),
                absolute,
                module,
                is_init,
            })
        })
        .collect();

    Ok(PackageSource { root, name, files })
}

fn package_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "package".to_string())
}

fn join_id(package: &str, relative: &Path) -> String {
    let mut id = package.to_string();
    for component in relative.components() {
        id.push('/');
        id.push_str(&component.as_os_str().to_string_lossy());
    }
    id
}

/// `utils/helpers.py` -> `pkg.utils.helpers`, `utils/__init__.py` -> `pkg.utils`
pub fn module_name(package: &str, relative: &Path) -> (String, bool) {
    let mut parts = vec![package.to_string()];
    let components: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();

    let Some((file, dirs)) = components.split_last() else {
        return (package.to_string(), true);
    };
    parts.extend(dirs.iter().cloned());

    let stem = file.strip_suffix(".py").unwrap_or(file);
    let is_init = stem == "__init__";
    if !is_init {
        parts.push(stem.to_string());
    }
    (parts.join("."), is_init)
}
