use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Walks `path` and returns every `.py` file, sorted, honouring `.gitignore`
/// and the given ignore globs.
pub fn walk_python_files(path: &Path, ignore_patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut builder = WalkBuilder::new(path);

    let mut override_builder = ignore::overrides::OverrideBuilder::new(path);
    // In override builder "glob" whitelists and "!glob" ignores.
    override_builder.add("**/*.py")?;
    for pattern in ignore_patterns {
        override_builder.add(&format!("!{}", pattern))?;
    }
    let overrides = override_builder.build()?;

    builder.overrides(overrides);
    builder.standard_filters(true);
    // A package may live in a repository that is not a git checkout.
    builder.require_git(false);

    let walker = builder.build();
    let mut files = Vec::new();

    for result in walker {
        match result {
            Ok(entry) => {
                if entry.file_type().is_some_and(|ft| ft.is_file())
                    && entry.path().extension().is_some_and(|ext| ext == "py")
                {
                    files.push(entry.into_path());
                }
            }
            Err(err) => warn!("Error walking directory: {}", err),
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_walk_python_files_ignore_logic() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        File::create(root.join("module.py"))?;
        File::create(root.join("notes.txt"))?;
        File::create(root.join("native.so"))?;
        fs::create_dir(root.join("__pycache__"))?;
        File::create(root.join("__pycache__").join("cached.py"))?;
        fs::create_dir(root.join("sub"))?;
        File::create(root.join("sub").join("__init__.py"))?;

        let paths = walk_python_files(root, &["__pycache__".to_string()])?;

        let rel: Vec<String> = paths
            .iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();

        assert_eq!(rel, vec!["module.py", "sub/__init__.py"]);
        Ok(())
    }
}
