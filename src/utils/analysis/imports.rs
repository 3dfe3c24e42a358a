//! Import resolution from top-level import statements to package files and units.
//!
//! Resolution is purely symbolic: a package-wide index of dotted module names is
//! consulted, nothing is imported or executed. Anything without a physical match
//! inside the package is treated as external and produces no edge.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::core::{FileNode, RawImport};
use crate::utils::analysis::extract::root_name;

/// Re-export chains through `__init__.py` files are followed at most this deep.
const MAX_REEXPORT_DEPTH: usize = 4;

/// What a reference resolved to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Target {
    /// A whole file, identified by its package-rooted path
    File(String),
    /// One unit of a file
    Unit { file: String, qualified_name: String },
}

impl Target {
    pub fn node_id(&self) -> &str {
        match self {
            Target::File(path) => path,
            Target::Unit { qualified_name, .. } => qualified_name,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            Target::File(path) => path,
            Target::Unit { file, .. } => file,
        }
    }
}

/// A source node (unit or file) depending on a target
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResolvedReference {
    pub source: String,
    pub target: Target,
}

/// Resolver output for one file
#[derive(Debug, Clone, Default)]
pub struct ResolvedFile {
    pub path: String,
    pub references: Vec<ResolvedReference>,
    /// Imports with no in-package match
    pub external_imports: usize,
}

#[derive(Debug, Clone)]
struct IndexedModule {
    path: String,
    is_init: bool,
    units: BTreeSet<String>,
    /// Names an `__init__.py` binds through its own imports, as absolute dotted names
    reexports: BTreeMap<String, String>,
}

/// Package-wide symbol table: dotted module name -> file facts
#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
    root_package: String,
    modules: BTreeMap<String, IndexedModule>,
    /// Dotted names of every directory that holds modules
    packages: BTreeSet<String>,
}

impl PackageIndex {
    pub fn new(root_package: &str, files: &[FileNode]) -> Self {
        let mut index = PackageIndex {
            root_package: root_package.to_string(),
            ..Default::default()
        };

        for file in files {
            for parent in parents(&file.module) {
                index.packages.insert(parent);
            }
            if file.is_init {
                index.packages.insert(file.module.clone());
            }

            // A package shadows a plain module of the same dotted name.
            if let Some(existing) = index.modules.get(&file.module)
                && existing.is_init
                && !file.is_init
            {
                debug!("{} is shadowed by package {}", file.path, existing.path);
                continue;
            }

            let reexports = if file.is_init {
                init_reexports(file, root_package)
            } else {
                BTreeMap::new()
            };

            index.modules.insert(
                file.module.clone(),
                IndexedModule {
                    path: file.path.clone(),
                    is_init: file.is_init,
                    units: file.units.iter().map(|u| u.name.clone()).collect(),
                    reexports,
                },
            );
        }
        index
    }

    pub fn root_package(&self) -> &str {
        &self.root_package
    }

    pub fn module_path(&self, module: &str) -> Option<&str> {
        self.modules.get(module).map(|m| m.path.as_str())
    }

    /// Resolve an absolute dotted name (`pkg.mod.Unit.attr`) to a file or unit.
    ///
    /// The longest dotted prefix naming a module wins; the next segment is then
    /// looked up as a unit of that module, then as a re-export of an
    /// `__init__.py`, and otherwise the whole module is the target.
    pub fn resolve_dotted(&self, dotted: &str) -> Option<Target> {
        self.resolve_dotted_at(dotted, 0)
    }

    fn resolve_dotted_at(&self, dotted: &str, depth: usize) -> Option<Target> {
        let parts: Vec<&str> = dotted.split('.').collect();
        if parts.first() != Some(&self.root_package.as_str()) {
            return None;
        }

        for k in (1..=parts.len()).rev() {
            let prefix = parts[..k].join(".");
            let Some(module) = self.modules.get(&prefix) else {
                if k < parts.len() && self.packages.contains(&prefix) {
                    // Namespace directory without a matching module or re-export.
                    return None;
                }
                continue;
            };

            let rest = &parts[k..];
            let Some(name) = rest.first() else {
                return Some(Target::File(module.path.clone()));
            };
            if module.units.contains(*name) {
                return Some(Target::Unit {
                    file: module.path.clone(),
                    qualified_name: format!("{}.{}", prefix, name),
                });
            }
            if module.is_init
                && depth < MAX_REEXPORT_DEPTH
                && let Some(reexport) = module.reexports.get(*name)
            {
                let mut follow = reexport.clone();
                for part in &rest[1..] {
                    follow.push('.');
                    follow.push_str(part);
                }
                if let Some(target) = self.resolve_dotted_at(&follow, depth + 1) {
                    return Some(target);
                }
            }
            return Some(Target::File(module.path.clone()));
        }
        None
    }

    /// Names visible through `from <module> import *`
    fn star_lookup(&self, module: &str, name: &str) -> Option<Target> {
        let indexed = self.modules.get(module)?;
        if indexed.units.contains(name) || indexed.reexports.contains_key(name) {
            return self.resolve_dotted(&format!("{}.{}", module, name));
        }
        None
    }
}

/// `a.b.c` -> [`a`, `a.b`]
fn parents(dotted: &str) -> Vec<String> {
    let parts: Vec<&str> = dotted.split('.').collect();
    (1..parts.len()).map(|i| parts[..i].join(".")).collect()
}

/// Absolute dotted module for a (possibly relative) import.
///
/// `importer` is the importing module; for an `__init__.py` it is the package
/// itself. Returns `None` when the relative level climbs above the root.
pub fn resolve_relative_import(
    importer: &str,
    importer_is_init: bool,
    module: Option<&str>,
    level: usize,
) -> Option<String> {
    if level == 0 {
        return module.map(str::to_string);
    }

    let mut parts: Vec<&str> = importer.split('.').collect();
    // The package of a plain module is its parent; an `__init__.py` is its own package.
    let climb = if importer_is_init { level - 1 } else { level };
    if climb >= parts.len() {
        return None;
    }
    parts.truncate(parts.len() - climb);

    let mut base = parts.join(".");
    if let Some(module) = module.filter(|m| !m.is_empty()) {
        base.push('.');
        base.push_str(module);
    }
    Some(base)
}

fn init_reexports(file: &FileNode, root_package: &str) -> BTreeMap<String, String> {
    let mut reexports = BTreeMap::new();
    for import in &file.imports {
        for (bound, dotted) in import_bindings(file, import) {
            if root_name(&dotted) == root_package {
                reexports.insert(bound, dotted);
            }
        }
    }
    reexports
}

/// (bound local name, absolute dotted name it denotes) pairs of one import
fn import_bindings(file: &FileNode, import: &RawImport) -> Vec<(String, String)> {
    match import {
        RawImport::Module { module, alias, .. } => match alias {
            Some(alias) => vec![(alias.clone(), module.clone())],
            None => {
                let root = root_name(module).to_string();
                vec![(root.clone(), root)]
            }
        },
        RawImport::From {
            level,
            module,
            names,
            ..
        } => {
            let Some(base) =
                resolve_relative_import(&file.module, file.is_init, module.as_deref(), *level)
            else {
                return Vec::new();
            };
            names
                .iter()
                .map(|n| (n.bound_name().to_string(), format!("{}.{}", base, n.name)))
                .collect()
        }
    }
}

#[derive(Debug, Clone)]
enum Binding {
    /// Bound by an import; `denotes` are the targets the import statements name
    Import { dotted: String, denotes: Vec<String> },
    /// Bound by an import of something outside the package
    External,
    /// A unit of the file itself
    Local(String),
}

/// Resolve every reference of `file` against the package index.
///
/// Edges come from references: a unit referencing an imported name depends on
/// whatever the name resolves to. Imports that no reference uses still make
/// the file itself depend on the imported target.
pub fn resolve_file(file: &FileNode, index: &PackageIndex) -> ResolvedFile {
    let root_package = index.root_package();
    let mut resolved = ResolvedFile {
        path: file.path.clone(),
        ..Default::default()
    };

    // Later bindings shadow earlier ones, so replay imports and definitions in source order.
    enum Event<'a> {
        Import(&'a RawImport),
        Unit(&'a str),
    }
    let mut events: Vec<(usize, Event)> = file
        .imports
        .iter()
        .map(|i| (i.line(), Event::Import(i)))
        .chain(
            file.units
                .iter()
                .map(|u| (u.span.start_line, Event::Unit(u.name.as_str()))),
        )
        .collect();
    events.sort_by_key(|(line, _)| *line);

    let mut bindings: BTreeMap<String, Binding> = BTreeMap::new();
    let mut wildcards: Vec<String> = Vec::new();

    for (_, event) in events {
        match event {
            Event::Unit(name) => {
                bindings.insert(name.to_string(), Binding::Local(name.to_string()));
            }
            Event::Import(import) => {
                if let RawImport::From {
                    level,
                    module,
                    wildcard: true,
                    ..
                } = import
                {
                    match resolve_relative_import(
                        &file.module,
                        file.is_init,
                        module.as_deref(),
                        *level,
                    ) {
                        Some(base) if index.module_path(&base).is_some() => wildcards.push(base),
                        _ => resolved.external_imports += 1,
                    }
                }

                let pairs = import_bindings(file, import);
                if pairs.is_empty() && !matches!(import, RawImport::From { wildcard: true, .. }) {
                    resolved.external_imports += 1;
                }
                for (bound, dotted) in pairs {
                    if root_name(&dotted) != root_package {
                        resolved.external_imports += 1;
                        bindings.insert(bound, Binding::External);
                        continue;
                    }
                    let denotes = match import {
                        RawImport::Module { module, .. } => module.clone(),
                        RawImport::From { .. } => dotted.clone(),
                    };
                    // `import a.b` and `import a.c` both bind `a`; keep every module they name.
                    if let Some(Binding::Import {
                        dotted: existing,
                        denotes: all,
                    }) = bindings.get_mut(&bound)
                        && *existing == dotted
                    {
                        all.push(denotes);
                        continue;
                    }
                    bindings.insert(
                        bound,
                        Binding::Import {
                            dotted,
                            denotes: vec![denotes],
                        },
                    );
                }
            }
        }
    }

    let mut used_bindings: BTreeSet<String> = BTreeSet::new();
    let mut used_wildcards: BTreeSet<String> = BTreeSet::new();

    let mut resolve = |source: &str, reference: &str, resolved: &mut ResolvedFile| {
        let root = root_name(reference);
        let target = match bindings.get(root) {
            Some(Binding::Import { dotted, .. }) => {
                used_bindings.insert(root.to_string());
                let rest = &reference[root.len()..];
                index.resolve_dotted(&format!("{}{}", dotted, rest))
            }
            Some(Binding::Local(name)) => Some(Target::Unit {
                file: file.path.clone(),
                qualified_name: format!("{}.{}", file.module, name),
            }),
            Some(Binding::External) => None,
            None => wildcards.iter().rev().find_map(|module| {
                let target = index.star_lookup(module, root)?;
                used_wildcards.insert(module.clone());
                Some(target)
            }),
        };
        if let Some(target) = target {
            resolved.references.push(ResolvedReference {
                source: source.to_string(),
                target,
            });
        }
    };

    for unit in &file.units {
        for reference in &unit.references {
            resolve(&unit.qualified_name, reference, &mut resolved);
        }
    }
    for reference in &file.module_references {
        resolve(&file.path, reference, &mut resolved);
    }

    // Imported but never referenced: the file as a whole depends on the import.
    for (bound, binding) in &bindings {
        if let Binding::Import { denotes, .. } = binding
            && !used_bindings.contains(bound)
        {
            for dotted in denotes {
                if let Some(target) = index.resolve_dotted(dotted) {
                    resolved.references.push(ResolvedReference {
                        source: file.path.clone(),
                        target,
                    });
                }
            }
        }
    }
    for module in &wildcards {
        if !used_wildcards.contains(module)
            && let Some(path) = index.module_path(module)
        {
            resolved.references.push(ResolvedReference {
                source: file.path.clone(),
                target: Target::File(path.to_string()),
            });
        }
    }

    debug!(
        "{}: {} resolved references, {} external imports",
        file.path,
        resolved.references.len(),
        resolved.external_imports
    );
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SourceFile;
    use crate::utils::analysis::extract::extract_file;
    use std::path::PathBuf;

    fn parse(path: &str, module: &str, is_init: bool, code: &str) -> FileNode {
        let source = SourceFile {
            path: path.to_string(),
            absolute: PathBuf::from(path),
            module: module.to_string(),
            is_init,
        };
        extract_file(&source, code, true).unwrap()
    }

    fn targets(resolved: &ResolvedFile, source: &str) -> Vec<String> {
        let mut out: Vec<String> = resolved
            .references
            .iter()
            .filter(|r| r.source == source)
            .map(|r| r.target.node_id().to_string())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_resolve_relative_import() {
        assert_eq!(
            resolve_relative_import("anyio.pytest_plugin", false, Some("__future__"), 0),
            Some("__future__".to_string())
        );
        assert_eq!(
            resolve_relative_import("anyio.pytest_plugin", false, Some("_core._exceptions"), 1),
            Some("anyio._core._exceptions".to_string())
        );
        assert_eq!(
            resolve_relative_import("anyio.to_interpreter", false, None, 1),
            Some("anyio".to_string())
        );
        assert_eq!(
            resolve_relative_import("anyio._backends._asyncio", false, None, 2),
            Some("anyio".to_string())
        );
        assert_eq!(
            resolve_relative_import("anyio._backends._asyncio", false, Some("_core._eventloop"), 2),
            Some("anyio._core._eventloop".to_string())
        );
        // Inside `anyio/_backends/__init__.py` a single dot is the package itself.
        assert_eq!(
            resolve_relative_import("anyio._backends", true, Some("_asyncio"), 1),
            Some("anyio._backends._asyncio".to_string())
        );
        assert_eq!(resolve_relative_import("anyio.x", false, None, 3), None);
    }

    #[test]
    fn test_from_import_resolves_to_unit() {
        let a = parse(
            "pkg/a.py",
            "pkg.a",
            false,
            "from .b import foo\n\ndef uses():\n    return foo()\n\ndef ignores():\n    return 1\n",
        );
        let b = parse("pkg/b.py", "pkg.b", false, "def foo():\n    pass\n");
        let files = vec![a, b];
        let index = PackageIndex::new("pkg", &files);

        let resolved = resolve_file(&files[0], &index);
        assert_eq!(targets(&resolved, "pkg.a.uses"), vec!["pkg.b.foo"]);
        assert!(targets(&resolved, "pkg.a.ignores").is_empty());
        // `foo` is used, so no file-level fallback edge.
        assert!(targets(&resolved, "pkg/a.py").is_empty());
    }

    #[test]
    fn test_module_alias_attribute_access() {
        let main = parse(
            "pkg/main.py",
            "pkg.main",
            false,
            "import pkg.utils.helpers as utils\n\ndef run():\n    return utils.load(1)\n",
        );
        let helpers = parse(
            "pkg/utils/helpers.py",
            "pkg.utils.helpers",
            false,
            "def load(x):\n    return x\n",
        );
        let files = vec![main, helpers];
        let index = PackageIndex::new("pkg", &files);

        let resolved = resolve_file(&files[0], &index);
        assert_eq!(targets(&resolved, "pkg.main.run"), vec!["pkg.utils.helpers.load"]);
    }

    #[test]
    fn test_init_reexport_is_followed() {
        let init = parse(
            "pkg/utils/__init__.py",
            "pkg.utils",
            true,
            "from .mock_utils import run_pipeline\n",
        );
        let mock = parse(
            "pkg/utils/mock_utils.py",
            "pkg.utils.mock_utils",
            false,
            "def run_pipeline():\n    pass\n",
        );
        let user = parse(
            "pkg/user.py",
            "pkg.user",
            false,
            "from pkg.utils import run_pipeline\n\ndef go():\n    run_pipeline()\n",
        );
        let files = vec![init, mock, user];
        let index = PackageIndex::new("pkg", &files);

        let resolved = resolve_file(&files[2], &index);
        assert_eq!(
            targets(&resolved, "pkg.user.go"),
            vec!["pkg.utils.mock_utils.run_pipeline"]
        );
    }

    #[test]
    fn test_external_and_builtin_names_are_dropped() {
        let a = parse(
            "pkg/a.py",
            "pkg.a",
            false,
            "import os\nfrom numpy import array\n\ndef f():\n    return os.path.join(array(len([])))\n",
        );
        let files = vec![a];
        let index = PackageIndex::new("pkg", &files);

        let resolved = resolve_file(&files[0], &index);
        assert!(resolved.references.is_empty());
        assert_eq!(resolved.external_imports, 2);
    }

    #[test]
    fn test_wildcard_with_references_targets_units() {
        let a = parse(
            "pkg/a.py",
            "pkg.a",
            false,
            "from .b import *\n\ndef f():\n    return helper()\n",
        );
        let b = parse("pkg/b.py", "pkg.b", false, "def helper():\n    pass\n");
        let files = vec![a, b];
        let index = PackageIndex::new("pkg", &files);

        let resolved = resolve_file(&files[0], &index);
        assert_eq!(targets(&resolved, "pkg.a.f"), vec!["pkg.b.helper"]);
        assert!(targets(&resolved, "pkg/a.py").is_empty());
    }

    #[test]
    fn test_wildcard_without_references_targets_file() {
        let a = parse("pkg/a.py", "pkg.a", false, "from .b import *\n\nX = 1\n");
        let b = parse("pkg/b.py", "pkg.b", false, "def helper():\n    pass\n");
        let files = vec![a, b];
        let index = PackageIndex::new("pkg", &files);

        let resolved = resolve_file(&files[0], &index);
        assert_eq!(targets(&resolved, "pkg/a.py"), vec!["pkg/b.py"]);
    }

    #[test]
    fn test_unused_import_falls_back_to_file_edge() {
        let a = parse("pkg/a.py", "pkg.a", false, "from . import b\nimport pkg.c\n");
        let b = parse("pkg/b.py", "pkg.b", false, "");
        let c = parse("pkg/c.py", "pkg.c", false, "");
        let files = vec![a, b, c];
        let index = PackageIndex::new("pkg", &files);

        let resolved = resolve_file(&files[0], &index);
        assert_eq!(targets(&resolved, "pkg/a.py"), vec!["pkg/b.py", "pkg/c.py"]);
    }

    #[test]
    fn test_local_definition_shadows_earlier_import() {
        let a = parse(
            "pkg/a.py",
            "pkg.a",
            false,
            "from .b import foo\n\ndef foo():\n    pass\n\ndef user():\n    return foo()\n",
        );
        let b = parse("pkg/b.py", "pkg.b", false, "def foo():\n    pass\n");
        let files = vec![a, b];
        let index = PackageIndex::new("pkg", &files);

        let resolved = resolve_file(&files[0], &index);
        assert_eq!(targets(&resolved, "pkg.a.user"), vec!["pkg.a.foo"]);
    }

    #[test]
    fn test_namespace_directory_does_not_fall_back_to_root_init() {
        let init = parse("pkg/__init__.py", "pkg", true, "");
        let leaf = parse("pkg/ns/leaf.py", "pkg.ns.leaf", false, "def f():\n    pass\n");
        let files = vec![init, leaf];
        let index = PackageIndex::new("pkg", &files);

        assert_eq!(index.resolve_dotted("pkg.ns.missing"), None);
        assert_eq!(
            index.resolve_dotted("pkg.ns.leaf.f"),
            Some(Target::Unit {
                file: "pkg/ns/leaf.py".to_string(),
                qualified_name: "pkg.ns.leaf.f".to_string()
            })
        );
        assert_eq!(
            index.resolve_dotted("pkg.something"),
            Some(Target::File("pkg/__init__.py".to_string()))
        );
    }
}
