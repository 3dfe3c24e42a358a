//! Source unit extraction for Python files.
//!
//! Parses one file with tree-sitter (nothing is executed) and splits its top
//! level into units: functions, classes and module-level assignments. Nested
//! definitions are folded into their top-level owner. Only top-level import
//! statements are collected for the resolver.

use std::collections::BTreeSet;

use tree_sitter::{Node, Parser};

use crate::core::{
    FileNode, ImportedName, Metric, ParseError, RawImport, SourceFile, Span, Unit, UnitKind,
};

/// Names bound and referenced inside one syntax subtree
#[derive(Debug, Default)]
struct NameSets {
    defined: BTreeSet<String>,
    referenced: BTreeSet<String>,
}

impl NameSets {
    /// References whose root name is not bound locally
    fn free_references(&self) -> BTreeSet<String> {
        self.referenced
            .iter()
            .filter(|r| !self.defined.contains(root_name(r)))
            .cloned()
            .collect()
    }
}

pub fn root_name(reference: &str) -> &str {
    reference.split('.').next().unwrap_or(reference)
}

/// Parse `text` and extract the file's units and top-level imports.
pub fn extract_file(
    source: &SourceFile,
    text: &str,
    include_globals: bool,
) -> Result<FileNode, ParseError> {
    let parse_error = |line: usize, message: String| ParseError {
        path: source.path.clone(),
        line,
        message,
    };

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| parse_error(0, format!("Failed to load Python grammar: {}", e)))?;

    let tree = parser
        .parse(text, None)
        .ok_or_else(|| parse_error(0, "Parser produced no tree".to_string()))?;
    let root = tree.root_node();

    if root.has_error() {
        let (line, message) = first_syntax_error(root);
        return Err(parse_error(line, message));
    }

    let bytes = text.as_bytes();
    let mut units: Vec<Unit> = Vec::new();
    let mut imports = Vec::new();
    let mut module_references = BTreeSet::new();

    let mut cursor = root.walk();
    for statement in root.named_children(&mut cursor) {
        match statement.kind() {
            "function_definition" | "class_definition" | "decorated_definition" => {
                let Some((name, kind)) = definition_name(statement, bytes) else {
                    continue;
                };
                let names = collect_names(statement, bytes);
                push_unit(
                    &mut units,
                    source,
                    name,
                    kind,
                    names.defined.clone(),
                    names.free_references(),
                    span(statement),
                );
            }
            "import_statement" => imports.extend(module_imports(statement, bytes)),
            "import_from_statement" => imports.extend(from_import(statement, bytes)),
            "future_import_statement" => {}
            "expression_statement" if include_globals && is_assignment(statement) => {
                let names = collect_names(statement, bytes);
                let free = names.free_references();
                for target in assignment_targets(statement, bytes) {
                    push_unit(
                        &mut units,
                        source,
                        target,
                        UnitKind::Global,
                        names.defined.clone(),
                        free.clone(),
                        span(statement),
                    );
                }
            }
            _ => {
                let names = collect_names(statement, bytes);
                module_references.extend(names.free_references());
            }
        }
    }

    Ok(FileNode {
        path: source.path.clone(),
        module: source.module.clone(),
        is_init: source.is_init,
        units,
        imports,
        module_references,
        line_count: text.lines().count(),
        complexity: Metric::Unavailable,
        volatility: Metric::Unavailable,
    })
}

fn push_unit(
    units: &mut Vec<Unit>,
    source: &SourceFile,
    name: String,
    kind: UnitKind,
    defined: BTreeSet<String>,
    references: BTreeSet<String>,
    span: Span,
) {
    // A rebinding of a top-level name merges into the first unit of that name.
    if let Some(existing) = units.iter_mut().find(|u| u.name == name) {
        existing.kind = kind;
        existing.defined.extend(defined);
        existing.references.extend(references);
        existing.span.end_line = existing.span.end_line.max(span.end_line);
        return;
    }

    let mut defined = defined;
    defined.insert(name.clone());
    let references = references
        .into_iter()
        .filter(|r| root_name(r) != name)
        .collect();

    units.push(Unit {
        qualified_name: format!("{}.{}", source.module, name),
        file: source.path.clone(),
        name,
        kind,
        defined,
        references,
        span,
    });
}

fn span(node: Node) -> Span {
    Span {
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
    }
}

fn text_of(node: Node, bytes: &[u8]) -> String {
    node.utf8_text(bytes)
        .map(|t| t.split_whitespace().collect::<String>())
        .unwrap_or_default()
}

fn first_syntax_error(root: Node) -> (usize, String) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() {
            return (node.start_position().row + 1, "invalid syntax".to_string());
        }
        if node.is_missing() {
            return (
                node.start_position().row + 1,
                format!("expected '{}'", node.kind()),
            );
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        // Reverse so the leftmost child is examined first.
        stack.extend(children.into_iter().rev());
    }
    (root.start_position().row + 1, "invalid syntax".to_string())
}

fn definition_name(node: Node, bytes: &[u8]) -> Option<(String, UnitKind)> {
    let definition = if node.kind() == "decorated_definition" {
        node.child_by_field_name("definition")?
    } else {
        node
    };
    let kind = match definition.kind() {
        "function_definition" => UnitKind::Function,
        "class_definition" => UnitKind::Class,
        _ => return None,
    };
    let name = definition.child_by_field_name("name")?;
    Some((text_of(name, bytes), kind))
}

fn is_assignment(statement: Node) -> bool {
    statement
        .named_child(0)
        .is_some_and(|child| child.kind() == "assignment")
}

/// Plain names bound by a top-level assignment statement (`a = b = 1`, `x, y = ...`)
fn assignment_targets(statement: Node, bytes: &[u8]) -> Vec<String> {
    let mut targets = Vec::new();
    let mut current = statement.named_child(0);
    while let Some(assignment) = current.filter(|n| n.kind() == "assignment") {
        if let Some(left) = assignment.child_by_field_name("left") {
            pattern_names(left, bytes, &mut targets);
        }
        current = assignment.child_by_field_name("right");
    }
    targets
}

fn pattern_names(node: Node, bytes: &[u8], out: &mut Vec<String>) {
    match node.kind() {
        "identifier" => out.push(text_of(node, bytes)),
        "pattern_list" | "tuple_pattern" | "list_pattern" | "list_splat_pattern" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                pattern_names(child, bytes, out);
            }
        }
        _ => {}
    }
}

fn is_field(parent: Node, field: &str, node: Node) -> bool {
    parent.child_by_field_name(field) == Some(node)
}

/// Whether the identifier (or pattern) `node` is in a position that binds a name.
fn is_binding(node: Node) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "function_definition" | "class_definition" => is_field(parent, "name", node),
        "parameters" | "lambda_parameters" | "as_pattern_target" => true,
        "default_parameter" | "typed_default_parameter" => is_field(parent, "name", node),
        "typed_parameter" => !is_field(parent, "type", node),
        "assignment" | "augmented_assignment" | "for_statement" | "for_in_clause" => {
            is_field(parent, "left", node)
        }
        "named_expression" => is_field(parent, "name", node),
        "pattern_list" | "tuple_pattern" | "list_pattern" | "list_splat_pattern"
        | "dictionary_splat_pattern" => is_binding(parent),
        _ => is_field(parent, "alias", node),
    }
}

/// Dotted chain for `a.b.c` when its base is a plain name
fn attribute_chain(node: Node, bytes: &[u8]) -> Option<String> {
    let mut parts = Vec::new();
    let mut current = node;
    while current.kind() == "attribute" {
        parts.push(text_of(current.child_by_field_name("attribute")?, bytes));
        current = current.child_by_field_name("object")?;
    }
    if current.kind() != "identifier" {
        return None;
    }
    parts.push(text_of(current, bytes));
    parts.reverse();
    Some(parts.join("."))
}

/// Names bound by an import nested in a body; these imports are not resolved.
fn nested_import_bindings(node: Node, bytes: &[u8], out: &mut BTreeSet<String>) {
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        match name.kind() {
            "aliased_import" => {
                if let Some(alias) = name.child_by_field_name("alias") {
                    out.insert(text_of(alias, bytes));
                }
            }
            _ => {
                let dotted = text_of(name, bytes);
                let bound = if node.kind() == "import_statement" {
                    root_name(&dotted).to_string()
                } else {
                    dotted.rsplit('.').next().unwrap_or(&dotted).to_string()
                };
                out.insert(bound);
            }
        }
    }
}

fn collect_names(root: Node, bytes: &[u8]) -> NameSets {
    let mut names = NameSets::default();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        match node.kind() {
            "identifier" => {
                let text = text_of(node, bytes);
                if is_binding(node) {
                    names.defined.insert(text);
                } else {
                    names.referenced.insert(text);
                }
                continue;
            }
            "attribute" => {
                if let Some(chain) = attribute_chain(node, bytes) {
                    names.referenced.insert(chain);
                } else if let Some(object) = node.child_by_field_name("object") {
                    // `call().attr`: the attribute name itself is not a reference.
                    stack.push(object);
                }
                continue;
            }
            "keyword_argument" => {
                if let Some(value) = node.child_by_field_name("value") {
                    stack.push(value);
                }
                continue;
            }
            "import_statement" | "import_from_statement" => {
                nested_import_bindings(node, bytes, &mut names.defined);
                continue;
            }
            "future_import_statement" | "global_statement" | "nonlocal_statement" => continue,
            _ => {}
        }

        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }

    names
}

fn module_imports(node: Node, bytes: &[u8]) -> Vec<RawImport> {
    let line = node.start_position().row + 1;
    let mut cursor = node.walk();
    node.children_by_field_name("name", &mut cursor)
        .filter_map(|name| match name.kind() {
            "dotted_name" => Some(RawImport::Module {
                module: text_of(name, bytes),
                alias: None,
                line,
            }),
            "aliased_import" => Some(RawImport::Module {
                module: text_of(name.child_by_field_name("name")?, bytes),
                alias: name.child_by_field_name("alias").map(|a| text_of(a, bytes)),
                line,
            }),
            _ => None,
        })
        .collect()
}

fn from_import(node: Node, bytes: &[u8]) -> Option<RawImport> {
    let module_node = node.child_by_field_name("module_name")?;
    let (level, module) = if module_node.kind() == "relative_import" {
        let mut level = 0;
        let mut module = None;
        let mut cursor = module_node.walk();
        for child in module_node.named_children(&mut cursor) {
            match child.kind() {
                "import_prefix" => level = text_of(child, bytes).matches('.').count(),
                "dotted_name" => module = Some(text_of(child, bytes)),
                _ => {}
            }
        }
        (level, module)
    } else {
        (0, Some(text_of(module_node, bytes)))
    };

    let mut cursor = node.walk();
    let names: Vec<ImportedName> = node
        .children_by_field_name("name", &mut cursor)
        .filter_map(|name| match name.kind() {
            "dotted_name" => Some(ImportedName {
                name: text_of(name, bytes),
                alias: None,
            }),
            "aliased_import" => Some(ImportedName {
                name: text_of(name.child_by_field_name("name")?, bytes),
                alias: name.child_by_field_name("alias").map(|a| text_of(a, bytes)),
            }),
            _ => None,
        })
        .collect();

    let mut cursor = node.walk();
    let wildcard = node
        .named_children(&mut cursor)
        .any(|child| child.kind() == "wildcard_import");

    Some(RawImport::From {
        level,
        module,
        names,
        wildcard,
        line: node.start_position().row + 1,
    })
}
