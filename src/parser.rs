//! Python source parsing on top of tree-sitter.
//!
//! [`ParsedSource`] owns the source text together with its syntax tree, and
//! the free functions here are the small node helpers the analysis modules
//! share (docstrings, parameter lists, dotted names, descendant walks).
//! [`analyze_structure`] produces the structural summary of a module.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser, Tree};

/// First syntax problem found in a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

pub struct ParsedSource {
    source: String,
    tree: Tree,
}

impl ParsedSource {
    pub fn parse(source: &str) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .context("Failed to load the Python grammar")?;

        let tree = parser
            .parse(source, None)
            .context("Failed to parse Python source")?;

        Ok(Self {
            source: source.to_string(),
            tree,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: Node<'_>) -> &str {
        node_text(node, &self.source)
    }

    pub fn has_errors(&self) -> bool {
        self.root().has_error()
    }

    /// Location of the first ERROR or MISSING node, if the parse was not clean.
    pub fn syntax_error(&self) -> Option<SyntaxIssue> {
        let root = self.root();
        if !root.has_error() {
            return None;
        }

        let broken = descendants(root)
            .into_iter()
            .chain(all_missing(root))
            .filter(|n| n.is_error() || n.is_missing())
            .min_by_key(|n| n.start_byte())?;

        let pos = broken.start_position();
        let message = if broken.is_missing() {
            format!("invalid syntax: missing '{}'", broken.kind())
        } else {
            let snippet: String = self.text(broken).chars().take(40).collect();
            format!("invalid syntax near '{}'", snippet.trim())
        };

        Some(SyntaxIssue {
            line: pos.row + 1,
            column: pos.column + 1,
            message,
        })
    }
}

/// MISSING nodes are usually anonymous tokens, so the named walk skips them.
fn all_missing(root: Node<'_>) -> Vec<Node<'_>> {
    let mut found = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_missing() {
            found.push(node);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            stack.extend(node.children(&mut cursor));
        }
    }
    found
}

pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

pub fn line_of(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

pub fn end_line_of(node: Node<'_>) -> usize {
    node.end_position().row + 1
}

pub fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

pub fn first_named_child(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    let first = node.named_children(&mut cursor).next();
    first
}

/// Every named node below `node` in pre-order (source order).
pub fn descendants(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let mut stack: Vec<Node<'_>> = named_children(node).into_iter().rev().collect();
    while let Some(current) = stack.pop() {
        out.push(current);
        stack.extend(named_children(current).into_iter().rev());
    }
    out
}

/// Statements of a block, without interleaved comments.
pub fn statements(block: Node<'_>) -> Vec<Node<'_>> {
    named_children(block)
        .into_iter()
        .filter(|n| n.kind() != "comment")
        .collect()
}

/// `def`/`class` node behind an optional decorator wrapper, plus the decorators.
pub fn unwrap_definition(stmt: Node<'_>) -> Option<(Node<'_>, Vec<Node<'_>>)> {
    match stmt.kind() {
        "function_definition" | "class_definition" => Some((stmt, Vec::new())),
        "decorated_definition" => {
            let definition = stmt.child_by_field_name("definition")?;
            let decorators = named_children(stmt)
                .into_iter()
                .filter(|n| n.kind() == "decorator")
                .collect();
            Some((definition, decorators))
        }
        _ => None,
    }
}

pub fn is_async(function: Node<'_>) -> bool {
    let mut cursor = function.walk();
    let result = function.children(&mut cursor).any(|c| c.kind() == "async");
    result
}

/// Name of a decorator: `@app.route("/")` -> `app.route`.
pub fn decorator_name(decorator: Node<'_>, source: &str) -> String {
    let Some(expr) = first_named_child(decorator) else {
        return String::new();
    };
    let target = if expr.kind() == "call" {
        expr.child_by_field_name("function").unwrap_or(expr)
    } else {
        expr
    };
    dotted_name(target, source)
}

/// Source text of a (possibly dotted) name with whitespace removed.
pub fn dotted_name(node: Node<'_>, source: &str) -> String {
    node_text(node, source)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Docstring of a module, class or function body.
pub fn docstring(body: Node<'_>, source: &str) -> Option<String> {
    let first = statements(body).into_iter().next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first_named_child(first)?;
    if expr.kind() != "string" {
        return None;
    }
    Some(clean_docstring(&string_value(node_text(expr, source))))
}

/// Strip prefix letters and quotes from a string literal.
pub fn string_value(literal: &str) -> String {
    let body = literal.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= quote.len() * 2 && body.starts_with(quote) && body.ends_with(quote) {
            return body[quote.len()..body.len() - quote.len()].to_string();
        }
    }
    body.to_string()
}

/// Dedent a docstring the way Python's `inspect.cleandoc` does.
pub fn clean_docstring(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let Some((first, rest)) = lines.split_first() else {
        return String::new();
    };

    let indent = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned = vec![first.trim().to_string()];
    cleaned.extend(
        rest.iter()
            .map(|l| l.get(indent..).unwrap_or("").trim_end().to_string()),
    );

    while cleaned.first().is_some_and(|l| l.is_empty()) {
        cleaned.remove(0);
    }
    while cleaned.last().is_some_and(|l| l.is_empty()) {
        cleaned.pop();
    }
    cleaned.join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Positional,
    VarPositional,
    KeywordOnly,
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub annotation: Option<String>,
    pub default: Option<String>,
    pub kind: ParamKind,
}

impl Parameter {
    /// `name: type = default`, with `*`/`**` for variadics.
    pub fn signature(&self) -> String {
        let prefix = match self.kind {
            ParamKind::VarPositional => "*",
            ParamKind::VarKeyword => "**",
            _ => "",
        };
        let mut out = format!("{prefix}{}", self.name);
        if let Some(annotation) = &self.annotation {
            out.push_str(&format!(": {annotation}"));
        }
        if let Some(default) = &self.default {
            out.push_str(&format!(" = {default}"));
        }
        out
    }
}

/// Parameters of a `def`, in declaration order.
pub fn parameters(function: Node<'_>, source: &str) -> Vec<Parameter> {
    let Some(params) = function.child_by_field_name("parameters") else {
        return Vec::new();
    };

    let mut keyword_only = false;
    let mut out = Vec::new();
    let positional = |keyword_only: bool| {
        if keyword_only {
            ParamKind::KeywordOnly
        } else {
            ParamKind::Positional
        }
    };

    for param in named_children(params) {
        let text_of = |field: &str| {
            param
                .child_by_field_name(field)
                .map(|n| node_text(n, source).to_string())
        };

        let parsed = match param.kind() {
            "identifier" => Some(Parameter {
                name: node_text(param, source).to_string(),
                annotation: None,
                default: None,
                kind: positional(keyword_only),
            }),
            "typed_parameter" => first_named_child(param).map(|inner| {
                let (name, kind) = splat_name(inner, source, positional(keyword_only));
                Parameter {
                    name,
                    annotation: text_of("type"),
                    default: None,
                    kind,
                }
            }),
            "default_parameter" | "typed_default_parameter" => Some(Parameter {
                name: text_of("name").unwrap_or_default(),
                annotation: text_of("type"),
                default: text_of("value"),
                kind: positional(keyword_only),
            }),
            "list_splat_pattern" | "dictionary_splat_pattern" => {
                let (name, kind) = splat_name(param, source, positional(keyword_only));
                Some(Parameter {
                    name,
                    annotation: None,
                    default: None,
                    kind,
                })
            }
            "keyword_separator" => {
                keyword_only = true;
                None
            }
            _ => None,
        };

        if let Some(p) = parsed {
            if p.kind == ParamKind::VarPositional {
                keyword_only = true;
            }
            out.push(p);
        }
    }

    out
}

fn splat_name(node: Node<'_>, source: &str, fallback: ParamKind) -> (String, ParamKind) {
    let text = node_text(node, source);
    match node.kind() {
        "list_splat_pattern" => (text.trim_start_matches('*').to_string(), ParamKind::VarPositional),
        "dictionary_splat_pattern" => {
            (text.trim_start_matches('*').to_string(), ParamKind::VarKeyword)
        }
        _ => (text.to_string(), fallback),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportInfo {
    /// `os.path` for `import os.path`, `typing.List` for `from typing import List`.
    pub name: String,
    pub alias: Option<String>,
    pub module: Option<String>,
    pub from_import: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    /// Positional parameter names, `self` included.
    pub args: Vec<String>,
    pub params: Vec<Parameter>,
    pub returns: Option<String>,
    pub line: usize,
    pub end_line: usize,
    pub decorators: Vec<String>,
    pub docstring: Option<String>,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub bases: Vec<String>,
    pub line: usize,
    pub end_line: usize,
    pub methods: Vec<FunctionInfo>,
    pub docstring: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLine {
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleStructure {
    pub docstring: Option<String>,
    pub imports: Vec<ImportInfo>,
    /// Functions outside any class (nested functions included).
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    /// Module-level simple-name assignment targets.
    pub global_vars: Vec<NamedLine>,
    pub function_calls: Vec<NamedLine>,
    pub num_lines: usize,
    pub num_functions: usize,
    pub num_classes: usize,
    pub syntax_error: Option<SyntaxIssue>,
}

pub fn function_info(function: Node<'_>, decorators: &[Node<'_>], source: &str) -> FunctionInfo {
    let params = parameters(function, source);
    FunctionInfo {
        name: function
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string())
            .unwrap_or_default(),
        args: params
            .iter()
            .filter(|p| p.kind == ParamKind::Positional)
            .map(|p| p.name.clone())
            .collect(),
        params,
        returns: function
            .child_by_field_name("return_type")
            .map(|n| node_text(n, source).to_string()),
        line: decorators.first().map_or(line_of(function), |d| line_of(*d)),
        end_line: end_line_of(function),
        decorators: decorators.iter().map(|d| decorator_name(*d, source)).collect(),
        docstring: function
            .child_by_field_name("body")
            .and_then(|b| docstring(b, source)),
        is_async: is_async(function),
    }
}

pub fn class_bases(class: Node<'_>, source: &str) -> Vec<String> {
    class
        .child_by_field_name("superclasses")
        .map(|args| {
            named_children(args)
                .into_iter()
                .filter(|n| matches!(n.kind(), "identifier" | "attribute"))
                .map(|n| dotted_name(n, source))
                .collect()
        })
        .unwrap_or_default()
}

/// Build the structural summary of a Python module. Broken syntax does not
/// abort the analysis; whatever tree-sitter recovered is reported along
/// with the first error location.
pub fn analyze_structure(source: &str) -> Result<ModuleStructure> {
    let parsed = ParsedSource::parse(source)?;
    Ok(structure_of(&parsed))
}

pub fn structure_of(parsed: &ParsedSource) -> ModuleStructure {
    let source = parsed.source();
    let root = parsed.root();
    let mut visitor = StructureVisitor {
        source,
        out: ModuleStructure {
            docstring: docstring(root, source),
            num_lines: source.lines().count(),
            syntax_error: parsed.syntax_error(),
            ..ModuleStructure::default()
        },
        class_stack: Vec::new(),
    };

    for stmt in statements(root) {
        if stmt.kind() == "expression_statement" {
            visitor.record_globals(stmt);
        }
    }
    visitor.visit_children(root);

    let mut out = visitor.out;
    out.classes.sort_by_key(|c| c.line);
    out.num_functions = out.functions.len();
    out.num_classes = out.classes.len();
    out
}

struct StructureVisitor<'s> {
    source: &'s str,
    out: ModuleStructure,
    /// Classes being visited; finished ones move to `out.classes`.
    class_stack: Vec<ClassInfo>,
}

impl<'s> StructureVisitor<'s> {
    fn visit_children(&mut self, node: Node<'_>) {
        for child in named_children(node) {
            self.visit(child);
        }
    }

    fn visit(&mut self, node: Node<'_>) {
        match node.kind() {
            "import_statement" => self.record_import(node),
            "import_from_statement" => self.record_from_import(node),
            "call" => {
                self.record_call(node);
                self.visit_children(node);
            }
            "decorated_definition" => {
                if let Some((definition, decorators)) = unwrap_definition(node) {
                    for decorator in &decorators {
                        self.visit_children(*decorator);
                    }
                    self.visit_definition(definition, &decorators);
                }
            }
            "function_definition" | "class_definition" => self.visit_definition(node, &[]),
            _ => self.visit_children(node),
        }
    }

    fn visit_definition(&mut self, definition: Node<'_>, decorators: &[Node<'_>]) {
        if definition.kind() == "class_definition" {
            self.class_stack.push(ClassInfo {
                name: definition
                    .child_by_field_name("name")
                    .map(|n| node_text(n, self.source).to_string())
                    .unwrap_or_default(),
                bases: class_bases(definition, self.source),
                line: decorators.first().map_or(line_of(definition), |d| line_of(*d)),
                end_line: end_line_of(definition),
                methods: Vec::new(),
                docstring: definition
                    .child_by_field_name("body")
                    .and_then(|b| docstring(b, self.source)),
            });
            self.visit_children(definition);
            if let Some(class) = self.class_stack.pop() {
                self.out.classes.push(class);
            }
            return;
        }

        let info = function_info(definition, decorators, self.source);
        match self.class_stack.last_mut() {
            Some(class) => class.methods.push(info),
            None => self.out.functions.push(info),
        }
        self.visit_children(definition);
    }

    fn record_import(&mut self, node: Node<'_>) {
        for name in named_children(node) {
            let (dotted, alias) = self.import_name(name);
            if dotted.is_empty() {
                continue;
            }
            self.out.imports.push(ImportInfo {
                name: dotted,
                alias,
                module: None,
                from_import: false,
                line: line_of(node),
            });
        }
    }

    fn record_from_import(&mut self, node: Node<'_>) {
        let module_node = node.child_by_field_name("module_name");
        let module = module_node.map(|n| dotted_name(n, self.source));

        for name in named_children(node) {
            if Some(name) == module_node {
                continue;
            }
            let (imported, alias) = match name.kind() {
                "wildcard_import" => ("*".to_string(), None),
                _ => self.import_name(name),
            };
            if imported.is_empty() {
                continue;
            }
            let full = match module.as_deref() {
                Some(m) if !m.chars().all(|c| c == '.') => format!("{m}.{imported}"),
                _ => imported,
            };
            self.out.imports.push(ImportInfo {
                name: full,
                alias,
                module: module.clone(),
                from_import: true,
                line: line_of(node),
            });
        }
    }

    fn import_name(&self, node: Node<'_>) -> (String, Option<String>) {
        match node.kind() {
            "dotted_name" => (dotted_name(node, self.source), None),
            "aliased_import" => (
                node.child_by_field_name("name")
                    .map(|n| dotted_name(n, self.source))
                    .unwrap_or_default(),
                node.child_by_field_name("alias")
                    .map(|n| node_text(n, self.source).to_string()),
            ),
            _ => (String::new(), None),
        }
    }

    fn record_call(&mut self, node: Node<'_>) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let name = match function.kind() {
            "identifier" => Some(node_text(function, self.source).to_string()),
            "attribute" => {
                let attr = function
                    .child_by_field_name("attribute")
                    .map(|n| node_text(n, self.source))
                    .unwrap_or_default();
                match function.child_by_field_name("object") {
                    Some(obj) if obj.kind() == "identifier" => {
                        Some(format!("{}.{attr}", node_text(obj, self.source)))
                    }
                    _ => Some(format!("(...).{attr}")),
                }
            }
            _ => None,
        };
        if let Some(name) = name {
            self.out.function_calls.push(NamedLine {
                name,
                line: line_of(node),
            });
        }
    }

    fn record_globals(&mut self, stmt: Node<'_>) {
        let Some(expr) = first_named_child(stmt) else {
            return;
        };
        // `a = b = 1` nests the second assignment in `right`.
        let mut current = Some(expr);
        while let Some(assign) = current.filter(|n| n.kind() == "assignment") {
            if let Some(left) = assign.child_by_field_name("left") {
                if left.kind() == "identifier" {
                    self.out.global_vars.push(NamedLine {
                        name: node_text(left, self.source).to_string(),
                        line: line_of(assign),
                    });
                }
            }
            current = assign.child_by_field_name("right");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#""""Inventory helpers."""
import os
import numpy as np
from typing import List, Optional as Opt

LIMIT = 10


class Store(Base, abc.ABC):
    """Keeps items."""

    def __init__(self, name):
        self.name = name

    @property
    def size(self):
        def inner():
            return 1
        return inner()


def load(path: str, *args, strict: bool = False, **kwargs) -> List[str]:
    """Load lines.

    Args:
        path: file to read
    """
    with open(path) as fh:
        return os.path.basename(fh.read()).split()


async def fetch():
    pass
"#;

    #[test]
    fn test_imports() {
        let structure = analyze_structure(SAMPLE).unwrap();
        let names: Vec<_> = structure.imports.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["os", "numpy", "typing.List", "typing.Optional"]);
        assert_eq!(structure.imports[1].alias.as_deref(), Some("np"));
        assert_eq!(structure.imports[3].alias.as_deref(), Some("Opt"));
        assert!(structure.imports[2].from_import);
        assert_eq!(structure.imports[2].module.as_deref(), Some("typing"));
    }

    #[test]
    fn test_classes_collect_methods() {
        let structure = analyze_structure(SAMPLE).unwrap();
        assert_eq!(structure.num_classes, 1);

        let store = &structure.classes[0];
        assert_eq!(store.name, "Store");
        assert_eq!(store.bases, vec!["Base", "abc.ABC"]);
        assert_eq!(store.docstring.as_deref(), Some("Keeps items."));

        let methods: Vec<_> = store.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(methods, vec!["__init__", "size", "inner"]);
        assert_eq!(store.methods[1].decorators, vec!["property"]);
    }

    #[test]
    fn test_module_functions() {
        let structure = analyze_structure(SAMPLE).unwrap();
        let names: Vec<_> = structure.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["load", "fetch"]);
        assert_eq!(structure.num_functions, 2);

        let load = &structure.functions[0];
        assert_eq!(load.args, vec!["path"]);
        assert_eq!(load.returns.as_deref(), Some("List[str]"));
        assert_eq!(load.docstring.as_deref(), Some("Load lines.\n\nArgs:\n    path: file to read"));
        assert!(structure.functions[1].is_async);

        let kinds: Vec<_> = load.params.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParamKind::Positional,
                ParamKind::VarPositional,
                ParamKind::KeywordOnly,
                ParamKind::VarKeyword
            ]
        );
        assert_eq!(load.params[2].signature(), "strict: bool = False");
    }

    #[test]
    fn test_globals_calls_and_docstring() {
        let structure = analyze_structure(SAMPLE).unwrap();
        assert_eq!(structure.docstring.as_deref(), Some("Inventory helpers."));
        assert_eq!(structure.global_vars.len(), 1);
        assert_eq!(structure.global_vars[0].name, "LIMIT");

        let calls: Vec<_> = structure
            .function_calls
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert!(calls.contains(&"inner"));
        assert!(calls.contains(&"open"));
        // Only a bare name is spelled out as the receiver.
        assert!(calls.contains(&"(...).basename"));
        assert!(!calls.contains(&"os.path.basename"));
        assert!(calls.contains(&"(...).split"));
        assert!(calls.contains(&"fh.read"));
        assert!(structure.syntax_error.is_none());
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let structure = analyze_structure("def broken(:\n    pass\n").unwrap();
        let issue = structure.syntax_error.expect("syntax error expected");
        assert_eq!(issue.line, 1);
    }

    #[test]
    fn test_clean_docstring_dedents() {
        let raw = "\n    Summary line.\n\n    Details here.\n    ";
        assert_eq!(clean_docstring(raw), "Summary line.\n\nDetails here.");
    }

    #[test]
    fn test_string_value_strips_quotes() {
        assert_eq!(string_value(r#"r"abc""#), "abc");
        assert_eq!(string_value("'''x'''"), "x");
        assert_eq!(string_value("f'{a}'"), "{a}");
    }
}
