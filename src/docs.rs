//! Markdown API documentation and docstring/code consistency checks.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tree_sitter::Node;

use crate::parser::{
    class_bases, docstring, first_named_child, function_info, named_children, node_text,
    statements, unwrap_definition, FunctionInfo, ParsedSource,
};
use crate::scanner::{collect_python_files, module_name, read_source, write_file_checked};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocEntry {
    pub name: String,
    pub description: String,
}

/// Sections of a Google-style docstring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocstringInfo {
    pub summary: String,
    pub description: String,
    pub params: Vec<DocEntry>,
    pub returns: String,
    pub raises: Vec<DocEntry>,
    pub examples: Vec<String>,
    pub todo: Vec<String>,
}

impl DocstringInfo {
    pub fn param(&self, name: &str) -> Option<&DocEntry> {
        self.params.iter().find(|p| p.name == name)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Description,
    Params,
    Returns,
    Raises,
    Examples,
    Todo,
}

fn section_heading(line: &str) -> Option<Section> {
    let lower = line.to_lowercase();
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| lower.starts_with(p));
    if starts(&["args:", "arguments:", "parameters:", "params:"]) {
        Some(Section::Params)
    } else if starts(&["returns:", "return:", "yields:"]) {
        Some(Section::Returns)
    } else if starts(&["raises:", "exceptions:", "throws:"]) {
        Some(Section::Raises)
    } else if starts(&["examples:", "example:"]) {
        Some(Section::Examples)
    } else if starts(&["todo:"]) {
        Some(Section::Todo)
    } else {
        None
    }
}

/// Split a docstring into summary, description and the usual sections.
pub fn parse_docstring(text: &str) -> DocstringInfo {
    let mut info = DocstringInfo::default();
    let mut lines = text.lines();
    let Some(first) = lines.next() else {
        return info;
    };
    info.summary = first.trim().to_string();

    let Ok(entry) = Regex::new(r"^\*{0,2}(\w+)(?:\s*\(([^)]+)\))?\s*:\s*(.*)$") else {
        return info;
    };

    let mut section = Section::Description;
    let mut description = Vec::new();
    let mut returns = Vec::new();

    for raw in lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(next) = section_heading(line) {
            section = next;
            continue;
        }

        match section {
            Section::Description => description.push(line),
            Section::Params | Section::Raises => {
                let target = if section == Section::Params {
                    &mut info.params
                } else {
                    &mut info.raises
                };
                if let Some(caps) = entry.captures(line) {
                    target.push(DocEntry {
                        name: caps[1].to_string(),
                        description: caps[3].trim().to_string(),
                    });
                } else if let Some(last) = target.last_mut() {
                    // continuation line of the previous entry
                    last.description.push(' ');
                    last.description.push_str(line);
                }
            }
            Section::Returns => returns.push(line),
            Section::Examples => info.examples.push(line.to_string()),
            Section::Todo => info.todo.push(line.to_string()),
        }
    }

    info.description = description.join("\n");
    info.returns = returns.join(" ");
    info
}

struct DocClass {
    name: String,
    bases: Vec<String>,
    doc: Option<String>,
    methods: Vec<FunctionInfo>,
}

struct DocModule {
    doc: Option<String>,
    classes: Vec<DocClass>,
    functions: Vec<FunctionInfo>,
}

/// Top-level classes (with their direct methods) and functions.
fn read_module(parsed: &ParsedSource) -> DocModule {
    let source = parsed.source();
    let root = parsed.root();
    let mut module = DocModule {
        doc: docstring(root, source),
        classes: Vec::new(),
        functions: Vec::new(),
    };

    for stmt in statements(root) {
        let Some((definition, decorators)) = unwrap_definition(stmt) else {
            continue;
        };
        if definition.kind() == "function_definition" {
            module.functions.push(function_info(definition, &decorators, source));
            continue;
        }

        let body = definition.child_by_field_name("body");
        let methods = body
            .map(|b| {
                statements(b)
                    .into_iter()
                    .filter_map(unwrap_definition)
                    .filter(|(d, _)| d.kind() == "function_definition")
                    .map(|(d, decos)| function_info(d, &decos, source))
                    .collect()
            })
            .unwrap_or_default();

        module.classes.push(DocClass {
            name: definition
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string())
                .unwrap_or_default(),
            bases: class_bases(definition, source),
            doc: body.and_then(|b| docstring(b, source)),
            methods,
        });
    }

    module
}

fn signature(function: &FunctionInfo) -> String {
    let params: Vec<String> = function.params.iter().map(|p| p.signature()).collect();
    let prefix = if function.is_async { "async def" } else { "def" };
    let returns = function
        .returns
        .as_ref()
        .map(|r| format!(" -> {r}"))
        .unwrap_or_default();
    format!("{prefix} {}({}){returns}", function.name, params.join(", "))
}

fn anchor(name: &str) -> String {
    name.to_lowercase().replace('.', "")
}

fn format_function(title: &str, function: &FunctionInfo) -> String {
    let mut out = format!("### `{title}()`\n\n```python\n{}\n```\n\n", signature(function));
    let doc = function
        .docstring
        .as_deref()
        .map(parse_docstring)
        .unwrap_or_default();

    if doc.summary.is_empty() {
        out.push_str("*No documentation.*\n\n");
    } else {
        out.push_str(&format!("{}\n\n", doc.summary));
    }
    if !doc.description.is_empty() {
        out.push_str(&format!("{}\n\n", doc.description));
    }

    let params: Vec<_> = function
        .params
        .iter()
        .filter(|p| p.name != "self" && p.name != "cls")
        .collect();
    if !params.is_empty() {
        out.push_str("**Parameters:**\n\n");
        for param in params {
            let kind = param
                .annotation
                .as_ref()
                .map(|a| format!(" (`{a}`)"))
                .unwrap_or_default();
            let text = doc
                .param(&param.name)
                .map(|p| p.description.as_str())
                .unwrap_or("No description");
            out.push_str(&format!("- `{}`{kind}: {text}\n", param.name));
        }
        out.push('\n');
    }

    if !doc.returns.is_empty() || function.returns.is_some() {
        let kind = function
            .returns
            .as_ref()
            .map(|r| format!("`{r}` "))
            .unwrap_or_default();
        out.push_str(&format!("**Returns:** {kind}{}\n\n", doc.returns));
    }

    if !doc.raises.is_empty() {
        out.push_str("**Raises:**\n\n");
        for raised in &doc.raises {
            out.push_str(&format!("- `{}`: {}\n", raised.name, raised.description));
        }
        out.push('\n');
    }

    if !doc.examples.is_empty() {
        out.push_str(&format!(
            "**Examples:**\n\n```python\n{}\n```\n\n",
            doc.examples.join("\n")
        ));
    }

    out
}

fn summary_or_default(doc: Option<&str>) -> String {
    doc.map(parse_docstring)
        .map(|d| d.summary)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "No description".to_string())
}

fn render_module(module_path: &str, module: &DocModule) -> String {
    let mut out = format!("# Module `{module_path}`\n\n");
    if let Some(doc) = &module.doc {
        out.push_str(&format!("{doc}\n\n"));
    }

    if !module.classes.is_empty() {
        out.push_str("## Classes\n\n| Class | Description |\n|-------|-------------|\n");
        for class in &module.classes {
            out.push_str(&format!(
                "| [`{}`](#{}) | {} |\n",
                class.name,
                anchor(&class.name),
                summary_or_default(class.doc.as_deref())
            ));
        }
        out.push('\n');

        for class in &module.classes {
            out.push_str(&format!("### `{}`\n\n", class.name));
            if !class.bases.is_empty() {
                out.push_str(&format!("*Inherits from:* `{}`\n\n", class.bases.join("`, `")));
            }
            if let Some(doc) = &class.doc {
                out.push_str(&format!("{doc}\n\n"));
            }
            if !class.methods.is_empty() {
                out.push_str("#### Methods\n\n| Method | Description |\n|--------|-------------|\n");
                for method in &class.methods {
                    out.push_str(&format!(
                        "| `{}()` | {} |\n",
                        method.name,
                        summary_or_default(method.docstring.as_deref())
                    ));
                }
                out.push('\n');
                for method in &class.methods {
                    out.push_str(&format_function(&format!("{}.{}", class.name, method.name), method));
                }
            }
        }
    }

    if !module.functions.is_empty() {
        out.push_str("## Functions\n\n| Function | Description |\n|----------|-------------|\n");
        for function in &module.functions {
            out.push_str(&format!(
                "| [`{}()`](#{}) | {} |\n",
                function.name,
                anchor(&function.name),
                summary_or_default(function.docstring.as_deref())
            ));
        }
        out.push('\n');
        for function in &module.functions {
            out.push_str(&format_function(&function.name, function));
        }
    }

    out
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDocResult {
    pub output_file: PathBuf,
    pub classes_documented: usize,
    pub functions_documented: usize,
    pub missing_docstrings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectDocStats {
    pub files_processed: usize,
    pub classes_documented: usize,
    pub functions_documented: usize,
    pub missing_docstrings: Vec<String>,
    pub generated_files: Vec<PathBuf>,
}

pub struct DocGenerator {
    project: PathBuf,
    output_dir: PathBuf,
    exclude: Vec<String>,
    skip_dirs: Vec<PathBuf>,
}

impl DocGenerator {
    pub fn new(project: &Path, output_dir: &Path) -> Self {
        Self {
            project: project.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            exclude: Vec::new(),
            skip_dirs: Vec::new(),
        }
    }

    pub fn with_excludes(mut self, exclude: &[String]) -> Self {
        self.exclude = exclude.to_vec();
        self
    }

    pub fn with_skip_dirs(mut self, dirs: &[PathBuf]) -> Self {
        self.skip_dirs = dirs.to_vec();
        self
    }

    /// Write `<output>/<dotted.module>.md` for one file. Files that do not
    /// parse are skipped (`None`).
    pub fn generate_for_file(&self, path: &Path) -> Result<Option<FileDocResult>> {
        let source = read_source(path)?;
        let parsed = ParsedSource::parse(&source)?;
        if let Some(issue) = parsed.syntax_error() {
            error!("Syntax error in {} at line {}: {}", path.display(), issue.line, issue.message);
            return Ok(None);
        }

        let dotted = module_name(&self.project, path);
        let module = read_module(&parsed);

        let mut missing = Vec::new();
        if module.doc.is_none() {
            missing.push(format!("{dotted} (module)"));
        }
        for class in &module.classes {
            if class.doc.is_none() {
                missing.push(format!("{dotted}.{} (class)", class.name));
            }
            for method in &class.methods {
                if method.docstring.is_none() && !method.name.starts_with('_') {
                    missing.push(format!("{dotted}.{}.{} (method)", class.name, method.name));
                }
            }
        }
        for function in &module.functions {
            if function.docstring.is_none() {
                missing.push(format!("{dotted}.{} (function)", function.name));
            }
        }

        let output_file = self.output_dir.join(format!("{dotted}.md"));
        write_file_checked(&output_file, &render_module(&dotted, &module))?;

        Ok(Some(FileDocResult {
            output_file,
            classes_documented: module.classes.len(),
            functions_documented: module.functions.len()
                + module.classes.iter().map(|c| c.methods.len()).sum::<usize>(),
            missing_docstrings: missing,
        }))
    }

    /// Document every Python file of the project and write `index.md`.
    pub fn generate_for_project(&self) -> Result<ProjectDocStats> {
        let mut stats = ProjectDocStats::default();
        let output_abs = self.output_dir.canonicalize().ok();

        for file in collect_python_files(&self.project, &self.exclude, &self.skip_dirs)? {
            if output_abs
                .as_ref()
                .is_some_and(|out| file.canonicalize().is_ok_and(|f| f.starts_with(out)))
            {
                continue;
            }
            info!("Generating documentation for {}", file.display());
            match self.generate_for_file(&file) {
                Ok(Some(result)) => {
                    stats.files_processed += 1;
                    stats.classes_documented += result.classes_documented;
                    stats.functions_documented += result.functions_documented;
                    stats.missing_docstrings.extend(result.missing_docstrings);
                    stats.generated_files.push(result.output_file);
                }
                Ok(None) => {}
                Err(err) => warn!("Error documenting {}: {err:#}", file.display()),
            }
        }

        self.write_index(&stats)?;
        Ok(stats)
    }

    fn write_index(&self, stats: &ProjectDocStats) -> Result<()> {
        let mut content = String::from("# API Documentation\n\n## Overview\n\n");
        content.push_str(&format!("- **Modules:** {}\n", stats.files_processed));
        content.push_str(&format!("- **Classes:** {}\n", stats.classes_documented));
        content.push_str(&format!("- **Functions:** {}\n\n", stats.functions_documented));

        content.push_str("## Modules\n\n");
        let mut files = stats.generated_files.clone();
        files.sort();
        for file in &files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let module = name.trim_end_matches(".md");
            content.push_str(&format!("- [{module}]({name})\n"));
        }

        if !stats.missing_docstrings.is_empty() {
            content.push_str("\n## Missing Docstrings\n\n");
            let mut missing = stats.missing_docstrings.clone();
            missing.sort();
            for item in missing {
                content.push_str(&format!("- {item}\n"));
            }
        }

        let index = self.output_dir.join("index.md");
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        fs::write(&index, content).with_context(|| format!("Failed to write {}", index.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub file_path: PathBuf,
    pub module_inconsistencies: Vec<String>,
    pub class_inconsistencies: BTreeMap<String, Vec<String>>,
    pub function_inconsistencies: BTreeMap<String, Vec<String>>,
    /// Share of documented items without findings, in percent.
    pub overall_consistency: f64,
}

impl ConsistencyReport {
    pub fn total_findings(&self) -> usize {
        self.module_inconsistencies.len()
            + self.class_inconsistencies.values().map(Vec::len).sum::<usize>()
            + self.function_inconsistencies.values().map(Vec::len).sum::<usize>()
    }
}

/// Nodes of a function body, without descending into nested scopes.
fn own_nodes(function: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let mut stack = function
        .child_by_field_name("body")
        .map(named_children)
        .unwrap_or_default();
    while let Some(node) = stack.pop() {
        out.push(node);
        if !matches!(node.kind(), "function_definition" | "class_definition" | "lambda") {
            stack.extend(named_children(node));
        }
    }
    out
}

#[derive(Debug, Default)]
pub struct ConsistencyChecker;

impl ConsistencyChecker {
    pub fn new() -> Self {
        Self
    }

    pub fn check_file(&self, path: &Path) -> Result<ConsistencyReport> {
        let source = read_source(path)?;
        let mut report = self.check_source(&source)?;
        report.file_path = path.to_path_buf();
        Ok(report)
    }

    pub fn check_source(&self, source: &str) -> Result<ConsistencyReport> {
        let mut report = ConsistencyReport {
            overall_consistency: 100.0,
            ..ConsistencyReport::default()
        };

        let parsed = ParsedSource::parse(source)?;
        if let Some(issue) = parsed.syntax_error() {
            report
                .module_inconsistencies
                .push(format!("Syntax error at line {}: {}", issue.line, issue.message));
            report.overall_consistency = 0.0;
            return Ok(report);
        }

        let root = parsed.root();
        if let Some(doc) = docstring(root, source) {
            report.module_inconsistencies = check_module(&parsed, &parse_docstring(&doc))?;
        }

        let mut total = 0usize;
        let mut inconsistent = 0usize;
        let mut tally = |findings: &Vec<String>| {
            total += 1;
            if !findings.is_empty() {
                inconsistent += 1;
            }
        };

        for stmt in statements(root) {
            let Some((definition, _)) = unwrap_definition(stmt) else {
                continue;
            };
            let name = definition
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string())
                .unwrap_or_default();
            let body = definition.child_by_field_name("body");

            if definition.kind() == "function_definition" {
                if let Some(doc) = body.and_then(|b| docstring(b, source)) {
                    let findings = check_function(definition, source, &parse_docstring(&doc));
                    tally(&findings);
                    if !findings.is_empty() {
                        report.function_inconsistencies.insert(name, findings);
                    }
                }
                continue;
            }

            if let Some(doc) = body.and_then(|b| docstring(b, source)) {
                let findings = check_class(definition, source, &parse_docstring(&doc))?;
                tally(&findings);
                if !findings.is_empty() {
                    report.class_inconsistencies.insert(name.clone(), findings);
                }
            }

            let methods = body
                .map(statements)
                .unwrap_or_default()
                .into_iter()
                .filter_map(unwrap_definition)
                .filter(|(d, _)| d.kind() == "function_definition");
            for (method, _) in methods {
                let Some(doc) = method
                    .child_by_field_name("body")
                    .and_then(|b| docstring(b, source))
                else {
                    continue;
                };
                let method_name = method
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source))
                    .unwrap_or_default();
                let findings = check_function(method, source, &parse_docstring(&doc));
                tally(&findings);
                if !findings.is_empty() {
                    report
                        .function_inconsistencies
                        .insert(format!("{name}.{method_name}"), findings);
                }
            }
        }

        if total > 0 {
            let ratio = (total - inconsistent) as f64 / total as f64 * 100.0;
            report.overall_consistency = (ratio * 100.0).round() / 100.0;
        }
        Ok(report)
    }
}

/// Capitalized words in the module description that look like names of
/// modules or classes but are never imported.
fn check_module(parsed: &ParsedSource, doc: &DocstringInfo) -> Result<Vec<String>> {
    let source = parsed.source();
    let structure = crate::parser::structure_of(parsed);
    let mut imported: BTreeSet<&str> = BTreeSet::new();
    for import in &structure.imports {
        imported.insert(import.name.as_str());
        if let Some(last) = import.name.rsplit('.').next() {
            imported.insert(last);
        }
        if let Some(alias) = &import.alias {
            imported.insert(alias.as_str());
        }
    }
    let defined: BTreeSet<&str> = statements(parsed.root())
        .into_iter()
        .filter_map(unwrap_definition)
        .filter_map(|(d, _)| d.child_by_field_name("name"))
        .map(|n| node_text(n, source))
        .collect();

    let word = Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b")?;
    let mut seen = BTreeSet::new();
    let mut findings = Vec::new();
    for candidate in word.find_iter(&doc.description).map(|m| m.as_str()) {
        let looks_like_name = candidate.len() > 3
            && candidate.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && !candidate.contains('_')
            && candidate.chars().skip(1).any(|c| c.is_ascii_uppercase());
        if looks_like_name
            && !imported.contains(candidate)
            && !defined.contains(candidate)
            && seen.insert(candidate)
        {
            findings.push(format!("Docstring mentions '{candidate}' but it is not imported"));
        }
    }
    Ok(findings)
}

fn check_class(class: Node<'_>, source: &str, doc: &DocstringInfo) -> Result<Vec<String>> {
    let mut findings = Vec::new();
    let text = format!("{}\n{}", doc.summary, doc.description);

    for base in class_bases(class, source) {
        let short = base.rsplit('.').next().unwrap_or(base.as_str()).to_string();
        if short != "object" && !text.contains(&short) {
            findings.push(format!(
                "Class inherits from '{short}' but the docstring does not mention it"
            ));
        }
    }

    let mut members: BTreeSet<String> = BTreeSet::new();
    if let Some(body) = class.child_by_field_name("body") {
        for stmt in statements(body) {
            if let Some((definition, _)) = unwrap_definition(stmt) {
                if let Some(name) = definition.child_by_field_name("name") {
                    members.insert(node_text(name, source).to_string());
                }
            }
            if stmt.kind() == "expression_statement" {
                let target = first_named_child(stmt)
                    .filter(|n| n.kind() == "assignment")
                    .and_then(|a| a.child_by_field_name("left"))
                    .filter(|l| l.kind() == "identifier");
                if let Some(target) = target {
                    members.insert(node_text(target, source).to_string());
                }
            }
        }
        for node in crate::parser::descendants(body) {
            if node.kind() != "assignment" && node.kind() != "augmented_assignment" {
                continue;
            }
            let Some(left) = node.child_by_field_name("left").filter(|l| l.kind() == "attribute") else {
                continue;
            };
            let on_self = left
                .child_by_field_name("object")
                .is_some_and(|o| node_text(o, source) == "self");
            if let (true, Some(attr)) = (on_self, left.child_by_field_name("attribute")) {
                members.insert(node_text(attr, source).to_string());
            }
        }
    }

    let backticked = Regex::new(r"`([A-Za-z_][A-Za-z0-9_]*)`")?;
    for caps in backticked.captures_iter(&doc.description) {
        let name = &caps[1];
        if !members.contains(name) {
            findings.push(format!(
                "Docstring mentions '{name}' but it is not an attribute or method of the class"
            ));
        }
    }

    Ok(findings)
}

fn check_function(function: Node<'_>, source: &str, doc: &DocstringInfo) -> Vec<String> {
    let mut findings = Vec::new();
    let info = function_info(function, &[], source);
    let params: Vec<&str> = info
        .params
        .iter()
        .map(|p| p.name.as_str())
        .filter(|n| *n != "self" && *n != "cls")
        .collect();

    for documented in &doc.params {
        if !params.contains(&documented.name.as_str()) {
            findings.push(format!(
                "Parameter '{}' is documented but not in the signature",
                documented.name
            ));
        }
    }
    for param in &params {
        if doc.param(param).is_none() {
            findings.push(format!("Parameter '{param}' is not documented"));
        }
    }

    let body = own_nodes(function);
    let returns_value = body
        .iter()
        .any(|n| n.kind() == "return_statement" && n.named_child_count() > 0);
    if returns_value && doc.returns.is_empty() {
        findings.push("Function returns a value but the return value is not documented".to_string());
    }
    if !returns_value && !doc.returns.is_empty() && info.returns.is_none() {
        findings.push("Return value is documented but the function does not return one".to_string());
    }

    let raised: BTreeSet<&str> = body
        .iter()
        .filter(|n| n.kind() == "raise_statement")
        .filter_map(|n| first_named_child(*n))
        .filter_map(|exc| match exc.kind() {
            "identifier" => Some(exc),
            "call" => exc
                .child_by_field_name("function")
                .filter(|f| f.kind() == "identifier"),
            _ => None,
        })
        .map(|n| node_text(n, source))
        .collect();
    let documented: BTreeSet<&str> = doc.raises.iter().map(|r| r.name.as_str()).collect();

    for exc in raised.difference(&documented) {
        findings.push(format!("Function raises '{exc}' but does not document it"));
    }
    for exc in documented.difference(&raised) {
        findings.push(format!("Exception '{exc}' is documented but never raised"));
    }

    findings
}
