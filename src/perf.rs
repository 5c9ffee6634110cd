//! Static performance checks for Python modules and the optimizer that acts
//! on them, either through the LLM or with a few textual rewrites.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use tree_sitter::Node;

use crate::llm::prompts::{TemplateManager, PERFORMANCE_OPTIMIZATION};
use crate::llm::response::extract_code_block;
use crate::llm::CompletionProvider;
use crate::parser::{descendants, line_of, named_children, node_text, ParsedSource};
use crate::suggestions::Severity;

const MAX_GLOBALS: usize = 5;

const PY_BUILTINS: &[&str] = &[
    "abs", "all", "any", "ascii", "bin", "bool", "bytearray", "bytes", "callable", "chr",
    "classmethod", "compile", "complex", "delattr", "dict", "dir", "divmod", "enumerate", "eval",
    "exec", "filter", "float", "format", "frozenset", "getattr", "globals", "hasattr", "hash",
    "help", "hex", "id", "input", "int", "isinstance", "issubclass", "iter", "len", "list",
    "locals", "map", "max", "memoryview", "min", "next", "object", "oct", "open", "ord", "pow",
    "print", "property", "range", "repr", "reversed", "round", "set", "setattr", "slice",
    "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceIssue {
    #[serde(rename = "issue_type")]
    pub kind: String,
    pub description: String,
    pub severity: Severity,
    pub line: Option<usize>,
    pub suggestion: String,
    pub example: Option<String>,
}

impl PerformanceIssue {
    fn new(kind: &str, description: &str, severity: Severity, line: Option<usize>, suggestion: &str) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.to_string(),
            severity,
            line,
            suggestion: suggestion.to_string(),
            example: None,
        }
    }

    fn with_example(mut self, example: &str) -> Self {
        self.example = Some(example.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub loop_count: usize,
    pub max_loop_depth: usize,
    pub function_count: usize,
    pub has_main_guard: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub issues: Vec<PerformanceIssue>,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSuggestion {
    pub description: String,
    pub severity: Severity,
    pub line: Option<usize>,
    pub recommendation: String,
    pub code_example: Option<String>,
}

fn is_loop(node: Node<'_>) -> bool {
    matches!(node.kind(), "for_statement" | "while_statement")
}

/// Closest enclosing loop whose body (not its header) contains `node`.
fn enclosing_loop(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node.parent();
    while let Some(candidate) = current {
        if is_loop(candidate) {
            let in_body = candidate
                .child_by_field_name("body")
                .is_some_and(|body| {
                    body.start_byte() <= node.start_byte() && node.end_byte() <= body.end_byte()
                });
            if in_body {
                return Some(candidate);
            }
        }
        current = candidate.parent();
    }
    None
}

fn in_loop(node: Node<'_>) -> bool {
    enclosing_loop(node).is_some()
}

fn loop_depth(node: Node<'_>) -> usize {
    let mut depth = 0;
    let mut current = enclosing_loop(node);
    while let Some(outer) = current {
        depth += 1;
        current = enclosing_loop(outer);
    }
    depth
}

#[derive(Debug, Default)]
pub struct PerformanceAnalyzer;

impl PerformanceAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, source: &str) -> Result<PerformanceReport> {
        let parsed = ParsedSource::parse(source)?;
        if let Some(issue) = parsed.syntax_error() {
            return Ok(PerformanceReport {
                issues: vec![PerformanceIssue::new(
                    "syntax_error",
                    &format!("Syntax error: {}", issue.message),
                    Severity::High,
                    Some(issue.line),
                    "Fix the syntax error to enable performance analysis.",
                )],
                metrics: PerformanceMetrics::default(),
            });
        }

        let root = parsed.root();
        let nodes = descendants(root);

        let mut issues = Vec::new();
        issues.extend(check_loops(&nodes));
        issues.extend(check_list_operations(&nodes, source));
        issues.extend(check_globals(&nodes, source));
        issues.extend(check_lookups(&nodes));
        issues.extend(check_repeated_calls(&nodes, source));
        issues.extend(check_text_patterns(source)?);

        let loops: Vec<Node<'_>> = nodes.iter().copied().filter(|n| is_loop(*n)).collect();
        let metrics = PerformanceMetrics {
            loop_count: loops.len(),
            max_loop_depth: loops.iter().map(|l| loop_depth(*l) + 1).max().unwrap_or(0),
            function_count: nodes
                .iter()
                .filter(|n| n.kind() == "function_definition")
                .count(),
            has_main_guard: has_main_guard(root, source),
        };

        debug!("Found {} performance issues", issues.len());
        Ok(PerformanceReport { issues, metrics })
    }

    /// One suggestion per issue.
    pub fn suggest_improvements(&self, report: &PerformanceReport) -> Vec<PerformanceSuggestion> {
        report
            .issues
            .iter()
            .map(|issue| PerformanceSuggestion {
                description: issue.description.clone(),
                severity: issue.severity,
                line: issue.line,
                recommendation: if issue.suggestion.is_empty() {
                    "Consider restructuring this code for better performance.".to_string()
                } else {
                    issue.suggestion.clone()
                },
                code_example: issue.example.clone(),
            })
            .collect()
    }
}

fn check_loops(nodes: &[Node<'_>]) -> Vec<PerformanceIssue> {
    let mut issues = Vec::new();
    for node in nodes {
        match node.kind() {
            "list_comprehension" | "set_comprehension" | "dictionary_comprehension" if in_loop(*node) => {
                issues.push(
                    PerformanceIssue::new(
                        "expensive_operation_in_loop",
                        "Comprehension inside a loop is rebuilt on every iteration",
                        Severity::Medium,
                        Some(line_of(*node)),
                        "Move the comprehension out of the loop if it does not depend on the loop variable.",
                    )
                    .with_example(
                        "# Instead of:\nfor i in range(10):\n    result = [x * 2 for x in large_list]\n\n# Use:\nresult = [x * 2 for x in large_list]\nfor i in range(10):\n    ...",
                    ),
                );
            }
            "for_statement" => {
                if enclosing_loop(*node).is_some_and(|outer| outer.kind() == "for_statement") {
                    issues.push(PerformanceIssue::new(
                        "nested_loops",
                        "Nested loops can lead to O(n²) or worse complexity",
                        Severity::Medium,
                        Some(line_of(*node)),
                        "Check whether the inner loop can be replaced by a lookup table or a single pass.",
                    ));
                }
            }
            _ => {}
        }
    }
    issues
}

fn check_list_operations(nodes: &[Node<'_>], source: &str) -> Vec<PerformanceIssue> {
    let mut issues = Vec::new();
    for node in nodes {
        match node.kind() {
            "augmented_assignment" => {
                let is_add = node
                    .child_by_field_name("operator")
                    .is_some_and(|op| node_text(op, source) == "+=");
                let names = ["left", "right"].iter().all(|field| {
                    node.child_by_field_name(field)
                        .is_some_and(|n| n.kind() == "identifier")
                });
                if is_add && names && in_loop(*node) {
                    issues.push(
                        PerformanceIssue::new(
                            "inefficient_list_appending",
                            "Using += to grow a list inside a loop",
                            Severity::Medium,
                            Some(line_of(*node)),
                            "Use list.append() for single items or extend() for several.",
                        )
                        .with_example(
                            "# Instead of:\nresult = []\nfor item in items:\n    result += [item]\n\n# Use:\nresult = []\nfor item in items:\n    result.append(item)",
                        ),
                    );
                }
            }
            "call" => {
                let is_list = node
                    .child_by_field_name("function")
                    .is_some_and(|f| f.kind() == "identifier" && node_text(f, source) == "list");
                if is_list && in_loop(*node) {
                    issues.push(PerformanceIssue::new(
                        "list_conversion_in_loop",
                        "Converting to a list inside a loop",
                        Severity::Low,
                        Some(line_of(*node)),
                        "Move the list conversion out of the loop if possible.",
                    ));
                }
            }
            _ => {}
        }
    }
    issues
}

fn check_globals(nodes: &[Node<'_>], source: &str) -> Vec<PerformanceIssue> {
    let names: BTreeSet<&str> = nodes
        .iter()
        .filter(|n| n.kind() == "global_statement")
        .flat_map(|n| named_children(*n))
        .filter(|n| n.kind() == "identifier")
        .map(|n| node_text(n, source))
        .collect();

    if names.len() > MAX_GLOBALS {
        vec![PerformanceIssue::new(
            "excessive_globals",
            &format!("Excessive use of global variables ({} variables)", names.len()),
            Severity::Medium,
            None,
            "Pass values as function parameters or keep state in a class instead of globals.",
        )]
    } else {
        Vec::new()
    }
}

fn check_lookups(nodes: &[Node<'_>]) -> Vec<PerformanceIssue> {
    let mut issues = Vec::new();
    for node in nodes.iter().filter(|n| n.kind() == "comparison_operator") {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        let lookup_on_name = children.iter().enumerate().any(|(i, child)| {
            matches!(child.kind(), "in" | "not in")
                && children
                    .get(i + 1)
                    .is_some_and(|operand| operand.kind() == "identifier")
        });
        if lookup_on_name && in_loop(*node) {
            issues.push(
                PerformanceIssue::new(
                    "inefficient_lookup",
                    "Membership test with 'in' inside a loop is O(n) on a list",
                    Severity::Medium,
                    Some(line_of(*node)),
                    "Use a set or dict for O(1) lookups.",
                )
                .with_example(
                    "# Instead of:\nallowed = [1, 2, 3, 4, 5]\nfor x in range(1000):\n    if x in allowed:\n        print(x)\n\n# Use:\nallowed = {1, 2, 3, 4, 5}\nfor x in range(1000):\n    if x in allowed:\n        print(x)",
                ),
            );
        }
    }
    issues
}

fn check_repeated_calls(nodes: &[Node<'_>], source: &str) -> Vec<PerformanceIssue> {
    let mut issues = Vec::new();

    for loop_node in nodes.iter().filter(|n| is_loop(**n)) {
        let Some(body) = loop_node.child_by_field_name("body") else {
            continue;
        };
        let loop_var = loop_node
            .child_by_field_name("left")
            .filter(|n| n.kind() == "identifier")
            .map(|n| node_text(n, source));

        let mut calls: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for call in descendants(body).into_iter().filter(|n| n.kind() == "call") {
            let Some(function) = call
                .child_by_field_name("function")
                .filter(|f| f.kind() == "identifier")
            else {
                continue;
            };
            let name = node_text(function, source);
            if PY_BUILTINS.contains(&name) {
                continue;
            }

            let uses_loop_var = loop_var.is_some_and(|var| {
                call.child_by_field_name("arguments")
                    .map(|args| {
                        named_children(args)
                            .into_iter()
                            .any(|a| a.kind() == "identifier" && node_text(a, source) == var)
                    })
                    .unwrap_or(false)
            });
            if !uses_loop_var {
                calls.entry(name).or_default().push(line_of(call));
            }
        }

        for (name, lines) in calls {
            if lines.len() > 1 {
                issues.push(
                    PerformanceIssue::new(
                        "repeated_function_call",
                        &format!(
                            "Function '{name}' is called several times in a loop without depending on the loop variable"
                        ),
                        Severity::Medium,
                        lines.first().copied(),
                        "Call the function once before the loop and reuse the result.",
                    )
                    .with_example(&format!(
                        "# Instead of:\nfor i in range(10):\n    result = {name}()\n\n# Use:\nresult = {name}()\nfor i in range(10):\n    ..."
                    )),
                );
            }
        }
    }

    issues
}

fn check_text_patterns(source: &str) -> Result<Vec<PerformanceIssue>> {
    let nested_for = r"for\s+\w+\s+in\s+.+:\s*\n\s+for\s+\w+\s+in\s+.+:";
    let quadratic = Regex::new(nested_for)?;
    let sort_fn = Regex::new(r"def\s+\w*sort\w*\s*\(")?;
    let swap_loop = Regex::new(&format!(r"{nested_for}\s*\n\s+if\s+.+<.+:"))?;
    let io_loop = Regex::new(r"for\s+.+:\s*\n\s+(?:\w+\s*=\s*)?(?:open|read|write|close)\(")?;
    let network_loop =
        Regex::new(r"for\s+.+:\s*\n\s+(?:\w+\s*=\s*)?(?:requests\.get|requests\.post|urllib|http)")?;

    let mut issues = Vec::new();
    if quadratic.is_match(source) {
        issues.push(PerformanceIssue::new(
            "quadratic_complexity",
            "Directly nested loops suggest O(n²) time complexity",
            Severity::Medium,
            None,
            "Consider a more efficient algorithm or data structure.",
        ));
    }
    if sort_fn.is_match(source) || swap_loop.is_match(source) {
        issues.push(PerformanceIssue::new(
            "custom_sort",
            "Custom sorting implementation detected",
            Severity::Medium,
            None,
            "Use the built-in sorted() or list.sort(), which are implemented in C.",
        ));
    }
    if io_loop.is_match(source) {
        issues.push(PerformanceIssue::new(
            "io_in_loop",
            "File operations inside a loop",
            Severity::High,
            None,
            "Move file operations out of the loop or buffer the writes.",
        ));
    }
    if network_loop.is_match(source) {
        issues.push(PerformanceIssue::new(
            "network_in_loop",
            "Network requests inside a loop",
            Severity::High,
            None,
            "Batch the requests or issue them concurrently.",
        ));
    }
    Ok(issues)
}

fn has_main_guard(root: Node<'_>, source: &str) -> bool {
    named_children(root)
        .into_iter()
        .filter(|n| n.kind() == "if_statement")
        .filter_map(|n| n.child_by_field_name("condition"))
        .any(|cond| {
            let text: String = node_text(cond, source)
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            text == "__name__=='__main__'" || text == "__name__==\"__main__\""
        })
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub code: String,
    pub changes: Vec<String>,
    pub used_llm: bool,
}

pub struct PerformanceOptimizer<'a> {
    llm: Option<&'a dyn CompletionProvider>,
    templates: &'a TemplateManager,
    max_tokens: u32,
}

impl<'a> PerformanceOptimizer<'a> {
    pub fn new(
        llm: Option<&'a dyn CompletionProvider>,
        templates: &'a TemplateManager,
        max_tokens: u32,
    ) -> Self {
        Self {
            llm,
            templates,
            max_tokens,
        }
    }

    /// Optimize `source` for the given issues. The LLM is used when one is
    /// configured and reachable; otherwise only the rule-based rewrites run.
    pub async fn optimize(&self, source: &str, issues: &[PerformanceIssue]) -> Result<OptimizationResult> {
        match self.llm.filter(|llm| llm.is_available()) {
            Some(llm) => self.optimize_with_llm(llm, source, issues).await,
            None => optimize_with_rules(source, issues),
        }
    }

    async fn optimize_with_llm(
        &self,
        llm: &dyn CompletionProvider,
        source: &str,
        issues: &[PerformanceIssue],
    ) -> Result<OptimizationResult> {
        let issues_text = issues
            .iter()
            .enumerate()
            .map(|(i, issue)| {
                format!(
                    "Issue {}:\n- Type: {}\n- Description: {}\n- Line: {}\n- Suggestion: {}",
                    i + 1,
                    issue.kind,
                    issue.description,
                    issue.line.map_or_else(|| "unknown".to_string(), |l| l.to_string()),
                    issue.suggestion
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = self
            .templates
            .require(PERFORMANCE_OPTIMIZATION)?
            .render(&[("code", source), ("issues", &issues_text)]);

        info!("Requesting optimized code from {}", llm.name());
        let answer = llm
            .complete(&prompt, self.max_tokens.max(2000))
            .await
            .context("LLM optimization failed")?;

        let code = extract_code_block(&answer, "python").unwrap_or_else(|| answer.trim().to_string());
        Ok(OptimizationResult {
            code,
            changes: vec!["Optimized by the LLM".to_string()],
            used_llm: true,
        })
    }
}

/// Conservative textual rewrites for the issues that have an obvious fix.
pub fn optimize_with_rules(source: &str, issues: &[PerformanceIssue]) -> Result<OptimizationResult> {
    let kinds: BTreeSet<&str> = issues.iter().map(|i| i.kind.as_str()).collect();
    let mut code = source.to_string();
    let mut changes = Vec::new();

    if kinds.contains("inefficient_list_appending") {
        let append = Regex::new(r"(\w+)\s*\+=\s*\[([^\],\[]+)\]")?;
        let rewritten = append.replace_all(&code, "${1}.append(${2})").to_string();
        if rewritten != code {
            code = rewritten;
            changes.push("Replaced `x += [item]` with `x.append(item)`".to_string());
        }
    }

    if kinds.contains("inefficient_lookup") {
        let list_decl = Regex::new(r"(?m)^([ \t]*)(\w+)\s*=\s*\[([^\]\n]+)\][ \t]*$")?;
        let mut converted = Vec::new();
        for caps in list_decl.captures_iter(&code) {
            let name = &caps[2];
            let lookup = Regex::new(&format!(r"\bin\s+{}\b", regex::escape(name)))?;
            if lookup.is_match(&code) {
                converted.push((caps[0].to_string(), format!("{}{name} = {{{}}}", &caps[1], &caps[3]), name.to_string()));
            }
        }
        for (before, after, name) in converted {
            code = code.replacen(&before, &after, 1);
            changes.push(format!("Converted list '{name}' to a set for O(1) lookups"));
        }
    }

    if kinds.contains("io_in_loop") || kinds.contains("network_in_loop") {
        let first_for = Regex::new(r"(?m)^([ \t]*)for\s")?;
        if let Some(caps) = first_for.captures(&code) {
            let (start, indent) = match (caps.get(0), caps.get(1)) {
                (Some(whole), Some(indent)) => (whole.start(), indent.as_str().to_string()),
                _ => (0, String::new()),
            };
            code.insert_str(
                start,
                &format!("{indent}# WARNING: performance issue - I/O or network calls inside this loop\n"),
            );
            changes.push("Flagged I/O or network calls inside a loop".to_string());
        }
    }

    if !changes.is_empty() {
        let mut header = String::from("# Optimized version - performance improvements:\n");
        for change in &changes {
            header.push_str(&format!("# - {change}\n"));
        }
        code = format!("{header}\n{code}");
    }

    Ok(OptimizationResult {
        code,
        changes,
        used_llm: false,
    })
}

/// Markdown report for `analyze-performance`.
pub fn render_report(file: &str, report: &PerformanceReport, suggestions: &[PerformanceSuggestion]) -> String {
    let mut out = format!("# Performance Analysis: {file}\n\n");

    let m = &report.metrics;
    out.push_str("## Metrics\n\n");
    out.push_str(&format!("- Loops: {}\n", m.loop_count));
    out.push_str(&format!("- Maximum loop nesting: {}\n", m.max_loop_depth));
    out.push_str(&format!("- Functions: {}\n", m.function_count));
    out.push_str(&format!(
        "- `__main__` guard: {}\n\n",
        if m.has_main_guard { "yes" } else { "no" }
    ));

    out.push_str(&format!("## Issues ({})\n\n", report.issues.len()));
    if report.issues.is_empty() {
        out.push_str("No performance issues found.\n\n");
    }
    for (i, issue) in report.issues.iter().enumerate() {
        let line = issue.line.map(|l| format!(" (line {l})")).unwrap_or_default();
        out.push_str(&format!(
            "### {}. {} [{}]{line}\n\n{}\n\n",
            i + 1,
            issue.kind,
            issue.severity,
            issue.description
        ));
    }

    if !suggestions.is_empty() {
        out.push_str("## Suggestions\n\n");
        for suggestion in suggestions {
            out.push_str(&format!("- **{}**: {}\n", suggestion.description, suggestion.recommendation));
            if let Some(example) = &suggestion.code_example {
                out.push_str(&format!("\n```python\n{example}\n```\n\n"));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedProvider;
    use pretty_assertions::assert_eq;

    fn kinds(report: &PerformanceReport) -> Vec<&str> {
        report.issues.iter().map(|i| i.kind.as_str()).collect()
    }

    #[test]
    fn test_loop_checks() {
        let source = r#"def pairs(items, other):
    result = []
    for a in items:
        squares = [x * x for x in other]
        for b in squares:
            result += extra
    return result
"#;
        let report = PerformanceAnalyzer::new().analyze(source).unwrap();
        let found = kinds(&report);
        assert!(found.contains(&"expensive_operation_in_loop"));
        assert!(found.contains(&"nested_loops"));
        assert!(found.contains(&"inefficient_list_appending"));
        assert!(!found.contains(&"quadratic_complexity"));

        let nested = report.issues.iter().find(|i| i.kind == "nested_loops").unwrap();
        assert_eq!(nested.line, Some(5));
        assert_eq!(report.metrics.loop_count, 2);
        assert_eq!(report.metrics.max_loop_depth, 2);
        assert_eq!(report.metrics.function_count, 1);
        assert!(!report.metrics.has_main_guard);
    }

    #[test]
    fn test_loop_header_is_not_loop_body() {
        let source = "for x in list(range(3)):\n    print(x)\n";
        let report = PerformanceAnalyzer::new().analyze(source).unwrap();
        assert!(!kinds(&report).contains(&"list_conversion_in_loop"));
    }

    #[test]
    fn test_lookup_and_list_conversion() {
        let source = r#"allowed = [1, 2, 3]
for x in range(100):
    if x in allowed:
        print(list(x))
"#;
        let report = PerformanceAnalyzer::new().analyze(source).unwrap();
        let found = kinds(&report);
        assert!(found.contains(&"inefficient_lookup"));
        assert!(found.contains(&"list_conversion_in_loop"));
    }

    #[test]
    fn test_repeated_function_call() {
        let source = r#"for item in items:
    a = load_config()
    b = load_config()
    c = transform(item)
    d = transform(item)
    print(len(a))
    print(len(b))
"#;
        let report = PerformanceAnalyzer::new().analyze(source).unwrap();
        let repeated: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.kind == "repeated_function_call")
            .collect();
        assert_eq!(repeated.len(), 1);
        assert!(repeated[0].description.contains("load_config"));
        assert_eq!(repeated[0].line, Some(2));
    }

    #[test]
    fn test_excessive_globals_and_main_guard() {
        let source = r#"def setup():
    global a, b, c
    global d, e, f
    a = b = c = d = e = f = 1


if __name__ == "__main__":
    setup()
"#;
        let report = PerformanceAnalyzer::new().analyze(source).unwrap();
        assert!(kinds(&report).contains(&"excessive_globals"));
        assert!(report.metrics.has_main_guard);
    }

    #[test]
    fn test_text_rules() {
        let source = r#"def bubble_sort(values):
    for i in range(len(values)):
        for j in range(len(values)):
            if values[j] < values[i]:
                values[i], values[j] = values[j], values[i]
    for path in paths:
        handle = open(path)
    for url in urls:
        requests.get(url)
"#;
        let report = PerformanceAnalyzer::new().analyze(source).unwrap();
        let found = kinds(&report);
        for expected in ["quadratic_complexity", "custom_sort", "io_in_loop", "network_in_loop"] {
            assert!(found.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_syntax_error_is_single_issue() {
        let report = PerformanceAnalyzer::new().analyze("for x in:\n").unwrap();
        assert_eq!(kinds(&report), vec!["syntax_error"]);
        assert_eq!(report.issues[0].severity, Severity::High);
    }

    #[test]
    fn test_suggest_improvements_one_per_issue() {
        let analyzer = PerformanceAnalyzer::new();
        let report = analyzer
            .analyze("allowed = [1]\nfor x in y:\n    if x in allowed:\n        pass\n")
            .unwrap();
        let suggestions = analyzer.suggest_improvements(&report);
        assert_eq!(suggestions.len(), report.issues.len());
        assert!(suggestions[0].code_example.is_some());
    }

    #[test]
    fn test_rule_based_optimization() {
        let source = "allowed = [1, 2, 3]\nout = []\nfor x in data:\n    if x in allowed:\n        out += [x]\n";
        let issues = vec![
            PerformanceIssue::new("inefficient_list_appending", "", Severity::Medium, Some(5), ""),
            PerformanceIssue::new("inefficient_lookup", "", Severity::Medium, Some(4), ""),
        ];
        let result = optimize_with_rules(source, &issues).unwrap();
        assert!(!result.used_llm);
        assert_eq!(result.changes.len(), 2);
        assert!(result.code.starts_with("# Optimized version - performance improvements:\n"));
        assert!(result.code.contains("out.append(x)"));
        assert!(result.code.contains("allowed = {1, 2, 3}"));
        assert!(result.code.contains("out = []"));
    }

    #[test]
    fn test_rule_based_optimization_flags_io_loops() {
        let source = "def f(paths):\n    for p in paths:\n        open(p)\n";
        let issues = vec![PerformanceIssue::new("io_in_loop", "", Severity::High, None, "")];
        let result = optimize_with_rules(source, &issues).unwrap();
        assert!(result
            .code
            .contains("    # WARNING: performance issue - I/O or network calls inside this loop\n    for p in paths:"));
    }

    #[tokio::test]
    async fn test_llm_optimization() {
        let llm = ScriptedProvider::new(&["```python\nresult = set(data)\n```\nUsed a set."]);
        let templates = TemplateManager::builtin();
        let optimizer = PerformanceOptimizer::new(Some(&llm), &templates, 1000);
        let issues = vec![PerformanceIssue::new("inefficient_lookup", "slow", Severity::Medium, Some(3), "use a set")];

        let result = optimizer.optimize("result = list(data)\n", &issues).await.unwrap();
        assert!(result.used_llm);
        assert_eq!(result.code, "result = set(data)");
        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains("- Type: inefficient_lookup"));
        assert!(prompt.contains("result = list(data)"));
    }

    #[test]
    fn test_render_report() {
        let analyzer = PerformanceAnalyzer::new();
        let report = analyzer.analyze("for a in x:\n    for b in y:\n        pass\n").unwrap();
        let md = render_report("loops.py", &report, &analyzer.suggest_improvements(&report));
        assert!(md.starts_with("# Performance Analysis: loops.py"));
        assert!(md.contains("nested_loops [medium] (line 2)"));
        assert!(md.contains("## Suggestions"));
    }
}
