use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use crate::parser::{descendants, line_of, node_text, ParsedSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionComplexity {
    pub name: String,
    pub complexity: u32,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeMetrics {
    pub total_complexity: u32,
    pub function_complexities: Vec<FunctionComplexity>,
    pub total_lines: usize,
    pub blank_lines: usize,
    /// `#` comment lines plus lines spanned by triple-quoted docstrings.
    pub comment_lines: usize,
    pub code_lines: usize,
    pub avg_function_complexity: f64,
    pub comment_ratio: f64,
    pub maintainability_index: f64,
    pub function_count: usize,
}

impl CodeMetrics {
    pub fn most_complex_function(&self) -> Option<&FunctionComplexity> {
        self.function_complexities
            .iter()
            .max_by_key(|f| f.complexity)
    }
}

/// Simplified McCabe complexity: 1 plus one per `if`/`elif`/`for`/`while`,
/// one per extra operand of an `and` chain and one per `except` clause.
pub fn complexity(node: Node<'_>, source: &str) -> u32 {
    let mut total = 1;
    for child in descendants(node) {
        match child.kind() {
            "if_statement" | "elif_clause" | "for_statement" | "while_statement" => total += 1,
            "except_clause" | "except_group_clause" => total += 1,
            "boolean_operator" => {
                let is_and = child
                    .child_by_field_name("operator")
                    .is_some_and(|op| node_text(op, source) == "and");
                if is_and {
                    total += 1;
                }
            }
            _ => {}
        }
    }
    total
}

/// Compute complexity, line statistics and a maintainability estimate.
/// Unparseable source is an error.
pub fn code_metrics(source: &str) -> Result<CodeMetrics> {
    let parsed = ParsedSource::parse(source)?;
    if let Some(issue) = parsed.syntax_error() {
        bail!("Syntax error at line {}: {}", issue.line, issue.message);
    }
    metrics_of(&parsed)
}

pub fn metrics_of(parsed: &ParsedSource) -> Result<CodeMetrics> {
    let source = parsed.source();
    let root = parsed.root();

    let total_complexity = complexity(root, source);
    let function_complexities: Vec<FunctionComplexity> = descendants(root)
        .into_iter()
        .filter(|n| n.kind() == "function_definition")
        .map(|f| FunctionComplexity {
            name: f
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string())
                .unwrap_or_default(),
            complexity: complexity(f, source),
            line: line_of(f),
        })
        .collect();

    let lines: Vec<&str> = source.lines().collect();
    let total_lines = lines.len();
    let blank_lines = lines.iter().filter(|l| l.trim().is_empty()).count();
    let hash_comments = lines
        .iter()
        .filter(|l| l.trim_start().starts_with('#'))
        .count();
    let docstring_block = Regex::new(r#"(?s)""".*?""""#)?;
    let docstring_lines: usize = docstring_block
        .find_iter(source)
        .map(|m| m.as_str().matches('\n').count() + 1)
        .sum();

    let comment_lines = hash_comments + docstring_lines;
    let code_lines = total_lines.saturating_sub(blank_lines + comment_lines);

    let comment_ratio = if total_lines > 0 {
        comment_lines as f64 / total_lines as f64
    } else {
        0.0
    };
    let avg_function_complexity = if function_complexities.is_empty() {
        1.0
    } else {
        function_complexities
            .iter()
            .map(|f| f.complexity as f64)
            .sum::<f64>()
            / function_complexities.len() as f64
    };
    let maintainability_index =
        (100.0 - avg_function_complexity * 5.0 + comment_ratio * 50.0).clamp(0.0, 100.0);

    Ok(CodeMetrics {
        total_complexity,
        function_count: function_complexities.len(),
        function_complexities,
        total_lines,
        blank_lines,
        comment_lines,
        code_lines,
        avg_function_complexity,
        comment_ratio,
        maintainability_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_complexity() {
        let simple = "def f():\n    return 42\n";
        let branching = r#"
def g(items):
    for item in items:
        if item and item.ok and item.ready:
            continue
        elif item or other:
            pass
    while True:
        try:
            break
        except ValueError:
            pass
        except Exception:
            pass
"#;
        let m = code_metrics(simple).unwrap();
        assert_eq!(m.function_complexities[0].complexity, 1);

        // for, if, elif, while, two `and`, two except
        let m = code_metrics(branching).unwrap();
        assert_eq!(m.function_complexities[0].complexity, 9);
        assert_eq!(m.total_complexity, 9);
    }

    #[test]
    fn test_line_counts() {
        let source = "\"\"\"Module doc\nspanning two lines.\"\"\"\n\n# comment\nx = 1\n\ndef f():\n    return x\n";
        let m = code_metrics(source).unwrap();

        assert_eq!(m.total_lines, 8);
        assert_eq!(m.blank_lines, 2);
        assert_eq!(m.comment_lines, 3);
        assert_eq!(m.code_lines, 3);
        assert_eq!(m.function_count, 1);
        assert!((m.comment_ratio - 3.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_maintainability_without_functions() {
        let m = code_metrics("x = 1\ny = 2\n").unwrap();
        assert_eq!(m.avg_function_complexity, 1.0);
        assert_eq!(m.maintainability_index, 95.0);
    }

    #[test]
    fn test_maintainability_is_clamped() {
        let mut body = String::from("def busy(x):\n");
        for i in 0..30 {
            body.push_str(&format!("    if x == {i}:\n        x += 1\n"));
        }
        let m = code_metrics(&body).unwrap();
        assert_eq!(m.maintainability_index, 0.0);
        assert_eq!(m.most_complex_function().map(|f| f.name.as_str()), Some("busy"));
    }

    #[test]
    fn test_syntax_error_is_an_error() {
        assert!(code_metrics("def oops(:\n").is_err());
    }
}
