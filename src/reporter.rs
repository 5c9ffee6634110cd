use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::metrics::CodeMetrics;
use crate::parser::ModuleStructure;
use crate::patterns::DetectedPatterns;
use crate::suggestions::{RefactoringSuggestion, Severity};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";
const THIN_RULE: &str = "──────────────────────────────────────────────────\n";

/// Everything `analyze` found for one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileAnalysisResult {
    pub file_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CodeMetrics>,
    pub patterns: DetectedPatterns,
    pub suggestions: Vec<RefactoringSuggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileAnalysisResult {
    pub fn new(file_path: &Path) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            metrics: None,
            patterns: DetectedPatterns::new(),
            suggestions: Vec::new(),
            error: None,
        }
    }

    fn pattern_count(&self) -> usize {
        self.patterns.values().map(Vec::len).sum()
    }
}

#[derive(Serialize)]
pub struct Report<'a> {
    pub summary: Summary,
    pub results: &'a [FileAnalysisResult],
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub total_files: usize,
    pub files_with_errors: usize,
    pub total_complexity: u32,
    pub avg_maintainability: Option<f64>,
    pub patterns_found: usize,
    pub suggestions: usize,
    pub high_severity: usize,
}

pub fn generate_report(results: &[FileAnalysisResult], format: &str) -> Result<String> {
    let summary = calculate_summary(results);

    match format {
        "json" => generate_json_report(results, summary),
        "markdown" => Ok(generate_markdown_report(results, &summary)),
        _ => Ok(generate_console_report(results, &summary)),
    }
}

fn calculate_summary(results: &[FileAnalysisResult]) -> Summary {
    let measured: Vec<&CodeMetrics> = results.iter().filter_map(|r| r.metrics.as_ref()).collect();
    let avg_maintainability = (!measured.is_empty()).then(|| {
        let total: f64 = measured.iter().map(|m| m.maintainability_index).sum();
        (total / measured.len() as f64 * 100.0).round() / 100.0
    });

    Summary {
        total_files: results.len(),
        files_with_errors: results.iter().filter(|r| r.error.is_some()).count(),
        total_complexity: measured.iter().map(|m| m.total_complexity).sum(),
        avg_maintainability,
        patterns_found: results.iter().map(FileAnalysisResult::pattern_count).sum(),
        suggestions: results.iter().map(|r| r.suggestions.len()).sum(),
        high_severity: results
            .iter()
            .flat_map(|r| &r.suggestions)
            .filter(|s| s.severity == Severity::High)
            .count(),
    }
}

fn generate_json_report(results: &[FileAnalysisResult], summary: Summary) -> Result<String> {
    let report = Report { summary, results };
    Ok(serde_json::to_string_pretty(&report)?)
}

fn severity_icon(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "❌",
        Severity::Medium => "⚠️",
        Severity::Low => "ℹ️",
    }
}

fn location_lines(suggestion: &RefactoringSuggestion) -> String {
    match (suggestion.location.start_line, suggestion.location.end_line) {
        (Some(start), Some(end)) if end != start => format!("{start}-{end}"),
        (Some(start), _) => start.to_string(),
        _ => "-".to_string(),
    }
}

fn generate_markdown_report(results: &[FileAnalysisResult], summary: &Summary) -> String {
    let mut md = String::new();

    md.push_str("# 🐍 Refactoring Analysis Report\n\n");

    md.push_str("## 📊 Summary\n\n");
    md.push_str(&format!("- **Files Analyzed**: {}\n", summary.total_files));
    md.push_str(&format!("- **Total Complexity**: {}\n", summary.total_complexity));
    if let Some(mi) = summary.avg_maintainability {
        md.push_str(&format!("- **Avg Maintainability**: {mi:.2}\n"));
    }
    md.push_str(&format!("- **🧩 Patterns Found**: {}\n", summary.patterns_found));
    md.push_str(&format!("- **💡 Suggestions**: {}\n", summary.suggestions));
    md.push_str(&format!("- **❌ High Severity**: {}\n", summary.high_severity));
    md.push_str(&format!("- **Errors**: {}\n\n", summary.files_with_errors));

    for result in results {
        md.push_str(&format!("## 📄 `{}`\n\n", result.file_path.display()));

        if let Some(error) = &result.error {
            md.push_str(&format!("❌ {error}\n\n"));
            continue;
        }

        if let Some(metrics) = &result.metrics {
            md.push_str("### Metrics\n\n| Metric | Value |\n|--------|-------|\n");
            md.push_str(&format!("| Total complexity | {} |\n", metrics.total_complexity));
            md.push_str(&format!("| Avg function complexity | {:.2} |\n", metrics.avg_function_complexity));
            md.push_str(&format!("| Maintainability index | {:.2} |\n", metrics.maintainability_index));
            md.push_str(&format!("| Functions | {} |\n", metrics.function_count));
            md.push_str(&format!("| Lines (code/comment/blank) | {} ({}/{}/{}) |\n", metrics.total_lines, metrics.code_lines, metrics.comment_lines, metrics.blank_lines));
            md.push_str(&format!("| Comment ratio | {:.2} |\n\n", metrics.comment_ratio));

            if !metrics.function_complexities.is_empty() {
                md.push_str("| Function | Line | Complexity |\n|----------|------|------------|\n");
                for function in &metrics.function_complexities {
                    md.push_str(&format!("| `{}` | {} | {} |\n", function.name, function.line, function.complexity));
                }
                md.push('\n');
            }
        }

        if !result.patterns.is_empty() {
            md.push_str("### Design Patterns\n\n| Pattern | Class | Line |\n|---------|-------|------|\n");
            for (kind, matches) in &result.patterns {
                for found in matches {
                    md.push_str(&format!("| {kind} | `{}` | {} |\n", found.class_name, found.line));
                }
            }
            md.push('\n');
        }

        if !result.suggestions.is_empty() {
            md.push_str("### Suggestions\n\n");
            for suggestion in &result.suggestions {
                md.push_str(&format!(
                    "{} **#{} {}** (line {}): {}\n",
                    severity_icon(suggestion.severity),
                    suggestion.id,
                    suggestion.kind,
                    location_lines(suggestion),
                    suggestion.description
                ));
                md.push_str(&format!("   - {}\n\n", suggestion.recommendation));
            }
        }
    }

    md
}

fn generate_console_report(results: &[FileAnalysisResult], summary: &Summary) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str(RULE);
    output.push_str("  🐍 REFACTORING ANALYSIS REPORT\n");
    output.push_str(RULE);
    output.push('\n');

    output.push_str(&format!("📊 Files Analyzed:    {}\n", summary.total_files));
    output.push_str(&format!("🔁 Total Complexity:  {}\n", summary.total_complexity));
    if let Some(mi) = summary.avg_maintainability {
        output.push_str(&format!("🛠️  Maintainability:   {mi:.2}\n"));
    }
    output.push_str(&format!("🧩 Patterns:          {}\n", summary.patterns_found));
    output.push_str(&format!("💡 Suggestions:       {}\n", summary.suggestions));
    output.push_str(&format!("❌ High Severity:     {}\n", summary.high_severity));

    for result in results {
        output.push_str(&format!("\n📄 {}\n", result.file_path.display()));
        output.push_str(THIN_RULE);

        if let Some(error) = &result.error {
            output.push_str(&format!("❌ {error}\n"));
            continue;
        }

        if let Some(metrics) = &result.metrics {
            output.push_str(&format!(
                "   Complexity: {} (avg {:.2})   MI: {:.2}   Lines: {}   Comments: {:.0}%\n",
                metrics.total_complexity,
                metrics.avg_function_complexity,
                metrics.maintainability_index,
                metrics.total_lines,
                metrics.comment_ratio * 100.0
            ));
            if let Some(worst) = metrics.most_complex_function() {
                output.push_str(&format!(
                    "   Most complex: {}() line {} ({})\n",
                    worst.name, worst.line, worst.complexity
                ));
            }
        }

        for (kind, matches) in &result.patterns {
            for found in matches {
                output.push_str(&format!("🧩 {kind}: {} (line {})\n", found.class_name, found.line));
            }
        }

        for suggestion in &result.suggestions {
            output.push_str(&format!(
                "{} [{}] #{} {} (line {})\n",
                severity_icon(suggestion.severity),
                suggestion.severity,
                suggestion.id,
                suggestion.kind,
                location_lines(suggestion)
            ));
            output.push_str(&format!("   {}\n", suggestion.description));
        }
    }

    if summary.suggestions == 0 && summary.files_with_errors == 0 {
        output.push_str("\n✅ No refactoring suggestions.\n");
    }

    output.push('\n');
    output.push_str(RULE);
    output
}

/// Markdown written by `analyze-file`: the source, its structure and
/// metrics, and the model's analysis.
pub fn file_analysis_markdown(
    path: &Path,
    source: &str,
    structure: &ModuleStructure,
    metrics: Option<&CodeMetrics>,
    llm_analysis: &str,
) -> String {
    let mut md = format!("# Python Code Analysis: `{}`\n\n", path.display());

    md.push_str("## Structure\n\n");
    md.push_str(&format!("- **Lines**: {}\n", structure.num_lines));
    md.push_str(&format!("- **Functions**: {}\n", structure.num_functions));
    md.push_str(&format!("- **Classes**: {}\n", structure.num_classes));
    md.push_str(&format!("- **Imports**: {}\n", structure.imports.len()));
    if let Some(issue) = &structure.syntax_error {
        md.push_str(&format!(
            "- **Syntax error**: line {}, column {}: {}\n",
            issue.line, issue.column, issue.message
        ));
    }
    md.push('\n');

    if !structure.classes.is_empty() {
        md.push_str("| Class | Bases | Methods | Lines |\n|-------|-------|---------|-------|\n");
        for class in &structure.classes {
            md.push_str(&format!(
                "| `{}` | {} | {} | {}-{} |\n",
                class.name,
                class.bases.join(", "),
                class.methods.len(),
                class.line,
                class.end_line
            ));
        }
        md.push('\n');
    }

    if let Some(metrics) = metrics {
        md.push_str("## Metrics\n\n");
        md.push_str(&format!("- **Total complexity**: {}\n", metrics.total_complexity));
        md.push_str(&format!("- **Average function complexity**: {:.2}\n", metrics.avg_function_complexity));
        md.push_str(&format!("- **Maintainability index**: {:.2}\n", metrics.maintainability_index));
        md.push_str(&format!("- **Comment ratio**: {:.2}\n\n", metrics.comment_ratio));
    }

    md.push_str(&format!("## Source\n\n```python\n{}\n```\n\n", source.trim_end()));
    md.push_str(&format!("## Analysis\n\n{}\n", llm_analysis.trim()));
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::code_metrics;
    use crate::parser::analyze_structure;
    use crate::patterns::{PatternKind, PatternMatch};
    use crate::suggestions::SuggestionLocation;

    fn sample() -> Vec<FileAnalysisResult> {
        let source = "def f(x):\n    if x:\n        return 1\n    return 2\n";
        let mut ok = FileAnalysisResult::new(Path::new("pkg/a.py"));
        ok.metrics = Some(code_metrics(source).unwrap());
        ok.patterns.insert(
            PatternKind::Singleton,
            vec![PatternMatch {
                class_name: "Config".to_string(),
                line: 3,
            }],
        );
        let mut suggestion = RefactoringSuggestion::new(
            "high_complexity",
            "Too complex",
            SuggestionLocation::at_line(Path::new("pkg/a.py"), 1),
            "Split it",
        )
        .with_severity(Severity::High);
        suggestion.id = 7;
        ok.suggestions.push(suggestion);

        let mut broken = FileAnalysisResult::new(Path::new("pkg/b.py"));
        broken.error = Some("Syntax error at line 1".to_string());
        vec![ok, broken]
    }

    #[test]
    fn test_summary() {
        let summary = calculate_summary(&sample());
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.files_with_errors, 1);
        assert_eq!(summary.total_complexity, 2);
        assert_eq!(summary.patterns_found, 1);
        assert_eq!(summary.suggestions, 1);
        assert_eq!(summary.high_severity, 1);
        assert!(summary.avg_maintainability.is_some());
    }

    #[test]
    fn test_json_report() {
        let json = generate_report(&sample(), "json").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["total_files"], 2);
        assert_eq!(value["results"][0]["patterns"]["singleton"][0]["class_name"], "Config");
        assert_eq!(value["results"][0]["suggestions"][0]["type"], "high_complexity");
        assert_eq!(value["results"][1]["error"], "Syntax error at line 1");
    }

    #[test]
    fn test_markdown_report() {
        let md = generate_report(&sample(), "markdown").unwrap();
        assert!(md.contains("- **Files Analyzed**: 2"));
        assert!(md.contains("## 📄 `pkg/a.py`"));
        assert!(md.contains("| `f` | 1 | 2 |"));
        assert!(md.contains("❌ **#7 high_complexity** (line 1): Too complex"));
        assert!(md.contains("❌ Syntax error at line 1"));
    }

    #[test]
    fn test_console_report() {
        let out = generate_report(&sample(), "console").unwrap();
        assert!(out.contains("REFACTORING ANALYSIS REPORT"));
        assert!(out.contains("❌ [high] #7 high_complexity (line 1)"));
        assert!(out.contains("Most complex: f() line 1 (2)"));
        assert!(!out.contains("No refactoring suggestions"));
    }

    #[test]
    fn test_file_analysis_markdown() {
        let source = "class A(Base):\n    def run(self):\n        pass\n";
        let structure = analyze_structure(source).unwrap();
        let md = file_analysis_markdown(Path::new("a.py"), source, &structure, None, "Looks fine.\n");
        assert!(md.starts_with("# Python Code Analysis: `a.py`"));
        assert!(md.contains("| `A` | Base | 1 | 1-3 |"));
        assert!(md.contains("```python\nclass A(Base):"));
        assert!(md.ends_with("## Analysis\n\nLooks fine.\n"));
        assert!(!md.contains("## Metrics"));
    }
}
