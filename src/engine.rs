//! Refactoring engine: local quality analysis plus the LLM round trips that
//! turn it into suggestions and rewritten code.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::llm::prompts::{
    TemplateManager, CODE_ANALYSIS, CODE_ANALYSIS_ERROR, GENERATE_REFACTORED_CODE,
    REFACTORING_SUGGESTIONS,
};
use crate::llm::response::{
    extract_code_block, parse_line_range, parse_refactoring_suggestions, LlmSuggestion,
};
use crate::llm::CompletionProvider;
use crate::metrics::{metrics_of, CodeMetrics};
use crate::parser::{structure_of, ModuleStructure, ParsedSource, SyntaxIssue};
use crate::patterns::{DetectedPatterns, PatternDetector, PatternKind};
use crate::registry::PatternsRegistry;
use crate::scanner::read_source;
use crate::suggestions::{
    RefactoringSuggestion, Severity, SuggestionLocation, SuggestionSource, SuggestionStore,
};

const HIGH_TOTAL_COMPLEXITY: u32 = 10;
const HIGH_AVERAGE_COMPLEXITY: f64 = 5.0;
const COMPLEX_FUNCTION: u32 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub severity: Severity,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub metrics: CodeMetrics,
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    fn metrics_summary(&self) -> String {
        let m = &self.metrics;
        let mut lines = vec![
            format!("- Total complexity: {}", m.total_complexity),
            format!("- Average function complexity: {:.2}", m.avg_function_complexity),
            format!("- Maintainability index: {:.1}", m.maintainability_index),
            format!(
                "- Lines: {} total, {} code, {} comment, {} blank",
                m.total_lines, m.code_lines, m.comment_lines, m.blank_lines
            ),
        ];
        for f in &m.function_complexities {
            lines.push(format!("- {} (line {}): complexity {}", f.name, f.line, f.complexity));
        }
        lines.join("\n")
    }

    fn issues_summary(&self) -> String {
        if self.issues.is_empty() {
            return "None found".to_string();
        }
        self.issues
            .iter()
            .map(|i| match i.line {
                Some(line) => format!("- [{}] {} (line {line})", i.severity, i.description),
                None => format!("- [{}] {}", i.severity, i.description),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One detected pattern together with the registry's advice for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternFinding {
    pub pattern: PatternKind,
    pub name: String,
    pub class_name: String,
    pub line: usize,
    pub suggestions: Vec<String>,
}

/// Metrics plus threshold-based issues. Source that does not parse is an error.
pub fn analyze_code_quality(source: &str) -> Result<QualityReport> {
    let parsed = ParsedSource::parse(source)?;
    if let Some(issue) = parsed.syntax_error() {
        anyhow::bail!("Syntax error at line {}: {}", issue.line, issue.message);
    }
    quality_of(&parsed)
}

fn quality_of(parsed: &ParsedSource) -> Result<QualityReport> {
    let metrics = metrics_of(parsed)?;
    let mut issues = Vec::new();

    if metrics.total_complexity > HIGH_TOTAL_COMPLEXITY {
        issues.push(QualityIssue {
            kind: "high_complexity".to_string(),
            description: format!(
                "Code has high cyclomatic complexity ({})",
                metrics.total_complexity
            ),
            severity: Severity::High,
            line: None,
        });
    }

    if metrics.avg_function_complexity > HIGH_AVERAGE_COMPLEXITY {
        issues.push(QualityIssue {
            kind: "high_average_complexity".to_string(),
            description: format!(
                "Functions have high average complexity ({:.2})",
                metrics.avg_function_complexity
            ),
            severity: Severity::Medium,
            line: None,
        });
    }

    for function in &metrics.function_complexities {
        if function.complexity > COMPLEX_FUNCTION {
            issues.push(QualityIssue {
                kind: "complex_function".to_string(),
                description: format!(
                    "Function '{}' has high complexity ({})",
                    function.name, function.complexity
                ),
                severity: Severity::Medium,
                line: Some(function.line),
            });
        }
    }

    Ok(QualityReport { metrics, issues })
}

/// Syntax check for generated code: `None` means it parses cleanly.
pub fn validate_python(code: &str) -> Result<Option<SyntaxIssue>> {
    let parsed = ParsedSource::parse(code)?;
    Ok(parsed.syntax_error())
}

/// Store parsed LLM suggestions for `file`, replacing the file's earlier
/// unapplied LLM suggestions. Line ranges are read from the location text.
pub fn store_llm_suggestions(
    store: &mut SuggestionStore,
    file: &Path,
    suggestions: &[LlmSuggestion],
) -> Result<Vec<u32>> {
    store.clear_pending_for(file, &[SuggestionSource::Llm])?;

    let mut ids = Vec::with_capacity(suggestions.len());
    for suggestion in suggestions {
        let mut location = SuggestionLocation::file(file);
        if let Some((start, end)) = parse_line_range(&suggestion.location) {
            location.start_line = Some(start);
            location.end_line = end;
        }

        let description = if suggestion.description.is_empty() {
            suggestion.location.clone()
        } else {
            suggestion.description.clone()
        };

        let stored = RefactoringSuggestion::new(
            &suggestion.kind,
            &description,
            location,
            &suggestion.recommendation,
        )
        .with_source(SuggestionSource::Llm)
        .with_code_example(&suggestion.code_example);
        ids.push(store.add(stored)?);
    }
    Ok(ids)
}

pub struct RefactoringEngine<'a> {
    llm: &'a dyn CompletionProvider,
    templates: &'a TemplateManager,
    registry: &'a PatternsRegistry,
    detector: PatternDetector,
    max_tokens: u32,
}

impl<'a> RefactoringEngine<'a> {
    pub fn new(
        llm: &'a dyn CompletionProvider,
        templates: &'a TemplateManager,
        registry: &'a PatternsRegistry,
        max_tokens: u32,
    ) -> Self {
        Self {
            llm,
            templates,
            registry,
            detector: PatternDetector::new(),
            max_tokens,
        }
    }

    pub fn detect_design_patterns(&self, source: &str) -> Result<Vec<PatternFinding>> {
        let detected = self.detector.detect(source)?;
        Ok(self.findings(detected))
    }

    fn findings(&self, detected: DetectedPatterns) -> Vec<PatternFinding> {
        let mut out = Vec::new();
        for (kind, matches) in detected {
            let info = self.registry.get(kind.key());
            for hit in matches {
                out.push(PatternFinding {
                    pattern: kind,
                    name: info.map_or_else(|| kind.key().to_string(), |i| i.name.clone()),
                    class_name: hit.class_name,
                    line: hit.line,
                    suggestions: self.registry.refactoring_suggestions(kind.key()),
                });
            }
        }
        out
    }

    /// Ask the model for a general review of a file. Files that do not parse
    /// get the error-analysis prompt instead.
    pub async fn analyze_with_llm(&self, source: &str, structure: &ModuleStructure) -> Result<String> {
        let prompt = match &structure.syntax_error {
            Some(issue) => self.templates.require(CODE_ANALYSIS_ERROR)?.render(&[
                ("code", source),
                ("error", &format!("line {}: {}", issue.line, issue.message)),
            ]),
            None => {
                let imports = if structure.imports.is_empty() {
                    "none".to_string()
                } else {
                    structure
                        .imports
                        .iter()
                        .map(|i| i.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                self.templates.require(CODE_ANALYSIS)?.render(&[
                    ("code", source),
                    ("num_functions", &structure.num_functions.to_string()),
                    ("num_classes", &structure.num_classes.to_string()),
                    ("imports", &imports),
                ])
            }
        };

        let answer = self
            .llm
            .complete(&prompt, self.max_tokens)
            .await
            .context("LLM analysis failed")?;
        Ok(answer)
    }

    /// Quality metrics and detected patterns for `path`, sent to the model
    /// and parsed back into suggestions.
    pub async fn suggest_refactorings(&self, path: &Path) -> Result<Vec<LlmSuggestion>> {
        let source = read_source(path)?;
        let parsed = ParsedSource::parse(&source)?;
        if let Some(issue) = parsed.syntax_error() {
            anyhow::bail!(
                "Cannot suggest refactorings for {}: syntax error at line {}",
                path.display(),
                issue.line
            );
        }

        let quality = quality_of(&parsed)?;
        let findings = self.findings(self.detector.detect_parsed(&parsed));
        let patterns = if findings.is_empty() {
            "None detected".to_string()
        } else {
            findings
                .iter()
                .map(|f| format!("- {} in class {} (line {})", f.name, f.class_name, f.line))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = self.templates.require(REFACTORING_SUGGESTIONS)?.render(&[
            ("code", &source),
            ("quality_metrics", &quality.metrics_summary()),
            ("quality_issues", &quality.issues_summary()),
            ("detected_patterns", &patterns),
        ]);

        info!("Requesting refactoring suggestions from {}", self.llm.name());
        let answer = self
            .llm
            .complete(&prompt, self.max_tokens)
            .await
            .context("Failed to get refactoring suggestions")?;

        let suggestions = parse_refactoring_suggestions(&answer);
        debug!("Parsed {} suggestions from LLM response", suggestions.len());
        Ok(suggestions)
    }

    /// Rewrite `source` according to one suggestion. `None` when the answer
    /// carries no python block.
    pub async fn generate_refactored_code(
        &self,
        source: &str,
        suggestion: &RefactoringSuggestion,
    ) -> Result<Option<String>> {
        let location = match (suggestion.location.start_line, suggestion.location.end_line) {
            (Some(start), Some(end)) => format!("lines {start}-{end}"),
            (Some(start), None) => format!("line {start}"),
            _ => "entire file".to_string(),
        };

        let prompt = self.templates.require(GENERATE_REFACTORED_CODE)?.render(&[
            ("original_code", source),
            ("suggestion_type", &suggestion.kind),
            ("suggestion_description", &suggestion.description),
            ("suggestion_location", &location),
            ("suggestion_recommendation", &suggestion.recommendation),
        ]);

        let answer = self
            .llm
            .complete(&prompt, self.max_tokens.max(2000))
            .await
            .context("Failed to generate refactored code")?;

        let code = extract_code_block(&answer, "python");
        if code.is_none() {
            warn!("LLM response did not contain a python code block");
        }
        Ok(code)
    }
}

/// Structure and metrics of one file, as shown by `analyze-file`.
pub struct FileAnalysis {
    pub structure: ModuleStructure,
    pub metrics: Option<CodeMetrics>,
}

pub fn analyze_source(source: &str) -> Result<FileAnalysis> {
    let parsed = ParsedSource::parse(source)?;
    let structure = structure_of(&parsed);
    let metrics = if structure.syntax_error.is_none() {
        Some(metrics_of(&parsed)?)
    } else {
        None
    };
    Ok(FileAnalysis { structure, metrics })
}
