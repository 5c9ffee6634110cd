//! Refactoring suggestions: the persistent store and the rule-based generator.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::metrics::metrics_of;
use crate::parser::ParsedSource;
use crate::patterns::PatternDetector;
use crate::registry::PatternsRegistry;
use crate::scanner::{normalize_path, read_source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(name)
    }
}

/// Where a suggestion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSource {
    Rule,
    Pattern,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionLocation {
    pub file_path: PathBuf,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub class_name: Option<String>,
}

impl SuggestionLocation {
    pub fn file(path: &Path) -> Self {
        Self {
            file_path: path.to_path_buf(),
            start_line: None,
            end_line: None,
            class_name: None,
        }
    }

    pub fn at_line(path: &Path, line: usize) -> Self {
        Self {
            start_line: Some(line),
            ..Self::file(path)
        }
    }
}

impl fmt::Display for SuggestionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_path.display())?;
        match (self.start_line, self.end_line) {
            (Some(start), Some(end)) if end != start => write!(f, ":{start}-{end}")?,
            (Some(start), _) => write!(f, ":{start}")?,
            _ => {}
        }
        if let Some(class) = &self.class_name {
            write!(f, " (class {class})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefactoringSuggestion {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub location: SuggestionLocation,
    pub recommendation: String,
    pub severity: Severity,
    #[serde(default)]
    pub code_example: String,
    pub source: SuggestionSource,
    pub created_at: DateTime<Local>,
    #[serde(default)]
    pub applied: bool,
    #[serde(default)]
    pub applied_at: Option<DateTime<Local>>,
}

impl RefactoringSuggestion {
    /// A medium severity rule suggestion; the store assigns the id.
    pub fn new(kind: &str, description: &str, location: SuggestionLocation, recommendation: &str) -> Self {
        Self {
            id: 0,
            kind: kind.to_string(),
            description: description.to_string(),
            location,
            recommendation: recommendation.to_string(),
            severity: Severity::Medium,
            code_example: String::new(),
            source: SuggestionSource::Rule,
            created_at: Local::now(),
            applied: false,
            applied_at: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_source(mut self, source: SuggestionSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_code_example(mut self, code: &str) -> Self {
        self.code_example = code.to_string();
        self
    }
}

/// Suggestions persisted as a pretty-printed JSON array. Every mutation is
/// written through immediately. File paths are kept normalized, so
/// `./pkg/a.py` and the absolute spelling of the same file share one entry.
pub struct SuggestionStore {
    path: PathBuf,
    suggestions: Vec<RefactoringSuggestion>,
    next_id: u32,
}

impl SuggestionStore {
    /// Load the store. A missing file is an empty store; so is a corrupt one,
    /// after a warning.
    pub fn load(path: &Path) -> Self {
        let mut suggestions = if path.exists() {
            match read_suggestions(path) {
                Ok(list) => list,
                Err(err) => {
                    warn!("Error loading suggestions from {}: {err:#}", path.display());
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        for suggestion in &mut suggestions {
            suggestion.location.file_path = normalize_path(&suggestion.location.file_path);
        }

        let next_id = suggestions.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        debug!("Loaded {} suggestions from {}", suggestions.len(), path.display());

        Self {
            path: path.to_path_buf(),
            suggestions,
            next_id,
        }
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.suggestions)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write suggestions file: {:?}", self.path))?;
        Ok(())
    }

    /// Store a suggestion under a fresh id and return that id.
    pub fn add(&mut self, mut suggestion: RefactoringSuggestion) -> Result<u32> {
        suggestion.id = self.next_id;
        self.next_id += 1;
        suggestion.location.file_path = normalize_path(&suggestion.location.file_path);
        let id = suggestion.id;
        self.suggestions.push(suggestion);
        self.save()?;
        Ok(id)
    }

    pub fn get(&self, id: u32) -> Option<&RefactoringSuggestion> {
        self.suggestions.iter().find(|s| s.id == id)
    }

    pub fn all(&self) -> &[RefactoringSuggestion] {
        &self.suggestions
    }

    pub fn for_file(&self, file: &Path) -> Vec<&RefactoringSuggestion> {
        let file = normalize_path(file);
        self.suggestions
            .iter()
            .filter(|s| s.location.file_path == file)
            .collect()
    }

    pub fn pending(&self) -> Vec<&RefactoringSuggestion> {
        self.suggestions.iter().filter(|s| !s.applied).collect()
    }

    /// Returns false when the id is unknown.
    pub fn mark_applied(&mut self, id: u32) -> Result<bool> {
        let Some(suggestion) = self.suggestions.iter_mut().find(|s| s.id == id) else {
            return Ok(false);
        };
        suggestion.applied = true;
        suggestion.applied_at = Some(Local::now());
        self.save()?;
        Ok(true)
    }

    pub fn remove(&mut self, id: u32) -> Result<bool> {
        let before = self.suggestions.len();
        self.suggestions.retain(|s| s.id != id);
        if self.suggestions.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Drop unapplied suggestions for `file` that came from one of `sources`.
    pub fn clear_pending_for(&mut self, file: &Path, sources: &[SuggestionSource]) -> Result<usize> {
        let file = normalize_path(file);
        let before = self.suggestions.len();
        self.suggestions.retain(|s| {
            s.applied || s.location.file_path != file || !sources.contains(&s.source)
        });
        let removed = before - self.suggestions.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }
}

fn read_suggestions(path: &Path) -> Result<Vec<RefactoringSuggestion>> {
    let content = fs::read_to_string(path)?;
    let list = serde_json::from_str(&content).with_context(|| "Failed to parse suggestions JSON")?;
    Ok(list)
}

const COMPLEX_TOTAL: u32 = 20;
const COMPLEX_FUNCTION: u32 = 10;
const COMPLEX_FUNCTION_HIGH: u32 = 15;
const MAINTAINABILITY_LOW: f64 = 40.0;
const MAINTAINABILITY_CRITICAL: f64 = 30.0;
const MAX_FUNCTIONS: usize = 25;
const MAX_LINES: usize = 500;
const MIN_COMMENT_RATIO: f64 = 0.05;

/// Rule-based suggestions from metrics and detected patterns.
pub struct SuggestionGenerator<'r> {
    registry: &'r PatternsRegistry,
    detector: PatternDetector,
}

impl<'r> SuggestionGenerator<'r> {
    pub fn new(registry: &'r PatternsRegistry) -> Self {
        Self {
            registry,
            detector: PatternDetector::new(),
        }
    }

    /// Suggestions for one source file, without ids.
    pub fn suggest(&self, path: &Path, source: &str) -> Result<Vec<RefactoringSuggestion>> {
        let parsed = ParsedSource::parse(source)?;
        if let Some(issue) = parsed.syntax_error() {
            warn!(
                "Skipping {}: syntax error at line {}",
                path.display(),
                issue.line
            );
            return Ok(Vec::new());
        }

        let mut out = self.quality_suggestions(path, &parsed)?;
        out.extend(self.pattern_suggestions(path, &parsed));
        Ok(out)
    }

    /// Generate and store suggestions for a file, replacing the file's earlier
    /// unapplied rule and pattern suggestions. Returns the new ids.
    pub fn generate_for_file(&self, store: &mut SuggestionStore, path: &Path) -> Result<Vec<u32>> {
        let source = read_source(path)?;
        let suggestions = self.suggest(path, &source)?;

        let replaced =
            store.clear_pending_for(path, &[SuggestionSource::Rule, SuggestionSource::Pattern])?;
        if replaced > 0 {
            debug!("Replaced {replaced} earlier suggestions for {}", path.display());
        }

        let mut ids = Vec::with_capacity(suggestions.len());
        for suggestion in suggestions {
            ids.push(store.add(suggestion)?);
        }
        info!("Generated {} suggestions for {}", ids.len(), path.display());
        Ok(ids)
    }

    fn quality_suggestions(
        &self,
        path: &Path,
        parsed: &ParsedSource,
    ) -> Result<Vec<RefactoringSuggestion>> {
        let metrics = metrics_of(parsed)?;
        let mut out = Vec::new();

        if metrics.total_complexity > COMPLEX_TOTAL {
            if let Some(worst) = metrics
                .most_complex_function()
                .filter(|f| f.complexity > COMPLEX_FUNCTION)
            {
                let severity = if worst.complexity > COMPLEX_FUNCTION_HIGH {
                    Severity::High
                } else {
                    Severity::Medium
                };
                out.push(
                    RefactoringSuggestion::new(
                        "complexity",
                        &format!(
                            "Function '{}' has a cyclomatic complexity of {}",
                            worst.name, worst.complexity
                        ),
                        SuggestionLocation::at_line(path, worst.line),
                        "Split the function into smaller helpers and flatten nested conditionals \
                         with early returns.",
                    )
                    .with_severity(severity),
                );
            }
        }

        if metrics.maintainability_index < MAINTAINABILITY_LOW {
            let severity = if metrics.maintainability_index < MAINTAINABILITY_CRITICAL {
                Severity::High
            } else {
                Severity::Medium
            };
            out.push(
                RefactoringSuggestion::new(
                    "maintainability",
                    &format!(
                        "Maintainability index is low ({:.1})",
                        metrics.maintainability_index
                    ),
                    SuggestionLocation::file(path),
                    "Reduce function complexity and document the intent of the module.",
                )
                .with_severity(severity),
            );
        }

        if metrics.function_count > MAX_FUNCTIONS {
            out.push(RefactoringSuggestion::new(
                "organization",
                &format!("The file defines {} functions", metrics.function_count),
                SuggestionLocation::file(path),
                "Group related functions into separate modules or classes.",
            ));
        }

        if metrics.total_lines > MAX_LINES {
            out.push(RefactoringSuggestion::new(
                "organization",
                &format!("The file is {} lines long", metrics.total_lines),
                SuggestionLocation::file(path),
                "Split the file into smaller modules with a single responsibility each.",
            ));
        }

        if metrics.comment_ratio < MIN_COMMENT_RATIO {
            out.push(
                RefactoringSuggestion::new(
                    "documentation",
                    &format!(
                        "Only {:.1}% of the lines are comments or docstrings",
                        metrics.comment_ratio * 100.0
                    ),
                    SuggestionLocation::file(path),
                    "Add docstrings to public classes and functions.",
                )
                .with_severity(Severity::Low),
            );
        }

        Ok(out)
    }

    fn pattern_suggestions(&self, path: &Path, parsed: &ParsedSource) -> Vec<RefactoringSuggestion> {
        let mut out = Vec::new();
        for (kind, matches) in self.detector.detect_parsed(parsed) {
            let info = self.registry.get(kind.key());
            let display = info.map_or_else(|| kind.key().to_string(), |i| i.name.clone());
            let tips = info
                .map(|i| i.refactoring_tips.iter().take(2).cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            let example = info.map(|i| i.example.trim_end().to_string()).unwrap_or_default();

            for hit in matches {
                let location = SuggestionLocation {
                    class_name: Some(hit.class_name.clone()),
                    ..SuggestionLocation::at_line(path, hit.line)
                };
                out.push(
                    RefactoringSuggestion::new(
                        &format!("pattern_{}", kind.key()),
                        &format!(
                            "Class '{}' looks like an implementation of the {display} pattern",
                            hit.class_name
                        ),
                        location,
                        &tips.join(" "),
                    )
                    .with_source(SuggestionSource::Pattern)
                    .with_severity(Severity::Low)
                    .with_code_example(&example),
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SINGLETON: &str = r#""""Configuration holder."""


class Settings:
    """Process-wide settings."""

    _instance = None

    def __new__(cls):
        if cls._instance is None:
            cls._instance = super().__new__(cls)
        return cls._instance
"#;

    fn complex_source() -> String {
        let mut src = String::from("def tangled(a, b, c):\n");
        for i in 0..16 {
            src.push_str(&format!("    if a > {i} and b:\n        c += {i}\n"));
        }
        src.push_str("    return c\n\n\ndef other(x):\n");
        for i in 0..6 {
            src.push_str(&format!("    if x == {i}:\n        return {i}\n"));
        }
        src.push_str("    return None\n");
        src
    }

    #[test]
    fn test_store_assigns_monotonic_ids_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suggestions.json");
        let file = Path::new("app.py");

        let mut store = SuggestionStore::load(&path);
        let first = store
            .add(RefactoringSuggestion::new("a", "one", SuggestionLocation::file(file), "r"))
            .unwrap();
        let second = store
            .add(RefactoringSuggestion::new("b", "two", SuggestionLocation::file(file), "r"))
            .unwrap();
        assert_eq!((first, second), (1, 2));

        assert!(store.remove(2).unwrap());
        assert!(!store.remove(2).unwrap());
        assert!(store.mark_applied(1).unwrap());

        let mut reloaded = SuggestionStore::load(&path);
        assert_eq!(reloaded.all().len(), 1);
        assert!(reloaded.get(1).unwrap().applied);
        assert!(reloaded.get(1).unwrap().applied_at.is_some());
        assert!(reloaded.pending().is_empty());

        let third = reloaded
            .add(RefactoringSuggestion::new("c", "three", SuggestionLocation::file(file), "r"))
            .unwrap();
        assert_eq!(third, 2);
    }

    #[test]
    fn test_corrupt_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suggestions.json");
        fs::write(&path, "[{ not json").unwrap();

        let store = SuggestionStore::load(&path);
        assert!(store.all().is_empty());
    }

    #[test]
    fn test_location_display() {
        let mut location = SuggestionLocation::at_line(Path::new("a.py"), 3);
        assert_eq!(location.to_string(), "a.py:3");
        location.end_line = Some(9);
        location.class_name = Some("Foo".to_string());
        assert_eq!(location.to_string(), "a.py:3-9 (class Foo)");
    }

    #[test]
    fn test_pattern_suggestions_use_registry() {
        let registry = PatternsRegistry::new().unwrap();
        let generator = SuggestionGenerator::new(&registry);
        let suggestions = generator.suggest(Path::new("settings.py"), SINGLETON).unwrap();

        let pattern = suggestions
            .iter()
            .find(|s| s.kind == "pattern_singleton")
            .unwrap();
        assert_eq!(pattern.source, SuggestionSource::Pattern);
        assert_eq!(pattern.location.class_name.as_deref(), Some("Settings"));
        assert_eq!(pattern.location.start_line, Some(4));
        assert!(!pattern.recommendation.is_empty());
        assert!(!pattern.code_example.is_empty());
    }

    #[test]
    fn test_quality_rules() {
        let registry = PatternsRegistry::new().unwrap();
        let generator = SuggestionGenerator::new(&registry);
        let suggestions = generator
            .suggest(Path::new("tangled.py"), &complex_source())
            .unwrap();

        let complexity = suggestions.iter().find(|s| s.kind == "complexity").unwrap();
        assert_eq!(complexity.severity, Severity::High);
        assert_eq!(complexity.location.start_line, Some(1));
        assert!(complexity.description.contains("tangled"));

        let docs = suggestions.iter().find(|s| s.kind == "documentation").unwrap();
        assert_eq!(docs.severity, Severity::Low);
    }

    #[test]
    fn test_syntax_error_gives_no_suggestions() {
        let registry = PatternsRegistry::new().unwrap();
        let generator = SuggestionGenerator::new(&registry);
        let suggestions = generator.suggest(Path::new("x.py"), "def broken(:\n").unwrap();
        assert!(suggestions.is_empty());
    }

    #[test]
    fn test_regenerating_replaces_pending_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tangled.py");
        fs::write(&file, complex_source()).unwrap();

        let registry = PatternsRegistry::new().unwrap();
        let generator = SuggestionGenerator::new(&registry);
        let mut store = SuggestionStore::load(&dir.path().join("suggestions.json"));

        let first = generator.generate_for_file(&mut store, &file).unwrap();
        assert!(!first.is_empty());
        store.mark_applied(first[0]).unwrap();

        let second = generator.generate_for_file(&mut store, &file).unwrap();
        assert_eq!(store.all().len(), second.len() + 1);
        assert!(second.iter().all(|id| *id > *first.last().unwrap()));
    }

    #[test]
    fn test_two_spellings_of_a_file_share_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        let file = dir.path().join("pkg/tangled.py");
        fs::write(&file, complex_source()).unwrap();
        let dotted = dir.path().join("./pkg/../pkg/./tangled.py");

        let registry = PatternsRegistry::new().unwrap();
        let generator = SuggestionGenerator::new(&registry);
        let store_path = dir.path().join("suggestions.json");
        let mut store = SuggestionStore::load(&store_path);

        let first = generator.generate_for_file(&mut store, &dotted).unwrap();
        let second = generator.generate_for_file(&mut store, &file).unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(store.all().len(), second.len());
        assert_eq!(store.for_file(&dotted).len(), second.len());
        assert_eq!(store.for_file(&file).len(), second.len());

        let reloaded = SuggestionStore::load(&store_path);
        assert_eq!(reloaded.for_file(&dotted).len(), second.len());
    }
}
