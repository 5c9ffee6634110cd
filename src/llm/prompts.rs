//! Prompt templates with `{{name}}` placeholders.
//!
//! Built-in templates ship with the binary; files in the project's templates
//! directory (`*.json`, `*.yaml`, `*.yml` with `id`, `template_text` and an
//! optional `description`) override them by id.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CODE_ANALYSIS: &str = "code_analysis";
pub const CODE_ANALYSIS_ERROR: &str = "code_analysis_error";
pub const REFACTORING_SUGGESTIONS: &str = "refactoring_suggestions";
pub const GENERATE_REFACTORED_CODE: &str = "generate_refactored_code";
pub const PERFORMANCE_OPTIMIZATION: &str = "performance_optimization";
pub const SECURITY_REVIEW: &str = "security_review";

const BUILTIN: &[(&str, &str, &str)] = &[
    (
        CODE_ANALYSIS,
        include_str!("../../prompts/code_analysis.md"),
        "Template for Python code analysis",
    ),
    (
        CODE_ANALYSIS_ERROR,
        include_str!("../../prompts/code_analysis_error.md"),
        "Template for analyzing code that fails to parse",
    ),
    (
        REFACTORING_SUGGESTIONS,
        include_str!("../../prompts/refactoring_suggestions.md"),
        "Template for generating refactoring suggestions",
    ),
    (
        GENERATE_REFACTORED_CODE,
        include_str!("../../prompts/generate_refactored_code.md"),
        "Template for producing refactored code from one suggestion",
    ),
    (
        PERFORMANCE_OPTIMIZATION,
        include_str!("../../prompts/performance_optimization.md"),
        "Template for LLM-driven performance optimization",
    ),
    (
        SECURITY_REVIEW,
        include_str!("../../prompts/security_review.md"),
        "Template for reviewing API code for vulnerabilities",
    ),
];

/// Render a template by replacing {{key}} placeholders
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{key}}}}}"), value);
    }
    result
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub template_text: String,
    #[serde(default)]
    pub description: String,
}

impl PromptTemplate {
    pub fn new(id: &str, template_text: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            template_text: template_text.to_string(),
            description: description.to_string(),
        }
    }

    /// Placeholder names in order of first appearance.
    pub fn variables(&self) -> Vec<String> {
        let Ok(re) = Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}") else {
            return Vec::new();
        };
        let mut names: Vec<String> = Vec::new();
        for caps in re.captures_iter(&self.template_text) {
            let name = caps[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        render_template(&self.template_text, vars)
    }
}

pub struct TemplateManager {
    dir: Option<PathBuf>,
    templates: BTreeMap<String, PromptTemplate>,
}

impl TemplateManager {
    /// Only the built-in templates.
    pub fn builtin() -> Self {
        let mut manager = Self {
            dir: None,
            templates: BTreeMap::new(),
        };
        manager.fill_defaults();
        manager
    }

    /// Load user templates from `dir` (created when missing) on top of the
    /// built-in ones. Unreadable files are skipped with a warning.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut manager = Self {
            dir: Some(dir.to_path_buf()),
            templates: BTreeMap::new(),
        };

        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create templates directory: {dir:?}"))?;
        }

        let entries =
            fs::read_dir(dir).with_context(|| format!("Failed to read templates directory: {dir:?}"))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_template = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "json" | "yaml" | "yml"));
            if !is_template {
                continue;
            }
            match read_template(&path) {
                Ok(template) => {
                    debug!("Loaded prompt template '{}' from {}", template.id, path.display());
                    manager.templates.insert(template.id.clone(), template);
                }
                Err(err) => warn!("Error loading template from {}: {err:#}", path.display()),
            }
        }

        manager.fill_defaults();
        Ok(manager)
    }

    fn fill_defaults(&mut self) {
        for (id, text, description) in BUILTIN {
            self.templates
                .entry(id.to_string())
                .or_insert_with(|| PromptTemplate::new(id, text, description));
        }
    }

    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.get(id)
    }

    pub fn require(&self, id: &str) -> Result<&PromptTemplate> {
        self.get(id)
            .with_context(|| format!("Prompt template '{id}' not found"))
    }

    pub fn all(&self) -> impl Iterator<Item = &PromptTemplate> {
        self.templates.values()
    }

    /// Add a new template; an existing id is an error.
    pub fn add(&mut self, template: PromptTemplate) -> Result<()> {
        if self.templates.contains_key(&template.id) {
            bail!("Prompt template '{}' already exists", template.id);
        }
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Replace an existing template; returns false when the id is unknown.
    pub fn update(&mut self, template: PromptTemplate) -> bool {
        match self.templates.get_mut(&template.id) {
            Some(slot) => {
                *slot = template;
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, id: &str) -> bool {
        self.templates.remove(id).is_some()
    }

    /// Write a template to `<dir>/<id>.json` so later runs pick it up.
    pub fn save(&self, id: &str) -> Result<PathBuf> {
        let dir = self
            .dir
            .as_ref()
            .context("Template manager has no directory to save into")?;
        let template = self.require(id)?;
        let path = dir.join(format!("{id}.json"));
        let json = serde_json::to_string_pretty(template)?;
        fs::write(&path, json).with_context(|| format!("Failed to write template: {path:?}"))?;
        Ok(path)
    }
}

fn read_template(path: &Path) -> Result<PromptTemplate> {
    let content = fs::read_to_string(path)?;
    let template: PromptTemplate =
        serde_yaml::from_str(&content).with_context(|| "Failed to parse template file")?;
    if template.id.trim().is_empty() || template.template_text.trim().is_empty() {
        bail!("template needs a non-empty id and template_text");
    }
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_template() {
        let out = render_template("Hi {{name}}, {{name}}! {{other}}", &[("name", "Ada")]);
        assert_eq!(out, "Hi Ada, Ada! {{other}}");
    }

    #[test]
    fn test_builtin_templates_and_variables() {
        let manager = TemplateManager::builtin();
        let analysis = manager.get(CODE_ANALYSIS).unwrap();
        assert_eq!(
            analysis.variables(),
            vec!["code", "num_functions", "num_classes", "imports"]
        );
        assert_eq!(
            manager.get(CODE_ANALYSIS_ERROR).unwrap().variables(),
            vec!["code", "error"]
        );
        assert!(manager.require(REFACTORING_SUGGESTIONS).is_ok());
        assert!(manager.require("missing").is_err());
        assert_eq!(manager.all().count(), 6);
    }

    #[test]
    fn test_directory_templates_override_builtin() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("analysis.json"),
            r#"{"id": "code_analysis", "template_text": "Custom {{code}}", "description": "mine"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("broken.json"), "{ nope").unwrap();
        fs::write(
            dir.path().join("extra.yaml"),
            "id: naming\ntemplate_text: \"Name things in {{code}}\"\n",
        )
        .unwrap();

        let manager = TemplateManager::load(dir.path()).unwrap();
        assert_eq!(
            manager.get(CODE_ANALYSIS).unwrap().render(&[("code", "x")]),
            "Custom x"
        );
        assert!(manager.get("naming").is_some());
        assert!(manager.get(SECURITY_REVIEW).is_some());
    }

    #[test]
    fn test_load_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("prompt_templates");
        TemplateManager::load(&target).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_add_update_delete_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = TemplateManager::load(dir.path()).unwrap();

        manager
            .add(PromptTemplate::new("review", "Review {{code}}", ""))
            .unwrap();
        assert!(manager
            .add(PromptTemplate::new("review", "again", ""))
            .is_err());

        assert!(manager.update(PromptTemplate::new("review", "Check {{code}}", "")));
        assert!(!manager.update(PromptTemplate::new("ghost", "x", "")));

        let saved = manager.save("review").unwrap();
        let reloaded = TemplateManager::load(dir.path()).unwrap();
        assert_eq!(reloaded.get("review").unwrap().template_text, "Check {{code}}");
        assert!(saved.ends_with("review.json"));

        assert!(manager.delete("review"));
        assert!(!manager.delete("review"));
    }
}
