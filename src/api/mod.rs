//! Web API analysis: endpoints, data models and RESTful design review.

pub mod design;
pub mod endpoints;
pub mod guide;
pub mod models;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::parser::ParsedSource;
use crate::scanner::{collect_python_files, read_source};
use crate::security::{detect_framework, severity_icon, Framework};

pub use design::{design_score, review_design, DesignIssue};
pub use endpoints::{endpoints_in, Endpoint};
pub use guide::{render_api_pattern, render_api_patterns, ApiPattern, ApiPatternGuide};
pub use models::{models_in, DataModel, ModelKind};

const LISTED_ENDPOINTS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiReport {
    pub framework: Framework,
    pub files_scanned: usize,
    pub endpoints: Vec<Endpoint>,
    pub models: Vec<DataModel>,
    pub issues: Vec<DesignIssue>,
    pub restful_score: u32,
    /// Set when only endpoints were extracted.
    pub endpoints_only: bool,
}

impl ApiReport {
    /// Endpoint count per HTTP method; `ANY` for method-agnostic views.
    pub fn method_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for endpoint in &self.endpoints {
            if endpoint.methods.is_empty() {
                *counts.entry("ANY".to_string()).or_default() += 1;
            }
            for method in &endpoint.methods {
                *counts.entry(method.clone()).or_default() += 1;
            }
        }
        counts
    }
}

pub struct ApiAnalyzer {
    root: PathBuf,
    framework: Framework,
    exclude: Vec<String>,
    skip_dirs: Vec<PathBuf>,
}

impl ApiAnalyzer {
    pub fn new(root: &Path) -> Result<Self> {
        let framework = detect_framework(root)?;
        info!("Detected framework: {framework}");
        Ok(Self {
            root: root.to_path_buf(),
            framework,
            exclude: Vec::new(),
            skip_dirs: Vec::new(),
        })
    }

    pub fn with_framework(mut self, framework: Framework) -> Self {
        self.framework = framework;
        self
    }

    pub fn with_excludes(mut self, exclude: &[String]) -> Self {
        self.exclude = exclude.to_vec();
        self
    }

    pub fn with_skip_dirs(mut self, dirs: &[PathBuf]) -> Self {
        self.skip_dirs = dirs.to_vec();
        self
    }

    pub fn framework(&self) -> Framework {
        self.framework
    }

    /// Extract endpoints and models, then review the design unless
    /// `endpoints_only` is set.
    pub fn analyze(&self, endpoints_only: bool) -> Result<ApiReport> {
        let files = collect_python_files(&self.root, &self.exclude, &self.skip_dirs)?;
        let mut endpoints = Vec::new();
        let mut models = Vec::new();

        for file in &files {
            let content = match read_source(file) {
                Ok(content) => content,
                Err(err) => {
                    warn!("Skipping {}: {err:#}", file.display());
                    continue;
                }
            };
            let parsed = ParsedSource::parse(&content)?;
            if let Some(issue) = parsed.syntax_error() {
                debug!("Skipping {}: syntax error at line {}", file.display(), issue.line);
                continue;
            }
            let shown = self.display_path(file);
            endpoints.extend(endpoints_in(&parsed, &shown));
            if !endpoints_only {
                models.extend(models_in(&parsed, &shown));
            }
        }
        info!("Found {} endpoints and {} models", endpoints.len(), models.len());

        let issues = if endpoints_only {
            Vec::new()
        } else {
            review_design(&endpoints)
        };
        Ok(ApiReport {
            framework: self.framework,
            files_scanned: files.len(),
            restful_score: design_score(&issues),
            endpoints,
            models,
            issues,
            endpoints_only,
        })
    }

    fn display_path(&self, file: &Path) -> PathBuf {
        let base = if self.root.is_file() {
            self.root.parent().unwrap_or(&self.root)
        } else {
            &self.root
        };
        file.strip_prefix(base).unwrap_or(file).to_path_buf()
    }
}

/// Markdown API report.
pub fn render_report(report: &ApiReport) -> String {
    let mut out = String::from("# API Analysis Report\n\n");
    out.push_str(&format!("**Framework:** {}\n", report.framework));
    out.push_str(&format!("**Files scanned:** {}\n\n", report.files_scanned));

    out.push_str(&format!("## Endpoints ({})\n\n", report.endpoints.len()));
    if report.endpoints.is_empty() {
        out.push_str("No endpoints found. Supported frameworks are Django, Flask and FastAPI.\n\n");
        return out;
    }
    out.push_str("| Route | Methods | Handler | Location |\n|---|---|---|---|\n");
    for endpoint in report.endpoints.iter().take(LISTED_ENDPOINTS) {
        out.push_str(&format!(
            "| `{}` | {} | `{}` | {} |\n",
            endpoint.path,
            endpoint.methods_label(),
            endpoint.handler,
            endpoint.location()
        ));
    }
    if report.endpoints.len() > LISTED_ENDPOINTS {
        out.push_str(&format!(
            "\n... and {} more endpoint(s)\n",
            report.endpoints.len() - LISTED_ENDPOINTS
        ));
    }
    let counts: Vec<String> = report
        .method_counts()
        .into_iter()
        .map(|(method, n)| format!("{method}: {n}"))
        .collect();
    out.push_str(&format!("\n**Methods:** {}\n\n", counts.join(", ")));

    if report.endpoints_only {
        return out;
    }

    out.push_str(&format!("## Data Models ({})\n\n", report.models.len()));
    if report.models.is_empty() {
        out.push_str("No data models found.\n\n");
    } else {
        out.push_str("| Model | Kind | Fields | Location |\n|---|---|---|---|\n");
        for model in &report.models {
            let marker = if model.is_complex() { " ⚠️" } else { "" };
            out.push_str(&format!(
                "| `{}` | {} | {}{marker} | {}:{} |\n",
                model.name,
                model.kind,
                model.fields.len(),
                model.file.display(),
                model.line
            ));
        }
        out.push('\n');
    }

    out.push_str(&format!("## RESTful Design Score: {}/100\n\n", report.restful_score));
    if report.issues.is_empty() {
        out.push_str("✅ The API follows RESTful design conventions.\n");
        return out;
    }

    let mut issues: Vec<&DesignIssue> = report.issues.iter().collect();
    issues.sort_by(|a, b| b.severity.cmp(&a.severity));
    for issue in issues {
        let endpoint = issue
            .endpoint
            .as_deref()
            .map(|e| format!(" `{e}`"))
            .unwrap_or_default();
        out.push_str(&format!(
            "- {} `{}`{endpoint} ({}) - {}\n  → {}\n",
            severity_icon(issue.severity),
            issue.kind,
            issue.location(),
            issue.description,
            issue.suggestion
        ));
    }
    out
}
