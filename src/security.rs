//! Security scan for Django, Flask and FastAPI projects.
//!
//! Most rules are line-oriented regexes over route-handler and configuration
//! files; secrets and exception handlers are found on the syntax tree.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::llm::prompts::{TemplateManager, SECURITY_REVIEW};
use crate::llm::CompletionProvider;
use crate::parser::{descendants, first_named_child, line_of, named_children, node_text, string_value, ParsedSource};
use crate::scanner::{collect_python_files, find_files_named, read_source};
use crate::suggestions::Severity;

const SECRET_NAMES: &[&str] = &["password", "secret", "key", "token", "api_key", "apikey", "private"];
const SENSITIVE_FIELDS: &[&str] = &["password", "secret", "token", "api_key", "credit_card", "ssn"];
const CONFIG_FILES: &[&str] = &["settings.py", "config.py", "app.py", "__init__.py"];
const REQUIREMENT_FILES: &[&str] = &["requirements.txt", "setup.py", "Pipfile", "Pipfile.lock"];
const SECURITY_HEADERS: &[&str] = &[
    "X-Content-Type-Options",
    "X-Frame-Options",
    "Content-Security-Policy",
    "Strict-Transport-Security",
    "X-XSS-Protection",
];
const AUTH_MARKERS: &[&str] = &[
    "login_required",
    "permission_required",
    "user_passes_test",
    "permission_classes",
    "IsAuthenticated",
    "jwt_required",
    "auth_required",
    "current_user",
    "Security(",
    "HTTPBearer",
    "OAuth2",
];
const RATE_LIMIT_KEYWORDS: &[&str] = &["rate_limit", "throttle", "ratelimit", "limiter", "throttling"];
const PUBLIC_PATHS: &[&str] = &["public", "docs", "schema", "swagger", "health"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Django,
    Flask,
    FastApi,
    Unknown,
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Framework::Django => "django",
            Framework::Flask => "flask",
            Framework::FastApi => "fastapi",
            Framework::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl Framework {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "django" => Ok(Framework::Django),
            "flask" => Ok(Framework::Flask),
            "fastapi" => Ok(Framework::FastApi),
            other => bail!("Unknown framework '{other}'. Expected django, flask or fastapi"),
        }
    }
}

/// `manage.py` at the root means Django; otherwise the first web framework
/// imported anywhere in the project, FastAPI winning over Flask.
pub fn detect_framework(project: &Path) -> Result<Framework> {
    let root = if project.is_file() {
        project.parent().unwrap_or(project)
    } else {
        project
    };
    if root.join("manage.py").exists() {
        return Ok(Framework::Django);
    }

    let imports = |module: &str| {
        Regex::new(&format!(r"(?m)^\s*(?:import\s+{module}\b|from\s+{module}(?:\.\w+)*\s+import\b)"))
    };
    let fastapi = imports("fastapi")?;
    let flask = imports("flask")?;

    let mut found_flask = false;
    for file in collect_python_files(root, &[], &[])? {
        let Ok(content) = read_source(&file) else {
            continue;
        };
        if fastapi.is_match(&content) {
            return Ok(Framework::FastApi);
        }
        found_flask |= flask.is_match(&content);
    }

    Ok(if found_flask { Framework::Flask } else { Framework::Unknown })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityCategory {
    Auth,
    InputValidation,
    DataExposure,
    Infrastructure,
}

impl SecurityCategory {
    pub const ALL: [SecurityCategory; 4] = [
        SecurityCategory::Auth,
        SecurityCategory::InputValidation,
        SecurityCategory::DataExposure,
        SecurityCategory::Infrastructure,
    ];

    pub fn of(kind: &str) -> Self {
        match kind {
            "hardcoded_secret" | "missing_auth" => SecurityCategory::Auth,
            "sql_injection" | "xss" | "insecure_deserialization" | "missing_validation" => {
                SecurityCategory::InputValidation
            }
            "insecure_cors" | "insecure_cookies" | "missing_samesite" | "missing_rate_limiting"
            | "dependency_management" => SecurityCategory::Infrastructure,
            _ => SecurityCategory::DataExposure,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            SecurityCategory::Auth => "Authentication",
            SecurityCategory::InputValidation => "Input Validation",
            SecurityCategory::DataExposure => "Data Exposure",
            SecurityCategory::Infrastructure => "Infrastructure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityFinding {
    #[serde(rename = "type")]
    pub kind: String,
    pub category: SecurityCategory,
    pub file: PathBuf,
    pub line: Option<usize>,
    pub severity: Severity,
    pub description: String,
    pub solution: String,
}

impl SecurityFinding {
    fn new(kind: &str, file: &Path, line: Option<usize>, severity: Severity, description: &str, solution: &str) -> Self {
        Self {
            kind: kind.to_string(),
            category: SecurityCategory::of(kind),
            file: file.to_path_buf(),
            line,
            severity,
            description: description.to_string(),
            solution: solution.to_string(),
        }
    }

    fn penalty(&self) -> u32 {
        match self.severity {
            Severity::High => 15,
            Severity::Medium => 7,
            Severity::Low => 3,
        }
    }

    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{line}", self.file.display()),
            None => self.file.display().to_string(),
        }
    }
}

/// 100 minus 15/7/3 points per high/medium/low finding, never below zero.
pub fn security_score(findings: &[SecurityFinding]) -> u32 {
    let penalty: u32 = findings.iter().map(SecurityFinding::penalty).sum();
    100u32.saturating_sub(penalty)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmReview {
    pub file: PathBuf,
    pub review: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityReport {
    pub framework: Framework,
    pub files_scanned: usize,
    pub findings: Vec<SecurityFinding>,
    pub overall_score: u32,
    pub critical_issues: usize,
    #[serde(default)]
    pub llm_reviews: Vec<LlmReview>,
}

impl SecurityReport {
    pub fn new(framework: Framework, files_scanned: usize, findings: Vec<SecurityFinding>) -> Self {
        Self {
            framework,
            files_scanned,
            overall_score: security_score(&findings),
            critical_issues: findings.iter().filter(|f| f.severity == Severity::High).count(),
            findings,
            llm_reviews: Vec::new(),
        }
    }

    pub fn in_category(&self, category: SecurityCategory) -> Vec<&SecurityFinding> {
        self.findings.iter().filter(|f| f.category == category).collect()
    }

    /// Python files ordered by the total penalty of their findings.
    pub fn riskiest_files(&self) -> Vec<PathBuf> {
        let mut totals: BTreeMap<&Path, u32> = BTreeMap::new();
        for finding in &self.findings {
            if finding.file.extension().is_some_and(|e| e == "py") {
                *totals.entry(finding.file.as_path()).or_default() += finding.penalty();
            }
        }
        let mut ranked: Vec<(&Path, u32)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().map(|(p, _)| p.to_path_buf()).collect()
    }
}

/// Regex applied line by line; the first matching line of a file is reported.
struct LineRule {
    kind: &'static str,
    pattern: &'static str,
    /// Case-insensitive text that, following the match on the same line, clears it.
    unless: Option<&'static str>,
    severity: Severity,
    description: &'static str,
    solution: &'static str,
}

const SQL_RULES: &[LineRule] = &[
    LineRule {
        kind: "sql_injection",
        pattern: r#"execute\s*\(\s*['"][^'"]*%s[^'"]*['"]\s*%"#,
        unless: None,
        severity: Severity::High,
        description: "SQL query built with % string formatting",
        solution: "Pass values as query parameters instead of formatting them into the SQL",
    },
    LineRule {
        kind: "sql_injection",
        pattern: r#"execute\s*\(\s*['"][^'"]*['"]\s*(?:\+|\.format\()"#,
        unless: None,
        severity: Severity::High,
        description: "SQL query built by string concatenation",
        solution: "Pass values as query parameters instead of concatenating them into the SQL",
    },
    LineRule {
        kind: "sql_injection",
        pattern: r#"\braw\s*\(\s*['"][^'"]*['"]\s*\+"#,
        unless: None,
        severity: Severity::High,
        description: "Raw SQL built by string concatenation",
        solution: "Use raw() with a params list",
    },
    LineRule {
        kind: "sql_injection",
        pattern: r#"execute\s*\(\s*f['"]"#,
        unless: None,
        severity: Severity::High,
        description: "SQL query built with an f-string",
        solution: "Pass values as query parameters instead of interpolating them",
    },
];

const DESERIALIZATION_RULES: &[LineRule] = &[
    LineRule {
        kind: "insecure_deserialization",
        pattern: r"pickle\.loads?\s*\(",
        unless: Some("trusted"),
        severity: Severity::High,
        description: "pickle deserialization of possibly untrusted data",
        solution: "Use JSON for data that crosses a trust boundary",
    },
    LineRule {
        kind: "insecure_deserialization",
        pattern: r"\beval\s*\(",
        unless: Some("safe"),
        severity: Severity::High,
        description: "eval() can execute arbitrary code",
        solution: "Parse the input explicitly or use ast.literal_eval",
    },
    LineRule {
        kind: "insecure_deserialization",
        pattern: r"yaml\.load\s*\(",
        unless: Some("SafeLoader"),
        severity: Severity::High,
        description: "yaml.load without SafeLoader",
        solution: "Use yaml.safe_load",
    },
];

const CORS_RULES: &[LineRule] = &[
    LineRule {
        kind: "insecure_cors",
        pattern: r"(?i)CORS_ALLOW_ALL_ORIGINS\s*=\s*True",
        unless: None,
        severity: Severity::Medium,
        description: "Django CORS allows every origin",
        solution: "Restrict CORS to trusted origins",
    },
    LineRule {
        kind: "insecure_cors",
        pattern: r"(?i)CORS_ORIGIN_ALLOW_ALL\s*=\s*True",
        unless: None,
        severity: Severity::Medium,
        description: "Django CORS allows every origin",
        solution: "Restrict CORS to trusted origins",
    },
    LineRule {
        kind: "insecure_cors",
        pattern: r#"(?i)access-control-allow-origin[\s'"]*:[\s'"]*\*"#,
        unless: None,
        severity: Severity::Medium,
        description: "Access-Control-Allow-Origin header set to *",
        solution: "Restrict CORS to trusted origins",
    },
    LineRule {
        kind: "insecure_cors",
        pattern: r"(?i)CORS\s*\([^)]*\*",
        unless: None,
        severity: Severity::Medium,
        description: "Flask-CORS configured for every origin",
        solution: "Restrict CORS to trusted origins",
    },
    LineRule {
        kind: "insecure_cors",
        pattern: r#"(?i)allow_origins\s*=\s*\[\s*['"]\*['"]"#,
        unless: None,
        severity: Severity::Medium,
        description: "CORSMiddleware allows every origin",
        solution: "Restrict CORS to trusted origins",
    },
];

const COOKIE_RULES: &[LineRule] = &[
    LineRule {
        kind: "insecure_cookies",
        pattern: r"(?i)SESSION_COOKIE_SECURE\s*=\s*False",
        unless: None,
        severity: Severity::Medium,
        description: "Session cookie is not marked Secure",
        solution: "Set SESSION_COOKIE_SECURE = True",
    },
    LineRule {
        kind: "insecure_cookies",
        pattern: r"(?i)SESSION_COOKIE_HTTPONLY\s*=\s*False",
        unless: None,
        severity: Severity::Medium,
        description: "Session cookie is not marked HttpOnly",
        solution: "Set SESSION_COOKIE_HTTPONLY = True",
    },
    LineRule {
        kind: "insecure_cookies",
        pattern: r"(?i)CSRF_COOKIE_SECURE\s*=\s*False",
        unless: None,
        severity: Severity::Medium,
        description: "CSRF cookie is not marked Secure",
        solution: "Set CSRF_COOKIE_SECURE = True",
    },
    LineRule {
        kind: "insecure_cookies",
        pattern: r"(?i)set_cookie\([^,]*,[^,]*,[^,]*secure\s*=\s*False",
        unless: None,
        severity: Severity::Medium,
        description: "Cookie set without the Secure flag",
        solution: "Pass secure=True to set_cookie",
    },
    LineRule {
        kind: "insecure_cookies",
        pattern: r"(?i)set_cookie\([^,]*,[^,]*,[^,]*httponly\s*=\s*False",
        unless: None,
        severity: Severity::Medium,
        description: "Cookie set without the HttpOnly flag",
        solution: "Pass httponly=True to set_cookie",
    },
];

fn apply_rules(rules: &[LineRule], path: &Path, content: &str, out: &mut Vec<SecurityFinding>) -> Result<()> {
    for rule in rules {
        let re = Regex::new(rule.pattern).with_context(|| format!("Invalid rule pattern: {}", rule.pattern))?;
        let hit = content.lines().enumerate().find_map(|(idx, line)| {
            let m = re.find(line)?;
            let cleared = rule
                .unless
                .is_some_and(|u| line[m.end()..].to_lowercase().contains(&u.to_lowercase()));
            (!cleared).then_some(idx + 1)
        });
        if let Some(line) = hit {
            out.push(SecurityFinding::new(
                rule.kind,
                path,
                Some(line),
                rule.severity,
                rule.description,
                rule.solution,
            ));
        }
    }
    Ok(())
}

fn line_at(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

fn first_line_containing(content: &str, needle: &str) -> Option<usize> {
    content
        .lines()
        .position(|line| line.contains(needle))
        .map(|idx| idx + 1)
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn is_settings_file(path: &Path) -> bool {
    let name = file_name_lower(path);
    name.contains("settings") || name.contains("config")
}

/// String literals assigned to names that look like credentials.
fn hardcoded_secrets(path: &Path, content: &str) -> Result<Vec<SecurityFinding>> {
    let parsed = ParsedSource::parse(content)?;
    let mut out = Vec::new();
    for node in descendants(parsed.root()) {
        if node.kind() != "assignment" {
            continue;
        }
        let (Some(left), Some(right)) = (node.child_by_field_name("left"), node.child_by_field_name("right")) else {
            continue;
        };
        if left.kind() != "identifier" || right.kind() != "string" {
            continue;
        }
        if named_children(right).iter().any(|c| c.kind() == "interpolation") {
            continue;
        }

        let name = node_text(left, content);
        let lower = name.to_lowercase();
        if !SECRET_NAMES.iter().any(|s| lower.contains(s)) {
            continue;
        }
        let value = string_value(node_text(right, content));
        if value.len() > 5 && !value.trim().is_empty() {
            out.push(SecurityFinding::new(
                "hardcoded_secret",
                path,
                Some(line_of(node)),
                Severity::High,
                &format!("Possible hardcoded secret: '{name}' is assigned a string literal"),
                "Load secrets from the environment or a secrets manager",
            ));
        }
    }
    Ok(out)
}

/// `except:` / `except Exception:` handlers whose body never logs.
fn broad_exception_handlers(path: &Path, content: &str) -> Result<Vec<SecurityFinding>> {
    let parsed = ParsedSource::parse(content)?;
    let logs = Regex::new(r"(?i)log")?;
    let mut out = Vec::new();

    for clause in descendants(parsed.root()).into_iter().filter(|n| n.kind() == "except_clause") {
        let children = named_children(clause);
        let caught = children
            .iter()
            .find(|n| n.kind() != "block" && n.kind() != "comment")
            .map(|n| if n.kind() == "as_pattern" { first_named_child(*n).unwrap_or(*n) } else { *n });
        let broad = caught.map_or(true, |t| matches!(node_text(t, content), "Exception" | "BaseException"));
        let body = children.iter().find(|n| n.kind() == "block").map(|b| node_text(*b, content));

        if broad && !body.is_some_and(|b| logs.is_match(b)) {
            out.push(SecurityFinding::new(
                "broad_exception_handling",
                path,
                Some(line_of(clause)),
                Severity::Low,
                "Broad exception handler without logging",
                "Catch specific exceptions and log the error details",
            ));
        }
    }
    Ok(out)
}

pub struct SecurityScanner {
    root: PathBuf,
    framework: Framework,
    exclude: Vec<String>,
    skip_dirs: Vec<PathBuf>,
}

impl SecurityScanner {
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

    pub fn scan(&self) -> Result<SecurityReport> {
        let files = collect_python_files(&self.root, &self.exclude, &self.skip_dirs)?;
        let mut findings = Vec::new();

        for file in &files {
            let content = match read_source(file) {
                Ok(content) => content,
                Err(err) => {
                    warn!("Skipping {}: {err:#}", file.display());
                    continue;
                }
            };
            let found = self.scan_source(file, &content)?;
            debug!("{}: {} findings", file.display(), found.len());
            findings.extend(found);
        }

        if self.root.is_dir() {
            let requirement_files = find_files_named(&self.root, REQUIREMENT_FILES);
            if let Some(finding) = check_dependencies(&requirement_files)? {
                findings.push(finding);
            }
        }

        Ok(SecurityReport::new(self.framework, files.len(), findings))
    }

    pub fn scan_source(&self, path: &Path, content: &str) -> Result<Vec<SecurityFinding>> {
        let mut out = hardcoded_secrets(path, content)?;
        let route_file = self.is_route_handler(content);

        if route_file {
            apply_rules(SQL_RULES, path, content, &mut out)?;
            self.check_xss(path, content, &mut out)?;
            apply_rules(DESERIALIZATION_RULES, path, content, &mut out)?;
            self.check_validation(path, content, &mut out);
            check_sensitive_fields(path, content, &mut out)?;
            self.check_object_references(path, content, &mut out)?;
            self.check_missing_auth(path, content, &mut out)?;
        }

        check_debug(path, content, &mut out)?;

        if route_file && content.contains("except") {
            if content.contains("traceback") && content.contains("return") {
                out.push(SecurityFinding::new(
                    "traceback_exposure",
                    path,
                    first_line_containing(content, "traceback"),
                    Severity::Medium,
                    "Tracebacks may be returned to the client",
                    "Log tracebacks server-side and return a generic error",
                ));
            }
            out.extend(broad_exception_handlers(path, content)?);
        }

        let name = file_name_lower(path);
        if CONFIG_FILES.contains(&name.as_str()) {
            apply_rules(CORS_RULES, path, content, &mut out)?;
            apply_rules(COOKIE_RULES, path, content, &mut out)?;
            if content.contains("set_cookie") && !content.to_lowercase().contains("samesite") {
                out.push(SecurityFinding::new(
                    "missing_samesite",
                    path,
                    first_line_containing(content, "set_cookie"),
                    Severity::Low,
                    "Cookie set without a SameSite attribute",
                    "Set SameSite to \"Lax\" or \"Strict\"",
                ));
            }
            self.check_rate_limiting(path, content, &mut out);
            if is_settings_file(path) {
                check_security_headers(path, content, &mut out);
            }
        }

        Ok(out)
    }

    fn is_route_handler(&self, content: &str) -> bool {
        let markers: &[&str] = match self.framework {
            Framework::Django => &["from django.http", "from rest_framework"],
            Framework::Flask => &["@app.route", "@blueprint.route", "@bp.route"],
            Framework::FastApi => &["@app.", "@router."],
            Framework::Unknown => &[
                "@app.route",
                "@app.get",
                "@app.post",
                "@blueprint.route",
                "@router.",
                "from django.http",
                "from rest_framework",
            ],
        };
        markers.iter().any(|m| content.contains(m))
    }

    fn check_xss(&self, path: &Path, content: &str, out: &mut Vec<SecurityFinding>) -> Result<()> {
        let marker = match self.framework {
            Framework::Django => Some("mark_safe"),
            Framework::Flask => Some("Markup"),
            _ => None,
        };
        if let Some(marker) = marker {
            if content.contains(marker) || content.contains("|safe") {
                out.push(SecurityFinding::new(
                    "xss",
                    path,
                    first_line_containing(content, marker).or_else(|| first_line_containing(content, "|safe")),
                    Severity::High,
                    &format!("{marker} or |safe disables HTML escaping"),
                    "Sanitize user input before marking it safe",
                ));
            }
        }

        let inline = Regex::new(r#"(?i)['"]>\s*\{\{[^}]*?(?:request|form|body|param)[^}]*\}\}"#)?;
        if let Some(m) = inline.find(content) {
            out.push(SecurityFinding::new(
                "xss",
                path,
                Some(line_at(content, m.start())),
                Severity::High,
                "Request data inserted directly into HTML",
                "Escape user input before rendering",
            ));
        }
        Ok(())
    }

    fn check_validation(&self, path: &Path, content: &str, out: &mut Vec<SecurityFinding>) {
        let line = match self.framework {
            Framework::Django
                if (content.contains("request.data") || content.contains("request.POST"))
                    && !content.contains("is_valid()")
                    && !content.contains("clean(") =>
            {
                first_line_containing(content, "request.data")
                    .or_else(|| first_line_containing(content, "request.POST"))
            }
            Framework::Flask
                if (content.contains("request.form") || content.contains("request.json"))
                    && !content.contains("validate")
                    && !content.contains("schema.") =>
            {
                first_line_containing(content, "request.form")
                    .or_else(|| first_line_containing(content, "request.json"))
            }
            // FastAPI validates request bodies through pydantic models.
            _ => return,
        };
        out.push(SecurityFinding::new(
            "missing_validation",
            path,
            line,
            Severity::Medium,
            "Request data is used without explicit validation",
            "Validate input with forms, serializers or schemas",
        ));
    }

    fn check_object_references(&self, path: &Path, content: &str, out: &mut Vec<SecurityFinding>) -> Result<()> {
        let (pattern, guarded) = match self.framework {
            Framework::Django => (
                r"\.(?:get|filter)\(\s*(?:id|pk)\s*=\s*[^)]+\)",
                content.contains("permission") || content.contains("has_perm"),
            ),
            Framework::Flask => (
                r"\.(?:get|query\.get|query\.filter_by)\(\s*id\s*=\s*[^)]+\)",
                content.contains("permission") || content.contains("require"),
            ),
            Framework::FastApi => (
                r"@(?:app|router)\.(?:get|post|put|patch|delete)\([^)]*\{[^}]+\}",
                AUTH_MARKERS.iter().any(|m| content.contains(m)),
            ),
            Framework::Unknown => return Ok(()),
        };
        if guarded {
            return Ok(());
        }
        if let Some(m) = Regex::new(pattern)?.find(content) {
            out.push(SecurityFinding::new(
                "insecure_direct_object_reference",
                path,
                Some(line_at(content, m.start())),
                Severity::Medium,
                "Object looked up by id without an authorization check",
                "Check that the caller may access the object before returning it",
            ));
        }
        Ok(())
    }

    /// Flask/FastAPI routes in files that never mention an auth mechanism.
    fn check_missing_auth(&self, path: &Path, content: &str, out: &mut Vec<SecurityFinding>) -> Result<()> {
        if self.framework == Framework::Django || AUTH_MARKERS.iter().any(|m| content.contains(m)) {
            return Ok(());
        }
        let route = Regex::new(
            r#"@(?:app|router|blueprint|bp|api)\.(?:route|get|post|put|patch|delete)\(\s*['"]([^'"]*)['"]"#,
        )?;
        for caps in route.captures_iter(content) {
            let endpoint = &caps[1];
            if PUBLIC_PATHS.iter().any(|p| endpoint.contains(p)) {
                continue;
            }
            let offset = caps.get(0).map_or(0, |m| m.start());
            out.push(SecurityFinding::new(
                "missing_auth",
                path,
                Some(line_at(content, offset)),
                Severity::Medium,
                &format!("No authentication found for endpoint '{endpoint}'"),
                "Protect the endpoint with an authentication decorator or dependency",
            ));
        }
        Ok(())
    }

    fn check_rate_limiting(&self, path: &Path, content: &str, out: &mut Vec<SecurityFinding>) {
        let name = file_name_lower(path);
        if !(is_settings_file(path) || name == "app.py") {
            return;
        }
        let lower = content.to_lowercase();
        if RATE_LIMIT_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return;
        }
        let solution = match self.framework {
            Framework::Django if !content.contains("DEFAULT_THROTTLE_CLASSES") => {
                "Configure DEFAULT_THROTTLE_CLASSES and DEFAULT_THROTTLE_RATES for REST framework"
            }
            Framework::Flask if !content.contains("Flask-Limiter") => "Add Flask-Limiter",
            Framework::FastApi if !content.contains("Limiter") => "Add a limiter such as fastapi-limiter or slowapi",
            _ => return,
        };
        out.push(SecurityFinding::new(
            "missing_rate_limiting",
            path,
            None,
            Severity::Medium,
            &format!("No {} rate limiting configured", self.framework),
            solution,
        ));
    }
}

fn check_sensitive_fields(path: &Path, content: &str, out: &mut Vec<SecurityFinding>) -> Result<()> {
    for field in SENSITIVE_FIELDS {
        let serializer = Regex::new(&format!(r#"(?i)fields\s*=\s*[\[(][^\])]*['"]{field}['"]"#))?;
        let response = Regex::new(&format!(r#"(?i)['"]{field}['"]\s*:"#))?;
        if let Some(m) = serializer.find(content).or_else(|| response.find(content)) {
            out.push(SecurityFinding::new(
                "sensitive_data_exposure",
                path,
                Some(line_at(content, m.start())),
                Severity::High,
                &format!("Possible exposure of '{field}' in a response or serializer"),
                &format!("Leave {field} out of responses or mask it"),
            ));
        }
    }
    Ok(())
}

fn check_debug(path: &Path, content: &str, out: &mut Vec<SecurityFinding>) -> Result<()> {
    if is_settings_file(path) {
        let hit = content.lines().enumerate().find_map(|(idx, line)| {
            let pos = line.find("DEBUG = True").or_else(|| line.find("debug=True"))?;
            (!line[..pos].contains("if ")).then_some(idx + 1)
        });
        if let Some(line) = hit {
            out.push(SecurityFinding::new(
                "debug_enabled",
                path,
                Some(line),
                Severity::High,
                "Debug mode may be enabled in production",
                "Read the debug flag from the environment and default it to off",
            ));
            return Ok(());
        }
    }

    let run_debug = Regex::new(r"\.run\([^)]*debug\s*=\s*True")?;
    if let Some(m) = run_debug.find(content) {
        out.push(SecurityFinding::new(
            "debug_enabled",
            path,
            Some(line_at(content, m.start())),
            Severity::High,
            "Application is started with debug=True",
            "Read the debug flag from the environment and default it to off",
        ));
    }
    Ok(())
}

fn check_security_headers(path: &Path, content: &str, out: &mut Vec<SecurityFinding>) {
    let lower = content.to_lowercase();
    let missing: Vec<&str> = SECURITY_HEADERS
        .iter()
        .copied()
        .filter(|h| {
            let header = h.to_lowercase();
            !lower.contains(&header) && !lower.contains(&header.replace('-', "_"))
        })
        .collect();
    if !missing.is_empty() {
        out.push(SecurityFinding::new(
            "missing_security_headers",
            path,
            None,
            Severity::Medium,
            &format!("Missing security headers: {}", missing.join(", ")),
            "Add the missing headers, e.g. through middleware",
        ));
    }
}

/// One finding for the whole project when no requirement file pins exact
/// versions or any of them uses `>=`.
fn check_dependencies(files: &[PathBuf]) -> Result<Option<SecurityFinding>> {
    let Some(first) = files.first() else {
        return Ok(None);
    };
    let pinned_re = Regex::new(r"==\d+\.\d+\.\d+")?;
    let mut pinned = false;
    let mut permissive = false;
    for file in files {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        pinned |= pinned_re.is_match(&content);
        permissive |= content.contains(">=");
    }
    if pinned && !permissive {
        return Ok(None);
    }

    let mut problems = Vec::new();
    if !pinned {
        problems.push("versions are not pinned");
    }
    if permissive {
        problems.push("some requirements use >= ranges");
    }
    Ok(Some(SecurityFinding::new(
        "dependency_management",
        first,
        None,
        Severity::Medium,
        &format!("Dependency versions may be unsafe: {}", problems.join(", ")),
        "Pin dependencies to exact versions and scan them for known vulnerabilities",
    )))
}

/// Ask the model to review the riskiest files. A failed review is logged and
/// skipped.
pub async fn review_with_llm(
    report: &mut SecurityReport,
    llm: &dyn CompletionProvider,
    templates: &TemplateManager,
    max_files: usize,
    max_tokens: u32,
) -> Result<()> {
    let template = templates.require(SECURITY_REVIEW)?;
    let framework = report.framework.to_string();

    for file in report.riskiest_files().into_iter().take(max_files) {
        let code = read_source(&file)?;
        let findings = report
            .findings
            .iter()
            .filter(|f| f.file == file)
            .map(|f| match f.line {
                Some(line) => format!("- [{}] {} (line {line}): {}", f.severity, f.kind, f.description),
                None => format!("- [{}] {}: {}", f.severity, f.kind, f.description),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let file_path = file.display().to_string();
        let prompt = template.render(&[
            ("framework", &framework),
            ("file_path", &file_path),
            ("code", &code),
            ("findings", &findings),
        ]);

        info!("Requesting security review for {file_path}");
        match llm.complete(&prompt, max_tokens).await {
            Ok(review) => report.llm_reviews.push(LlmReview { file, review }),
            Err(err) => warn!("Security review failed for {file_path}: {err}"),
        }
    }
    Ok(())
}

pub(crate) fn severity_icon(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "🔴",
        Severity::Medium => "🟠",
        Severity::Low => "🟡",
    }
}

fn recommendation(kind: &str) -> Option<&'static str> {
    let text = match kind {
        "hardcoded_secret" => "Move secrets into environment variables or a secrets manager.",
        "missing_auth" => "Require authentication on every endpoint that is not meant to be public.",
        "sql_injection" => "Use parameterized queries or the ORM instead of building SQL strings.",
        "xss" => "Escape user input before rendering it as HTML.",
        "insecure_deserialization" => "Only deserialize untrusted input with safe formats such as JSON.",
        "missing_validation" => "Validate request data with forms, serializers or schemas.",
        "sensitive_data_exposure" => "Keep credentials and personal data out of responses.",
        "missing_security_headers" => "Send the standard security headers on every response.",
        "insecure_direct_object_reference" => "Check object ownership before returning objects by id.",
        "debug_enabled" => "Disable debug mode outside development.",
        "traceback_exposure" => "Return generic error messages and keep tracebacks in the logs.",
        "broad_exception_handling" => "Catch specific exceptions and log what you handle.",
        "insecure_cors" => "Restrict CORS to the origins that need access.",
        "insecure_cookies" | "missing_samesite" => "Mark cookies Secure and HttpOnly and set SameSite.",
        "missing_rate_limiting" => "Rate limit public endpoints.",
        "dependency_management" => "Pin dependency versions and audit them regularly.",
        _ => return None,
    };
    Some(text)
}

/// Markdown security report. `compact` lists one line per finding and leaves
/// out solutions and recommendations.
pub fn render_report(report: &SecurityReport, compact: bool) -> String {
    let mut out = String::from("# API Security Report\n\n");
    out.push_str(&format!("**Framework:** {}\n", report.framework));
    out.push_str(&format!("**Files scanned:** {}\n\n", report.files_scanned));

    out.push_str(&format!("## Security Score: {}/100\n\n", report.overall_score));
    let verdict = match report.overall_score {
        80.. => "🟢 **Good** - no major problems, minor improvements possible.",
        60..=79 => "🟠 **Fair** - some issues need attention.",
        _ => "🔴 **Poor** - serious issues need fixing now.",
    };
    out.push_str(&format!("{verdict}\n\n"));
    out.push_str(&format!(
        "Found {} high-severity issue(s) in {} finding(s).\n\n",
        report.critical_issues,
        report.findings.len()
    ));

    if report.findings.is_empty() {
        out.push_str("✅ No security issues detected.\n");
    }

    for category in SecurityCategory::ALL {
        let findings = report.in_category(category);
        if findings.is_empty() {
            continue;
        }
        out.push_str(&format!("## {} ({})\n\n", category.title(), findings.len()));
        for (i, finding) in findings.iter().enumerate() {
            if compact {
                out.push_str(&format!(
                    "- {} `{}` {} - {}\n",
                    severity_icon(finding.severity),
                    finding.kind,
                    finding.location(),
                    finding.description
                ));
                continue;
            }
            out.push_str(&format!(
                "### {}. {} {}\n\n",
                i + 1,
                severity_icon(finding.severity),
                finding.kind
            ));
            out.push_str(&format!("**Description:** {}\n\n", finding.description));
            out.push_str(&format!("**Location:** `{}`\n\n", finding.location()));
            out.push_str(&format!("**Solution:** {}\n\n", finding.solution));
        }
        if compact {
            out.push('\n');
        }
    }

    if !compact {
        let mut kinds: Vec<&str> = report.findings.iter().map(|f| f.kind.as_str()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        let recommendations: Vec<&str> = kinds.into_iter().filter_map(recommendation).collect();
        if !recommendations.is_empty() {
            out.push_str("## Recommendations\n\n");
            for text in recommendations {
                out.push_str(&format!("- {text}\n"));
            }
            out.push('\n');
        }
    }

    if !report.llm_reviews.is_empty() {
        out.push_str("## LLM Review\n\n");
        for review in &report.llm_reviews {
            out.push_str(&format!("### {}\n\n{}\n\n", review.file.display(), review.review.trim()));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedProvider;
    use pretty_assertions::assert_eq;
    use std::fs;

    const FLASK_APP: &str = r#"import pickle
from flask import Flask, request

app = Flask(__name__)
SECRET_KEY = "super-secret-value"


@app.route("/users/<int:user_id>")
def get_user(user_id):
    cursor.execute("SELECT * FROM users WHERE id = " + user_id)
    data = pickle.loads(request.data)
    return {"password": data["pw"]}


if __name__ == "__main__":
    app.run(debug=True)
"#;

    fn scanner_for(framework: Framework) -> SecurityScanner {
        SecurityScanner {
            root: PathBuf::from("."),
            framework,
            exclude: Vec::new(),
            skip_dirs: Vec::new(),
        }
    }

    fn kinds(findings: &[SecurityFinding]) -> Vec<&str> {
        let mut kinds: Vec<&str> = findings.iter().map(|f| f.kind.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    #[test]
    fn test_detect_framework() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_framework(dir.path()).unwrap(), Framework::Unknown);

        fs::write(dir.path().join("app.py"), "from flask import Flask\n").unwrap();
        assert_eq!(detect_framework(dir.path()).unwrap(), Framework::Flask);

        fs::write(dir.path().join("api.py"), "import fastapi\n").unwrap();
        assert_eq!(detect_framework(dir.path()).unwrap(), Framework::FastApi);

        fs::write(dir.path().join("manage.py"), "import django\n").unwrap();
        assert_eq!(detect_framework(dir.path()).unwrap(), Framework::Django);
    }

    #[test]
    fn test_parse_framework_name() {
        assert_eq!(Framework::parse("FastAPI").unwrap(), Framework::FastApi);
        assert_eq!(Framework::parse(" flask ").unwrap(), Framework::Flask);
        assert!(Framework::parse("rails").is_err());
    }

    #[test]
    fn test_scan_flask_app() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.py"), FLASK_APP).unwrap();
        fs::write(dir.path().join("requirements.txt"), "flask>=2.0\n").unwrap();

        let scanner = SecurityScanner::new(dir.path()).unwrap();
        assert_eq!(scanner.framework(), Framework::Flask);
        let report = scanner.scan().unwrap();

        assert_eq!(
            kinds(&report.findings),
            vec![
                "debug_enabled",
                "dependency_management",
                "hardcoded_secret",
                "insecure_deserialization",
                "missing_auth",
                "missing_rate_limiting",
                "sensitive_data_exposure",
                "sql_injection",
            ]
        );
        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.critical_issues, 5);
        assert_eq!(report.overall_score, 100 - 5 * 15 - 3 * 7);

        let secret = report.findings.iter().find(|f| f.kind == "hardcoded_secret").unwrap();
        assert_eq!(secret.line, Some(5));
        assert_eq!(secret.category, SecurityCategory::Auth);
        let sql = report.findings.iter().find(|f| f.kind == "sql_injection").unwrap();
        assert_eq!(sql.line, Some(10));
        let deps = report.findings.iter().find(|f| f.kind == "dependency_management").unwrap();
        assert!(deps.description.contains("not pinned"));
    }

    #[test]
    fn test_safe_variants_are_not_reported() {
        let scanner = scanner_for(Framework::Flask);
        let source = r#"import yaml
from flask import Flask
from flask_login import login_required

app = Flask(__name__)
api_key = os.environ["API_KEY"]


@app.route("/items")
@login_required
def items():
    cursor.execute("SELECT * FROM items WHERE owner = %s", (owner,))
    config = yaml.load(stream, Loader=yaml.SafeLoader)
    return ast.literal_eval(config["value"])
"#;
        let findings = scanner.scan_source(Path::new("views.py"), source).unwrap();
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn test_broad_exception_handling() {
        let scanner = scanner_for(Framework::Flask);
        let source = r#"from flask import Flask

app = Flask(__name__)


@app.route("/public/ping")
def ping():
    try:
        return do_ping()
    except Exception:
        return "error"


@app.route("/public/pong")
def pong():
    try:
        return do_pong()
    except Exception as exc:
        logger.exception(exc)
        return "error"
"#;
        let findings = scanner.scan_source(Path::new("views.py"), source).unwrap();
        assert_eq!(kinds(&findings), vec!["broad_exception_handling"]);
        assert_eq!(findings[0].line, Some(10));
        assert_eq!(findings[0].severity, Severity::Low);
    }

    #[test]
    fn test_django_settings() {
        let scanner = scanner_for(Framework::Django);
        let source = "DEBUG = True\nCORS_ORIGIN_ALLOW_ALL = True\nSESSION_COOKIE_SECURE = False\n";
        let findings = scanner.scan_source(Path::new("settings.py"), source).unwrap();
        assert_eq!(
            kinds(&findings),
            vec![
                "debug_enabled",
                "insecure_cookies",
                "insecure_cors",
                "missing_rate_limiting",
                "missing_security_headers",
            ]
        );
    }

    #[test]
    fn test_security_score_floor() {
        let finding = SecurityFinding::new("sql_injection", Path::new("a.py"), None, Severity::High, "", "");
        assert_eq!(security_score(&[]), 100);
        assert_eq!(security_score(&vec![finding; 7]), 0);
    }

    #[test]
    fn test_render_report() {
        let findings = vec![
            SecurityFinding::new("xss", Path::new("views.py"), Some(4), Severity::High, "Markup used", "Escape"),
            SecurityFinding::new("insecure_cors", Path::new("app.py"), None, Severity::Medium, "CORS *", "Restrict"),
        ];
        let report = SecurityReport::new(Framework::Flask, 2, findings);
        assert_eq!(report.overall_score, 78);

        let full = render_report(&report, false);
        assert!(full.contains("## Security Score: 78/100"));
        assert!(full.contains("🟠 **Fair**"));
        assert!(full.contains("## Input Validation (1)"));
        assert!(full.contains("### 1. 🔴 xss"));
        assert!(full.contains("**Location:** `views.py:4`"));
        assert!(full.contains("## Recommendations"));

        let compact = render_report(&report, true);
        assert!(compact.contains("- 🟠 `insecure_cors` app.py - CORS *"));
        assert!(!compact.contains("**Solution:**"));
        assert!(!compact.contains("## Recommendations"));
    }

    #[tokio::test]
    async fn test_review_with_llm_picks_riskiest_file() {
        let dir = tempfile::tempdir().unwrap();
        let risky = dir.path().join("risky.py");
        let mild = dir.path().join("mild.py");
        fs::write(&risky, "password = 'hunter22'\n").unwrap();
        fs::write(&mild, "x = 1\n").unwrap();

        let mut report = SecurityReport::new(
            Framework::Flask,
            2,
            vec![
                SecurityFinding::new("hardcoded_secret", &risky, Some(1), Severity::High, "secret", ""),
                SecurityFinding::new("missing_samesite", &mild, None, Severity::Low, "cookie", ""),
            ],
        );
        let llm = ScriptedProvider::new(&["Rotate the password."]);
        let templates = TemplateManager::builtin();

        review_with_llm(&mut report, &llm, &templates, 1, 500).await.unwrap();

        assert_eq!(report.llm_reviews.len(), 1);
        assert_eq!(report.llm_reviews[0].file, risky);
        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains("reviewing a flask API"));
        assert!(prompt.contains("- [high] hardcoded_secret (line 1): secret"));
        assert!(render_report(&report, false).contains("Rotate the password."));
    }
}
