use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const BUILTIN_API_PATTERNS: &str = include_str!("../../data/api_patterns.yaml");

const BEST_PRACTICES: &[(&str, &str)] = &[
    ("Consistency", "use the same naming and formats across the whole API"),
    ("Documentation", "publish a complete description such as OpenAPI (Swagger)"),
    ("Security", "authenticate, authorize and validate every request"),
    ("Rate limiting", "protect the API from abuse"),
    ("Caching", "send cache headers that match how often data changes"),
    ("HTTPS", "encrypt all API traffic"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPattern {
    pub key: String,
    pub name: String,
    pub description: String,
    pub example: String,
}

/// REST API design patterns with request and response examples.
#[derive(Debug, Clone)]
pub struct ApiPatternGuide {
    patterns: Vec<ApiPattern>,
}

impl ApiPatternGuide {
    pub fn new() -> Result<Self> {
        let patterns: Vec<ApiPattern> = serde_yaml::from_str(BUILTIN_API_PATTERNS)
            .with_context(|| "Failed to parse API patterns YAML")?;
        Ok(Self { patterns })
    }

    /// Case-insensitive lookup; `status_codes` and `status codes` find
    /// `status-codes`.
    pub fn get(&self, name: &str) -> Option<&ApiPattern> {
        let wanted = name.trim().to_lowercase().replace([' ', '_'], "-");
        self.patterns.iter().find(|p| p.key == wanted)
    }

    pub fn all(&self) -> &[ApiPattern] {
        &self.patterns
    }

    pub fn keys(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.key.as_str()).collect()
    }
}

pub fn render_api_pattern(pattern: &ApiPattern) -> String {
    let mut out = format!("━━ {} ━━\n{}\n\n💻 Example:\n", pattern.name, pattern.description);
    for line in pattern.example.trim_end().lines() {
        out.push_str(&format!("    {line}\n"));
    }
    out
}

pub fn render_api_patterns(guide: &ApiPatternGuide) -> String {
    let mut out = String::from("━━ API design patterns and best practices ━━\n");
    for pattern in guide.all() {
        out.push_str(&format!("\n🌐 {} ({})\n   {}\n", pattern.name, pattern.key, pattern.description));
    }
    out.push_str("\nTip: run `pyrefactor api-patterns --pattern <name>` for an example.\n");

    out.push_str("\n📌 More best practices:\n");
    for (title, text) in BEST_PRACTICES {
        out.push_str(&format!("  • {title}: {text}\n"));
    }
    out
}
