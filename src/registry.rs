use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const BUILTIN_PATTERNS: &str = include_str!("../data/patterns.yaml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternCategory {
    Creational,
    Structural,
    Behavioral,
}

impl PatternCategory {
    pub const ALL: [PatternCategory; 3] = [
        PatternCategory::Creational,
        PatternCategory::Structural,
        PatternCategory::Behavioral,
    ];

    pub fn focus(&self) -> &'static str {
        match self {
            PatternCategory::Creational => "how objects are created",
            PatternCategory::Structural => "how classes and objects are composed",
            PatternCategory::Behavioral => "how objects communicate",
        }
    }
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatternCategory::Creational => "Creational",
            PatternCategory::Structural => "Structural",
            PatternCategory::Behavioral => "Behavioral",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedPattern {
    pub name: String,
    pub relation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternInfo {
    pub key: String,
    pub name: String,
    pub category: PatternCategory,
    pub description: String,
    pub benefits: Vec<String>,
    pub drawbacks: Vec<String>,
    pub implementation_tips: Vec<String>,
    pub refactoring_tips: Vec<String>,
    pub applicability: Vec<String>,
    pub alternatives: String,
    /// ASCII class diagram.
    #[serde(default)]
    pub diagram: String,
    /// Steps of a typical call sequence through the pattern.
    #[serde(default)]
    pub flow: Vec<String>,
    #[serde(default)]
    pub related: Vec<RelatedPattern>,
    pub example: String,
}

/// Knowledge base of the design patterns the detector knows about.
#[derive(Debug, Clone)]
pub struct PatternsRegistry {
    patterns: Vec<PatternInfo>,
}

impl PatternsRegistry {
    pub fn new() -> Result<Self> {
        Self::from_yaml(BUILTIN_PATTERNS)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let patterns: Vec<PatternInfo> =
            serde_yaml::from_str(content).with_context(|| "Failed to parse patterns YAML")?;
        Ok(Self { patterns })
    }

    /// Look a pattern up by key (`factory_method`) or display name
    /// (`Factory Method`), ignoring case.
    pub fn get(&self, name: &str) -> Option<&PatternInfo> {
        let wanted = name.trim().to_lowercase().replace([' ', '-'], "_");
        self.patterns
            .iter()
            .find(|p| p.key == wanted || p.name.to_lowercase().replace(' ', "_") == wanted)
    }

    pub fn all(&self) -> &[PatternInfo] {
        &self.patterns
    }

    pub fn keys(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.key.as_str()).collect()
    }

    pub fn by_category(&self, category: PatternCategory) -> Vec<&PatternInfo> {
        self.patterns
            .iter()
            .filter(|p| p.category == category)
            .collect()
    }

    pub fn refactoring_suggestions(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|p| p.refactoring_tips.clone())
            .unwrap_or_default()
    }
}

/// Full console rendering of one pattern.
pub fn render_details(pattern: &PatternInfo) -> String {
    let mut out = String::new();
    out.push_str(&format!("━━ {} ({}) ━━\n", pattern.name, pattern.category));
    out.push_str(&format!("{}\n", pattern.description));

    out.push_str("\n📌 When to use:\n");
    for point in &pattern.applicability {
        out.push_str(&format!("  • {point}\n"));
    }

    let sections = [
        ("✅ Benefits", &pattern.benefits, "✓"),
        ("⚠️  Drawbacks", &pattern.drawbacks, "⚠"),
        ("🔧 Implementation tips", &pattern.implementation_tips, "→"),
        ("♻️  Refactoring tips", &pattern.refactoring_tips, "↻"),
    ];
    for (title, items, bullet) in sections {
        out.push_str(&format!("\n{title}:\n"));
        for item in items {
            out.push_str(&format!("  {bullet} {item}\n"));
        }
    }

    out.push_str("\n💻 Example:\n");
    for line in pattern.example.trim_end().lines() {
        out.push_str(&format!("    {line}\n"));
    }

    if !pattern.related.is_empty() {
        out.push_str("\n🔗 Related patterns:\n");
        for related in &pattern.related {
            out.push_str(&format!("  • {} - {}\n", related.name, related.relation));
        }
    }

    out
}

/// Structure diagram, call flow and typical uses of one pattern.
pub fn render_diagram(pattern: &PatternInfo) -> String {
    let mut out = format!("━━ {} diagram ━━\n\n", pattern.name);
    if pattern.diagram.trim().is_empty() {
        out.push_str("No diagram available for this pattern.\n");
    } else {
        for line in pattern.diagram.trim_end().lines() {
            out.push_str(&format!("    {line}\n"));
        }
    }

    if !pattern.flow.is_empty() {
        out.push_str("\n🔁 Flow:\n");
        for (i, step) in pattern.flow.iter().enumerate() {
            out.push_str(&format!("  {}. {step}\n", i + 1));
        }
    }

    out.push_str("\n📌 Typical uses:\n");
    for point in &pattern.applicability {
        out.push_str(&format!("  • {point}\n"));
    }

    out.push_str(&format!(
        "\nTip: run `pyrefactor patterns --pattern {}` for a full code example.\n",
        pattern.key
    ));
    out
}

/// Common design problems and the patterns that answer them.
const PROBLEM_GUIDE: &[(&str, &str)] = &[
    ("A class must have exactly one instance", "Singleton"),
    ("Objects must be created without naming their concrete class", "Factory Method or Abstract Factory"),
    ("Behaviour must be added without changing existing code", "Decorator"),
    ("Two incompatible interfaces must work together", "Adapter"),
    ("Other objects must hear about state changes", "Observer"),
    ("An algorithm must be swappable at runtime", "Strategy"),
    ("A complex subsystem needs a simple entry point", "Facade"),
    ("Operations need history or undo", "Command and Memento"),
    ("Building an object is a multi-step process", "Builder"),
    ("Behaviour depends on the current state", "State"),
];

const DECISION_TREE: &str = "\
Creating objects?
├── yes → Exactly one instance?
│         ├── yes → [Singleton]
│         └── no  → Families of related objects?
│                   ├── yes → [Abstract Factory]
│                   └── no  → Subclasses decide the type?
│                             ├── yes → [Factory Method]
│                             └── no  → Step-by-step construction?
│                                       ├── yes → [Builder]
│                                       └── no  → [Prototype]
└── no  → Adding behaviour to objects?
          ├── yes → Added and removed at runtime?
          │         ├── yes → [Decorator]
          │         └── no  → Incompatible interfaces?
          │                   ├── yes → [Adapter]
          │                   └── no  → [Bridge]
          └── no  → Objects talking to each other?
                    ├── yes → One-to-many notifications?
                    │         ├── yes → [Observer]
                    │         └── no  → Interchangeable algorithms?
                    │                   ├── yes → [Strategy]
                    │                   └── no  → [Mediator]
                    └── no  → Look at the remaining catalogue
";

/// Guide for choosing a pattern: the categories with the patterns this tool
/// knows, common problems with their answers and a decision tree.
pub fn render_guide(registry: &PatternsRegistry) -> String {
    let mut out = String::from("🧭 Design pattern selection guide\n");

    out.push_str("\n━━ Categories ━━\n");
    for category in PatternCategory::ALL {
        let names: Vec<&str> = registry
            .by_category(category)
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        out.push_str(&format!("\n{category}: {}\n", category.focus()));
        if !names.is_empty() {
            out.push_str(&format!("  Covered here: {}\n", names.join(", ")));
        }
    }

    out.push_str("\n━━ Which pattern when? ━━\n\n");
    for (i, (problem, answer)) in PROBLEM_GUIDE.iter().enumerate() {
        out.push_str(&format!("{:>2}. {problem}\n    → {answer}\n", i + 1));
    }

    out.push_str("\n━━ Decision tree ━━\n\n");
    out.push_str(DECISION_TREE);

    out.push_str(
        "\nTip: `pyrefactor patterns --compare` lists trade-offs, \
         `pyrefactor pattern-diagram <name>` shows the structure.\n",
    );
    out
}

/// Side-by-side summary of all patterns, grouped by category.
pub fn render_comparison(registry: &PatternsRegistry) -> String {
    let mut out = String::from("📊 Design pattern comparison\n");

    for category in PatternCategory::ALL {
        let patterns = registry.by_category(category);
        if patterns.is_empty() {
            continue;
        }
        out.push_str(&format!(
            "\n━━ {category} patterns ({}) ━━\n",
            category.focus()
        ));
        for pattern in patterns {
            out.push_str(&format!("\n{}\n", pattern.name));
            out.push_str(&format!("  Use when: {}\n", pattern.applicability.join("; ")));
            out.push_str(&format!(
                "  Pros:     {}\n",
                pattern.benefits.iter().take(3).cloned().collect::<Vec<_>>().join("; ")
            ));
            out.push_str(&format!(
                "  Cons:     {}\n",
                pattern.drawbacks.iter().take(3).cloned().collect::<Vec<_>>().join("; ")
            ));
            out.push_str(&format!("  Instead:  {}\n", pattern.alternatives));
        }
    }

    out.push_str("\nTip: run `pyrefactor patterns --pattern <name>` for the full details.\n");
    out
}
