//! Signature matching for a handful of classic design patterns.
//!
//! These are heuristics over class shape (method names, `self` attribute
//! wiring, delegation calls). They point the LLM and the user at likely
//! pattern usage; they do not prove it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tree_sitter::Node;
use tracing::debug;

use crate::parser::{
    descendants, first_named_child, line_of, named_children, node_text, parameters, statements,
    unwrap_definition, ParamKind, ParsedSource,
};
use crate::scanner::{collect_python_files, read_source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Singleton,
    FactoryMethod,
    Observer,
    Strategy,
    Decorator,
    Adapter,
}

impl PatternKind {
    pub const ALL: [PatternKind; 6] = [
        PatternKind::Singleton,
        PatternKind::FactoryMethod,
        PatternKind::Observer,
        PatternKind::Strategy,
        PatternKind::Decorator,
        PatternKind::Adapter,
    ];

    /// Registry key, e.g. `factory_method`.
    pub fn key(&self) -> &'static str {
        match self {
            PatternKind::Singleton => "singleton",
            PatternKind::FactoryMethod => "factory_method",
            PatternKind::Observer => "observer",
            PatternKind::Strategy => "strategy",
            PatternKind::Decorator => "decorator",
            PatternKind::Adapter => "adapter",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let normalized = key.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|k| k.key() == normalized)
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub class_name: String,
    pub line: usize,
}

/// Matches per pattern; kinds without matches are absent.
pub type DetectedPatterns = BTreeMap<PatternKind, Vec<PatternMatch>>;

const FACTORY_TERMS: &[&str] = &["create", "build", "make", "generate", "factory"];
const OBSERVER_METHOD_TERMS: &[&str] = &[
    "add_observer",
    "remove_observer",
    "notify",
    "subscribe",
    "unsubscribe",
];
const OBSERVER_ATTR_TERMS: &[&str] = &["observer", "listener", "subscriber"];

#[derive(Debug, Default)]
pub struct PatternDetector;

impl PatternDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect patterns in a source string. Broken syntax yields no matches.
    pub fn detect(&self, source: &str) -> Result<DetectedPatterns> {
        let parsed = ParsedSource::parse(source)?;
        if parsed.has_errors() {
            debug!("Skipping pattern detection on source with syntax errors");
            return Ok(DetectedPatterns::new());
        }
        Ok(self.detect_parsed(&parsed))
    }

    pub fn detect_parsed(&self, parsed: &ParsedSource) -> DetectedPatterns {
        let source = parsed.source();
        let mut found = DetectedPatterns::new();

        for class in descendants(parsed.root())
            .into_iter()
            .filter(|n| n.kind() == "class_definition")
        {
            let shape = ClassShape::read(class, source);
            let hit = PatternMatch {
                class_name: shape.name.clone(),
                line: line_of(class),
            };

            let checks = [
                (PatternKind::Singleton, shape.is_singleton()),
                (PatternKind::FactoryMethod, shape.is_factory()),
                (PatternKind::Observer, shape.is_observer()),
                (PatternKind::Strategy, shape.is_strategy_context()),
                (PatternKind::Decorator, shape.is_decorator()),
                (PatternKind::Adapter, shape.is_adapter()),
            ];
            for (kind, matched) in checks {
                if matched {
                    found.entry(kind).or_default().push(hit.clone());
                }
            }
        }

        found
    }

    pub fn detect_file(&self, path: &Path) -> Result<DetectedPatterns> {
        let source = read_source(path)?;
        self.detect(&source)
    }

    /// Detect patterns across every Python file under `dir`. Files without
    /// matches are left out.
    pub fn detect_in_directory(
        &self,
        dir: &Path,
        exclude: &[String],
        skip_dirs: &[PathBuf],
    ) -> Result<BTreeMap<PathBuf, DetectedPatterns>> {
        let mut result = BTreeMap::new();
        for file in collect_python_files(dir, exclude, skip_dirs)? {
            let patterns = self.detect_file(&file)?;
            if !patterns.is_empty() {
                result.insert(file, patterns);
            }
        }
        Ok(result)
    }
}

struct Method<'t> {
    name: String,
    node: Node<'t>,
}

/// The parts of a class the pattern rules look at.
struct ClassShape<'t, 's> {
    name: String,
    source: &'s str,
    body_assignments: Vec<String>,
    methods: Vec<Method<'t>>,
}

impl<'t, 's> ClassShape<'t, 's> {
    fn read(class: Node<'t>, source: &'s str) -> Self {
        let name = class
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string())
            .unwrap_or_default();

        let mut body_assignments = Vec::new();
        let mut methods = Vec::new();

        if let Some(body) = class.child_by_field_name("body") {
            for stmt in statements(body) {
                if stmt.kind() == "expression_statement" {
                    for assign in named_children(stmt)
                        .into_iter()
                        .filter(|n| n.kind() == "assignment")
                    {
                        if let Some(left) = assign.child_by_field_name("left") {
                            if left.kind() == "identifier" {
                                body_assignments.push(node_text(left, source).to_string());
                            }
                        }
                    }
                }
                if let Some((def, _)) = unwrap_definition(stmt) {
                    if def.kind() == "function_definition" {
                        methods.push(Method {
                            name: def
                                .child_by_field_name("name")
                                .map(|n| node_text(n, source).to_string())
                                .unwrap_or_default(),
                            node: def,
                        });
                    }
                }
            }
        }

        Self {
            name,
            source,
            body_assignments,
            methods,
        }
    }

    fn init(&self) -> Option<&Method<'t>> {
        self.methods.iter().find(|m| m.name == "__init__")
    }

    fn public_methods(&self) -> impl Iterator<Item = &Method<'t>> {
        self.methods.iter().filter(|m| !m.name.starts_with("__"))
    }

    fn is_singleton(&self) -> bool {
        let has_instance_var = self
            .body_assignments
            .iter()
            .any(|n| n.starts_with("_instance") || n.starts_with("__instance"));
        let has_accessor = self.methods.iter().any(|m| {
            let lower = m.name.to_lowercase();
            m.name == "__new__" || lower.contains("get_instance") || lower.contains("getinstance")
        });
        has_instance_var && has_accessor
    }

    fn is_factory(&self) -> bool {
        self.methods.iter().any(|m| {
            let lower = m.name.to_lowercase();
            FACTORY_TERMS.iter().any(|t| lower.contains(t))
                && descendants(m.node).into_iter().any(|n| {
                    n.kind() == "return_statement"
                        && first_named_child(n).is_some_and(|v| v.kind() == "call")
                })
        })
    }

    fn is_observer(&self) -> bool {
        let observer_methods = self
            .methods
            .iter()
            .map(|m| m.name.to_lowercase())
            .filter(|n| OBSERVER_METHOD_TERMS.iter().any(|t| n.contains(t)))
            .collect::<std::collections::BTreeSet<_>>();

        let has_collection = self.methods.iter().any(|m| {
            self_assignments(m.node, self.source).iter().any(|(attr, _)| {
                let lower = attr.to_lowercase();
                OBSERVER_ATTR_TERMS.iter().any(|t| lower.contains(t))
            })
        });

        observer_methods.len() >= 2 || has_collection
    }

    /// `__init__` stores one of its parameters on `self` unchanged.
    fn is_strategy_context(&self) -> bool {
        let Some(init) = self.init() else {
            return false;
        };
        let params: Vec<String> = parameters(init.node, self.source)
            .into_iter()
            .filter(|p| p.kind != ParamKind::VarPositional && p.kind != ParamKind::VarKeyword)
            .skip(1)
            .map(|p| p.name)
            .collect();

        self_assignments(init.node, self.source)
            .iter()
            .any(|(_, value)| value.kind() == "identifier" && params.iter().any(|p| p == node_text(*value, self.source)))
    }

    fn is_decorator(&self) -> bool {
        let Some(init) = self.init() else {
            return false;
        };
        let takes_component = parameters(init.node, self.source).len() > 1
            && !self_assignments(init.node, self.source).is_empty();
        if !takes_component {
            return false;
        }

        self.public_methods().any(|m| {
            self_member_calls(m.node, self.source)
                .iter()
                .any(|called| *called == m.name)
        })
    }

    fn is_adapter(&self) -> bool {
        let has_adaptee = self
            .init()
            .is_some_and(|init| !self_assignments(init.node, self.source).is_empty());

        has_adaptee
            && self
                .public_methods()
                .any(|m| !self_member_calls(m.node, self.source).is_empty())
    }
}

/// `self.<attr> = <value>` assignments anywhere inside `node`.
fn self_assignments<'t>(node: Node<'t>, source: &str) -> Vec<(String, Node<'t>)> {
    descendants(node)
        .into_iter()
        .filter(|n| n.kind() == "assignment")
        .filter_map(|assign| {
            let left = assign.child_by_field_name("left")?;
            let attr = self_attribute(left, source)?;
            let value = assign.child_by_field_name("right")?;
            Some((attr, value))
        })
        .collect()
}

/// `self.x` -> `x`.
fn self_attribute(node: Node<'_>, source: &str) -> Option<String> {
    if node.kind() != "attribute" {
        return None;
    }
    let object = node.child_by_field_name("object")?;
    if object.kind() != "identifier" || node_text(object, source) != "self" {
        return None;
    }
    node.child_by_field_name("attribute")
        .map(|a| node_text(a, source).to_string())
}

/// Method names called as `self.<member>.<method>(...)` inside `node`.
fn self_member_calls(node: Node<'_>, source: &str) -> Vec<String> {
    descendants(node)
        .into_iter()
        .filter(|n| n.kind() == "call")
        .filter_map(|call| {
            let function = call.child_by_field_name("function")?;
            if function.kind() != "attribute" {
                return None;
            }
            let receiver = function.child_by_field_name("object")?;
            self_attribute(receiver, source)?;
            function
                .child_by_field_name("attribute")
                .map(|a| node_text(a, source).to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(source: &str) -> DetectedPatterns {
        PatternDetector::new().detect(source).unwrap()
    }

    fn classes(found: &DetectedPatterns, kind: PatternKind) -> Vec<String> {
        found
            .get(&kind)
            .map(|v| v.iter().map(|m| m.class_name.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_singleton() {
        let found = detect(
            r#"
class Config:
    _instance = None

    def __new__(cls):
        if cls._instance is None:
            cls._instance = super().__new__(cls)
        return cls._instance
"#,
        );
        assert_eq!(classes(&found, PatternKind::Singleton), vec!["Config"]);
        assert_eq!(found[&PatternKind::Singleton][0].line, 2);
    }

    #[test]
    fn test_singleton_needs_both_parts() {
        let found = detect("class Plain:\n    _instance = None\n\n    def run(self):\n        pass\n");
        assert!(!found.contains_key(&PatternKind::Singleton));
    }

    #[test]
    fn test_factory_method() {
        let found = detect(
            r#"
class ShapeFactory:
    def create_shape(self, kind):
        if kind == "circle":
            return Circle()
        return Square()
"#,
        );
        assert_eq!(classes(&found, PatternKind::FactoryMethod), vec!["ShapeFactory"]);
    }

    #[test]
    fn test_observer_by_methods_and_by_collection() {
        let found = detect(
            r#"
class Subject:
    def subscribe(self, fn):
        pass

    def notify(self):
        pass


class Bus:
    def __init__(self):
        self.listeners = []
"#,
        );
        assert_eq!(classes(&found, PatternKind::Observer), vec!["Subject", "Bus"]);
    }

    #[test]
    fn test_strategy_decorator_and_adapter() {
        let found = detect(
            r#"
class Sorter:
    def __init__(self, strategy):
        self.strategy = strategy

    def sort(self, data):
        return self.strategy.sort(data)


class LegacyAdapter:
    def __init__(self):
        self.legacy = Legacy()

    def request(self):
        return self.legacy.specific_request()
"#,
        );
        assert_eq!(classes(&found, PatternKind::Strategy), vec!["Sorter"]);
        assert_eq!(classes(&found, PatternKind::Decorator), vec!["Sorter"]);
        assert_eq!(
            classes(&found, PatternKind::Adapter),
            vec!["Sorter", "LegacyAdapter"]
        );
    }

    #[test]
    fn test_empty_kinds_are_omitted() {
        let found = detect("def f():\n    return 1\n");
        assert!(found.is_empty());
    }

    #[test]
    fn test_syntax_error_yields_nothing() {
        let found = detect("class Broken(:\n    _instance = None\n");
        assert!(found.is_empty());
    }

    #[test]
    fn test_pattern_kind_from_key() {
        assert_eq!(PatternKind::from_key("Factory Method"), Some(PatternKind::FactoryMethod));
        assert_eq!(PatternKind::from_key("OBSERVER"), Some(PatternKind::Observer));
        assert_eq!(PatternKind::from_key("visitor"), None);
    }

    #[test]
    fn test_detect_in_directory_skips_files_without_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plain.py"), "x = 1\n").unwrap();
        std::fs::write(
            dir.path().join("bus.py"),
            "class Bus:\n    def __init__(self):\n        self.observers = []\n",
        )
        .unwrap();

        let found = PatternDetector::new()
            .detect_in_directory(dir.path(), &[], &[])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.keys().next().unwrap().ends_with("bus.py"));
    }
}
