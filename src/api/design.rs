//! RESTful design checks over extracted endpoints.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use super::endpoints::{is_param, Endpoint};
use crate::suggestions::Severity;

const VERBS: &[&str] = &["get", "create", "update", "delete", "add", "remove", "list", "fetch"];
const MUTATING_WORDS: &[&str] = &["create", "update", "delete", "modify", "remove"];
const MAX_RESOURCE_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignIssue {
    pub kind: String,
    pub severity: Severity,
    /// Route the issue was found on; `None` for project-wide issues.
    pub endpoint: Option<String>,
    pub description: String,
    pub suggestion: String,
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
}

impl DesignIssue {
    fn project(kind: &str, severity: Severity, description: String, suggestion: &str) -> Self {
        Self {
            kind: kind.to_string(),
            severity,
            endpoint: None,
            description,
            suggestion: suggestion.to_string(),
            file: None,
            line: None,
        }
    }

    fn at(endpoint: &Endpoint, kind: &str, severity: Severity, description: String, suggestion: &str) -> Self {
        Self {
            kind: kind.to_string(),
            severity,
            endpoint: Some(endpoint.path.clone()),
            description,
            suggestion: suggestion.to_string(),
            file: Some(endpoint.file.clone()),
            line: Some(endpoint.line),
        }
    }

    pub fn location(&self) -> String {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{}:{line}", file.display()),
            _ => "project".to_string(),
        }
    }
}

/// Every design issue for a set of endpoints, endpoint checks first.
pub fn review_design(endpoints: &[Endpoint]) -> Vec<DesignIssue> {
    let mut issues = Vec::new();
    for endpoint in endpoints {
        check_naming(endpoint, &mut issues);
        check_methods(endpoint, &mut issues);
        check_hierarchy(endpoint, &mut issues);
        check_status_codes(endpoint, &mut issues);
    }
    check_resource_names(endpoints, &mut issues);
    check_conflicts(endpoints, &mut issues);
    check_trailing_slashes(endpoints, &mut issues);
    check_versioning(endpoints, &mut issues);
    issues
}

/// 100 minus 15, 10 and 5 points per high, medium and low issue.
pub fn design_score(issues: &[DesignIssue]) -> u32 {
    let penalty: u32 = issues
        .iter()
        .map(|issue| match issue.severity {
            Severity::High => 15,
            Severity::Medium => 10,
            Severity::Low => 5,
        })
        .sum();
    100u32.saturating_sub(penalty)
}

/// `get`, `getUser`, `get_user` and `get-user` start with a verb; `getaway`
/// does not.
fn verb_prefix(segment: &str) -> Option<&'static str> {
    VERBS.iter().copied().find(|verb| {
        let Some(prefix) = segment.get(..verb.len()) else {
            return false;
        };
        if !prefix.eq_ignore_ascii_case(verb) {
            return false;
        }
        match segment[verb.len()..].chars().next() {
            None => true,
            Some(c) => c == '_' || c == '-' || c.is_uppercase(),
        }
    })
}

fn is_version(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some('v' | 'V'))
        && chars.clone().next().is_some()
        && chars.all(|c| c.is_ascii_digit())
}

fn check_naming(endpoint: &Endpoint, issues: &mut Vec<DesignIssue>) {
    let statics = endpoint.static_segments();

    if let Some((segment, verb)) = statics.iter().find_map(|s| verb_prefix(s).map(|v| (*s, v))) {
        issues.push(DesignIssue::at(
            endpoint,
            "endpoint_naming",
            Severity::Medium,
            format!("Path segment '{segment}' is a verb ('{verb}')"),
            "Name resources with nouns and let the HTTP method carry the action.",
        ));
    }

    if statics.iter().any(|s| s.contains('_')) {
        issues.push(DesignIssue::at(
            endpoint,
            "endpoint_naming",
            Severity::Low,
            "Path uses snake_case".to_string(),
            "Use kebab-case in URLs (user-profiles, not user_profiles).",
        ));
    }

    if statics.iter().any(|s| s.chars().any(|c| c.is_uppercase())) {
        issues.push(DesignIssue::at(
            endpoint,
            "endpoint_naming",
            Severity::Low,
            "Path contains upper-case letters".to_string(),
            "Keep URLs lower-case.",
        ));
    }

    let segments = endpoint.segments();
    let singular = segments.windows(2).find_map(|pair| {
        let (resource, next) = (pair[0], pair[1]);
        let collection_like = !is_param(resource)
            && is_param(next)
            && !resource.ends_with('s')
            && !is_version(resource)
            && resource != "api";
        collection_like.then_some(resource)
    });
    if let Some(resource) = singular {
        issues.push(DesignIssue::at(
            endpoint,
            "endpoint_naming",
            Severity::Low,
            format!("Collection '{resource}' is singular"),
            "Use plural nouns for collections (/users/{id}).",
        ));
    }
}

fn check_methods(endpoint: &Endpoint, issues: &mut Vec<DesignIssue>) {
    let route = endpoint.static_segments().join("/").to_lowercase();

    if endpoint.declares("GET") {
        if let Some(word) = MUTATING_WORDS.iter().find(|w| route.contains(**w)) {
            issues.push(DesignIssue::at(
                endpoint,
                "http_method",
                Severity::High,
                format!("GET endpoint changes state ('{word}' in the path)"),
                "GET must be safe; use POST, PUT, PATCH or DELETE for changes.",
            ));
        }
    }

    if endpoint.declares("POST") && route.contains("update") {
        issues.push(DesignIssue::at(
            endpoint,
            "http_method",
            Severity::Medium,
            "POST used for an update".to_string(),
            "Use PUT or PATCH to update an existing resource.",
        ));
    }

    if route.contains("delete") && !endpoint.methods.is_empty() && !endpoint.declares("DELETE") {
        issues.push(DesignIssue::at(
            endpoint,
            "http_method",
            Severity::Medium,
            format!("Deletion exposed through {}", endpoint.methods_label()),
            "Use the DELETE method on the resource path.",
        ));
    }

    if endpoint.methods.is_empty() {
        return;
    }
    let handler_words: Vec<String> = endpoint
        .handler
        .split('_')
        .map(|w| w.to_lowercase())
        .collect();
    let mismatch = ["get", "post", "put", "delete"].into_iter().find(|method| {
        handler_words.iter().any(|w| w == method) && !endpoint.declares(&method.to_uppercase())
    });
    if let Some(method) = mismatch {
        issues.push(DesignIssue::at(
            endpoint,
            "method_mismatch",
            Severity::Low,
            format!(
                "Handler '{}' suggests {} but the route accepts {}",
                endpoint.handler,
                method.to_uppercase(),
                endpoint.methods_label()
            ),
            "Rename the handler or fix the route methods.",
        ));
    }
}

fn check_hierarchy(endpoint: &Endpoint, issues: &mut Vec<DesignIssue>) {
    let depth = endpoint
        .static_segments()
        .into_iter()
        .filter(|s| *s != "api" && !is_version(s))
        .count();
    if depth > MAX_RESOURCE_DEPTH {
        issues.push(DesignIssue::at(
            endpoint,
            "resource_hierarchy",
            Severity::Medium,
            format!("Resource nesting is {depth} levels deep"),
            "Keep nesting to parent/child; expose deeper resources at the top level.",
        ));
    }
}

fn check_status_codes(endpoint: &Endpoint, issues: &mut Vec<DesignIssue>) {
    let creates = endpoint.path.to_lowercase().contains("create")
        || endpoint.handler.to_lowercase().contains("create");
    if endpoint.declares("POST") && creates && !endpoint.status_codes.contains(&201) {
        issues.push(DesignIssue::at(
            endpoint,
            "status_code",
            Severity::Low,
            "Create endpoint does not return 201".to_string(),
            "Return 201 Created with the new resource or its location.",
        ));
    }
    if endpoint.declares("DELETE") && !endpoint.status_codes.contains(&204) {
        issues.push(DesignIssue::at(
            endpoint,
            "status_code",
            Severity::Low,
            "Delete endpoint does not return 204".to_string(),
            "Return 204 No Content after a successful delete.",
        ));
    }
}

fn check_resource_names(endpoints: &[Endpoint], issues: &mut Vec<DesignIssue>) {
    let names: BTreeSet<String> = endpoints
        .iter()
        .flat_map(|e| e.static_segments())
        .filter(|s| *s != "api" && !is_version(s))
        .map(str::to_lowercase)
        .collect();

    for name in &names {
        let plural = match name.strip_suffix('y') {
            Some(stem) if !stem.is_empty() => format!("{stem}ies"),
            _ => format!("{name}s"),
        };
        if names.contains(&plural) {
            issues.push(DesignIssue::project(
                "resource_naming",
                Severity::Medium,
                format!("Both '{name}' and '{plural}' are used as resource names"),
                "Pick the plural form and use it everywhere.",
            ));
        }
    }
}

/// Same route shape with an overlapping method.
fn check_conflicts(endpoints: &[Endpoint], issues: &mut Vec<DesignIssue>) {
    let mut by_shape: BTreeMap<String, Vec<&Endpoint>> = BTreeMap::new();
    for endpoint in endpoints {
        let shape: Vec<&str> = endpoint
            .segments()
            .into_iter()
            .map(|s| if is_param(s) { "{}" } else { s })
            .collect();
        by_shape.entry(shape.join("/")).or_default().push(endpoint);
    }

    for group in by_shape.values() {
        for (i, first) in group.iter().enumerate() {
            for second in &group[i + 1..] {
                let overlap = first.methods.is_empty()
                    || second.methods.is_empty()
                    || first.methods.iter().any(|m| second.declares(m));
                if overlap {
                    issues.push(DesignIssue::at(
                        second,
                        "path_conflict",
                        Severity::Medium,
                        format!(
                            "'{}' ({}) shadows '{}' at {}",
                            second.path,
                            second.handler,
                            first.path,
                            first.location()
                        ),
                        "Give each route a distinct path or method.",
                    ));
                }
            }
        }
    }
}

fn check_trailing_slashes(endpoints: &[Endpoint], issues: &mut Vec<DesignIssue>) {
    let (with, without): (Vec<&Endpoint>, Vec<&Endpoint>) = endpoints
        .iter()
        .filter(|e| e.path != "/")
        .partition(|e| e.path.ends_with('/'));
    if !with.is_empty() && !without.is_empty() {
        issues.push(DesignIssue::project(
            "trailing_slash",
            Severity::Low,
            format!(
                "{} route(s) end with a slash and {} do not",
                with.len(),
                without.len()
            ),
            "Use one trailing-slash convention for every route.",
        ));
    }
}

fn check_versioning(endpoints: &[Endpoint], issues: &mut Vec<DesignIssue>) {
    if endpoints.is_empty() {
        return;
    }
    let versioned = endpoints
        .iter()
        .any(|e| e.segments().into_iter().any(is_version));
    if !versioned {
        issues.push(DesignIssue::project(
            "versioning",
            Severity::Low,
            "No API version in any route".to_string(),
            "Prefix routes with a version such as /api/v1.",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Framework;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn endpoint(path: &str, methods: &[&str], handler: &str) -> Endpoint {
        Endpoint {
            path: path.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            handler: handler.to_string(),
            framework: Framework::Flask,
            file: Path::new("app.py").to_path_buf(),
            line: 1,
            response_model: None,
            status_codes: Vec::new(),
        }
    }

    fn kinds_for(issues: &[DesignIssue], path: &str) -> Vec<(String, Severity)> {
        issues
            .iter()
            .filter(|i| i.endpoint.as_deref() == Some(path))
            .map(|i| (i.kind.clone(), i.severity))
            .collect()
    }

    #[test]
    fn test_verb_prefix() {
        assert_eq!(verb_prefix("getUser"), Some("get"));
        assert_eq!(verb_prefix("delete-item"), Some("delete"));
        assert_eq!(verb_prefix("list"), Some("list"));
        assert_eq!(verb_prefix("getaway"), None);
        assert_eq!(verb_prefix("users"), None);
        assert_eq!(verb_prefix("ge"), None);
    }

    #[test]
    fn test_is_version() {
        assert!(is_version("v1"));
        assert!(is_version("V12"));
        assert!(!is_version("v"));
        assert!(!is_version("videos"));
    }

    #[test]
    fn test_clean_api_has_no_issues() {
        let mut create = endpoint("/api/v1/users", &["POST"], "create_user");
        create.status_codes = vec![201];
        let mut remove = endpoint("/api/v1/users/<int:id>", &["DELETE"], "remove_user");
        remove.status_codes = vec![204];
        let endpoints = vec![
            endpoint("/api/v1/users", &["GET"], "list_users"),
            create,
            endpoint("/api/v1/users/<int:id>", &["GET"], "show_user"),
            remove,
        ];
        let issues = review_design(&endpoints);
        assert_eq!(issues, Vec::new());
        assert_eq!(design_score(&issues), 100);
    }

    #[test]
    fn test_verb_and_unsafe_get() {
        let endpoints = vec![endpoint("/v1/deleteUser/<id>", &["GET"], "delete_user")];
        let issues = review_design(&endpoints);
        assert_eq!(
            kinds_for(&issues, "/v1/deleteUser/<id>"),
            vec![
                ("endpoint_naming".to_string(), Severity::Medium),
                ("endpoint_naming".to_string(), Severity::Low),
                ("endpoint_naming".to_string(), Severity::Low),
                ("http_method".to_string(), Severity::High),
                ("http_method".to_string(), Severity::Medium),
                ("method_mismatch".to_string(), Severity::Low),
            ]
        );
        // 10 + 5 + 5 + 15 + 10 + 5
        assert_eq!(design_score(&issues), 50);
    }

    #[test]
    fn test_snake_case_and_depth() {
        let endpoints = vec![endpoint(
            "/api/v2/orgs/<id>/teams/<tid>/members/<mid>/user_roles",
            &["GET"],
            "roles",
        )];
        let issues = review_design(&endpoints);
        let kinds: Vec<&str> = issues.iter().map(|i| i.kind.as_str()).collect();
        assert_eq!(kinds, vec!["endpoint_naming", "resource_hierarchy"]);
        assert_eq!(issues[1].description, "Resource nesting is 4 levels deep");
    }

    #[test]
    fn test_project_wide_checks() {
        let endpoints = vec![
            endpoint("/category/<id>", &["GET"], "show_category"),
            endpoint("/categories/", &["GET"], "categories"),
            endpoint("/categories/", &["GET"], "categories_again"),
        ];
        let issues = review_design(&endpoints);
        let kinds: Vec<&str> = issues.iter().map(|i| i.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "endpoint_naming",
                "resource_naming",
                "path_conflict",
                "trailing_slash",
                "versioning"
            ]
        );
        assert_eq!(issues[2].endpoint.as_deref(), Some("/categories/"));
        assert!(issues[2].description.contains("categories_again"));
        assert_eq!(issues[4].location(), "project");
    }

    #[test]
    fn test_conflicts_need_a_shared_method() {
        let endpoints = vec![
            endpoint("/v1/items/<id>", &["GET"], "show"),
            endpoint("/v1/items/{item_id}", &["PUT"], "replace"),
        ];
        assert!(review_design(&endpoints).iter().all(|i| i.kind != "path_conflict"));

        let endpoints = vec![
            endpoint("/v1/items/<id>", &["GET"], "show"),
            endpoint("/v1/items/{item_id}", &[], "any"),
        ];
        assert!(review_design(&endpoints).iter().any(|i| i.kind == "path_conflict"));
    }

    #[test]
    fn test_score_saturates() {
        let issues: Vec<DesignIssue> = (0..8)
            .map(|_| DesignIssue::project("x", Severity::High, String::new(), ""))
            .collect();
        assert_eq!(design_score(&issues), 0);
    }
}
