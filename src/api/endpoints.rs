//! Route extraction: Flask and FastAPI decorators, Django `urlpatterns`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tree_sitter::Node;

use crate::parser::{
    descendants, dotted_name, first_named_child, line_of, named_children, node_text, string_value,
    ParsedSource,
};
use crate::security::Framework;

const HTTP_METHODS: &[&str] = &["get", "post", "put", "patch", "delete", "options", "head"];
const DJANGO_ROUTE_FUNCTIONS: &[&str] = &["path", "re_path", "url"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Route with a leading slash; router and blueprint prefixes are applied.
    pub path: String,
    /// Upper-case HTTP methods. Empty means the view accepts any method.
    pub methods: Vec<String>,
    pub handler: String,
    pub framework: Framework,
    pub file: PathBuf,
    pub line: usize,
    pub response_model: Option<String>,
    /// HTTP status codes mentioned by the route decorator or the handler body.
    pub status_codes: Vec<u16>,
}

impl Endpoint {
    pub fn methods_label(&self) -> String {
        if self.methods.is_empty() {
            "ANY".to_string()
        } else {
            self.methods.join(", ")
        }
    }

    pub fn allows(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m == method)
    }

    /// True only when the method is listed explicitly.
    pub fn declares(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Path segments that are not parameters.
    pub fn static_segments(&self) -> Vec<&str> {
        self.segments().into_iter().filter(|s| !is_param(s)).collect()
    }

    pub fn param_count(&self) -> usize {
        self.segments().into_iter().filter(|s| is_param(s)).count()
    }

    pub fn location(&self) -> String {
        format!("{}:{}", self.file.display(), self.line)
    }
}

/// `<id>`, `<int:id>`, `{id}` and regex groups such as `(?P<pk>\d+)`.
pub fn is_param(segment: &str) -> bool {
    segment.contains(['<', '{', '('])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppKind {
    Flask,
    FastApi,
}

impl AppKind {
    fn framework(self) -> Framework {
        match self {
            AppKind::Flask => Framework::Flask,
            AppKind::FastApi => Framework::FastApi,
        }
    }
}

/// Every endpoint declared in one module, in source order.
pub fn endpoints_in(parsed: &ParsedSource, file: &Path) -> Vec<Endpoint> {
    let mut endpoints = decorated_routes(parsed, file);
    endpoints.extend(url_patterns(parsed, file));
    endpoints.sort_by_key(|e| e.line);
    endpoints
}

/// Names bound to `Flask(...)`, `Blueprint(...)`, `FastAPI(...)` or
/// `APIRouter(...)`, with their URL prefix.
fn app_objects(parsed: &ParsedSource) -> BTreeMap<String, (AppKind, String)> {
    let source = parsed.source();
    let mut apps = BTreeMap::new();

    for node in descendants(parsed.root()).into_iter().filter(|n| n.kind() == "assignment") {
        let (Some(left), Some(right)) = (node.child_by_field_name("left"), node.child_by_field_name("right"))
        else {
            continue;
        };
        if left.kind() != "identifier" || right.kind() != "call" {
            continue;
        }
        let Some(function) = right.child_by_field_name("function") else {
            continue;
        };
        let constructor = dotted_name(function, source);
        let kind = match constructor.rsplit('.').next().unwrap_or_default() {
            "Flask" | "Blueprint" => AppKind::Flask,
            "FastAPI" | "APIRouter" => AppKind::FastApi,
            _ => continue,
        };
        let prefix = keyword_argument(right, &["url_prefix", "prefix"], source)
            .filter(|v| v.kind() == "string")
            .map(|v| string_value(node_text(v, source)))
            .unwrap_or_default();
        apps.insert(node_text(left, source).to_string(), (kind, prefix));
    }
    apps
}

fn decorated_routes(parsed: &ParsedSource, file: &Path) -> Vec<Endpoint> {
    let source = parsed.source();
    let apps = app_objects(parsed);
    if apps.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for node in descendants(parsed.root())
        .into_iter()
        .filter(|n| n.kind() == "decorated_definition")
    {
        let Some(definition) = node
            .child_by_field_name("definition")
            .filter(|d| d.kind() == "function_definition")
        else {
            continue;
        };
        let handler = definition
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string())
            .unwrap_or_default();

        for decorator in named_children(node).into_iter().filter(|n| n.kind() == "decorator") {
            let Some(call) = first_named_child(decorator).filter(|c| c.kind() == "call") else {
                continue;
            };
            let Some(function) = call
                .child_by_field_name("function")
                .filter(|f| f.kind() == "attribute")
            else {
                continue;
            };
            let (Some(object), Some(attribute)) = (
                function.child_by_field_name("object"),
                function.child_by_field_name("attribute"),
            ) else {
                continue;
            };
            let Some((kind, prefix)) = apps.get(node_text(object, source)) else {
                continue;
            };

            let attr = node_text(attribute, source);
            let methods = match (kind, attr) {
                (AppKind::Flask, "route") | (AppKind::FastApi, "api_route") => {
                    listed_methods(call, source).unwrap_or_else(|| vec!["GET".to_string()])
                }
                (_, method) if HTTP_METHODS.contains(&method) => vec![method.to_uppercase()],
                _ => continue,
            };

            let Some(route) = first_string_argument(call, source)
                .or_else(|| {
                    keyword_argument(call, &["rule", "path"], source)
                        .filter(|v| v.kind() == "string")
                        .map(|v| string_value(node_text(v, source)))
                })
            else {
                continue;
            };

            let response_model = keyword_argument(call, &["response_model"], source)
                .map(|v| dotted_name(v, source));

            out.push(Endpoint {
                path: join_route(prefix, &route),
                methods,
                handler: handler.clone(),
                framework: kind.framework(),
                file: file.to_path_buf(),
                line: line_of(definition),
                response_model,
                status_codes: status_codes(node_text(node, source)),
            });
        }
    }
    out
}

/// `path(...)`, `re_path(...)` and `url(...)` entries of `urlpatterns`.
fn url_patterns(parsed: &ParsedSource, file: &Path) -> Vec<Endpoint> {
    let source = parsed.source();
    let mut out = Vec::new();

    for node in descendants(parsed.root())
        .into_iter()
        .filter(|n| matches!(n.kind(), "assignment" | "augmented_assignment"))
    {
        let (Some(left), Some(right)) = (node.child_by_field_name("left"), node.child_by_field_name("right"))
        else {
            continue;
        };
        if node_text(left, source) != "urlpatterns" || right.kind() != "list" {
            continue;
        }

        for element in named_children(right).into_iter().filter(|n| n.kind() == "call") {
            let Some(function) = element.child_by_field_name("function") else {
                continue;
            };
            let name = dotted_name(function, source);
            if !DJANGO_ROUTE_FUNCTIONS.contains(&name.rsplit('.').next().unwrap_or_default()) {
                continue;
            }

            let args = positional_arguments(element);
            let Some(route) = args
                .first()
                .filter(|a| a.kind() == "string")
                .map(|a| string_value(node_text(*a, source)))
            else {
                continue;
            };
            let handler = args.get(1).map(|view| view_name(*view, source)).unwrap_or_default();
            // Included URLconfs are scanned as their own files.
            if handler == "include(...)" || handler.ends_with(".include(...)") {
                continue;
            }

            out.push(Endpoint {
                path: django_route(&route),
                methods: Vec::new(),
                handler,
                framework: Framework::Django,
                file: file.to_path_buf(),
                line: line_of(element),
                response_model: None,
                status_codes: Vec::new(),
            });
        }
    }
    out
}

fn view_name(view: Node<'_>, source: &str) -> String {
    match view.kind() {
        "call" => view
            .child_by_field_name("function")
            .map(|f| format!("{}(...)", dotted_name(f, source)))
            .unwrap_or_default(),
        _ => dotted_name(view, source),
    }
}

fn positional_arguments(call: Node<'_>) -> Vec<Node<'_>> {
    call.child_by_field_name("arguments")
        .map(|args| {
            named_children(args)
                .into_iter()
                .filter(|n| !matches!(n.kind(), "keyword_argument" | "comment" | "list_splat" | "dictionary_splat"))
                .collect()
        })
        .unwrap_or_default()
}

fn first_string_argument(call: Node<'_>, source: &str) -> Option<String> {
    positional_arguments(call)
        .first()
        .filter(|a| a.kind() == "string")
        .map(|a| string_value(node_text(*a, source)))
}

fn keyword_argument<'t>(call: Node<'t>, names: &[&str], source: &str) -> Option<Node<'t>> {
    let args = call.child_by_field_name("arguments")?;
    named_children(args)
        .into_iter()
        .filter(|n| n.kind() == "keyword_argument")
        .find(|kw| {
            kw.child_by_field_name("name")
                .is_some_and(|n| names.contains(&node_text(n, source)))
        })
        .and_then(|kw| kw.child_by_field_name("value"))
}

/// `methods=["GET", "POST"]`, upper-cased.
fn listed_methods(call: Node<'_>, source: &str) -> Option<Vec<String>> {
    let value = keyword_argument(call, &["methods"], source)?;
    if !matches!(value.kind(), "list" | "tuple" | "set") {
        return None;
    }
    let methods: Vec<String> = named_children(value)
        .into_iter()
        .filter(|n| n.kind() == "string")
        .map(|n| string_value(node_text(n, source)).to_uppercase())
        .collect();
    (!methods.is_empty()).then_some(methods)
}

fn join_route(prefix: &str, route: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let route = if route.starts_with('/') {
        route.to_string()
    } else {
        format!("/{route}")
    };
    if prefix.is_empty() {
        route
    } else if route == "/" {
        prefix.to_string()
    } else {
        format!("{prefix}{route}")
    }
}

/// Django patterns have no leading slash and `re_path` ones are anchored.
fn django_route(pattern: &str) -> String {
    let trimmed = pattern.trim_start_matches('^').trim_end_matches('$');
    join_route("", trimmed)
}

fn status_codes(text: &str) -> Vec<u16> {
    let Ok(re) = Regex::new(r"\b([1-5][0-9]{2})\b") else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect::<BTreeSet<u16>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn endpoints(source: &str) -> Vec<Endpoint> {
        let parsed = ParsedSource::parse(source).unwrap();
        endpoints_in(&parsed, Path::new("app.py"))
    }

    #[test]
    fn test_flask_routes_and_blueprints() {
        let eps = endpoints(
            r#"from flask import Flask, Blueprint

app = Flask(__name__)
admin = Blueprint("admin", __name__, url_prefix="/admin")


@app.route("/users", methods=["GET", "post"])
def users():
    return "", 200


@admin.get("/stats")
def stats():
    return {}


@other.route("/ignored")
def ignored():
    pass
"#,
        );
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].path, "/users");
        assert_eq!(eps[0].methods, vec!["GET", "POST"]);
        assert_eq!(eps[0].handler, "users");
        assert_eq!(eps[0].framework, Framework::Flask);
        assert_eq!(eps[0].line, 8);
        assert_eq!(eps[0].status_codes, vec![200]);

        assert_eq!(eps[1].path, "/admin/stats");
        assert_eq!(eps[1].methods, vec!["GET"]);
    }

    #[test]
    fn test_flask_route_defaults_to_get() {
        let eps = endpoints("from flask import Flask\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    pass\n");
        assert_eq!(eps[0].methods, vec!["GET"]);
        assert_eq!(eps[0].path, "/");
    }

    #[test]
    fn test_fastapi_router_with_prefix() {
        let eps = endpoints(
            r#"from fastapi import APIRouter, FastAPI

app = FastAPI()
router = APIRouter(prefix="/api/v1/items")


@router.post("/", response_model=schemas.Item, status_code=201)
async def create_item(item: ItemIn):
    return item


@app.delete("/items/{item_id}")
def delete_item(item_id: int):
    return None
"#,
        );
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].path, "/api/v1/items");
        assert_eq!(eps[0].methods, vec!["POST"]);
        assert_eq!(eps[0].response_model.as_deref(), Some("schemas.Item"));
        assert_eq!(eps[0].status_codes, vec![201]);
        assert_eq!(eps[0].framework, Framework::FastApi);

        assert_eq!(eps[1].path, "/items/{item_id}");
        assert_eq!(eps[1].param_count(), 1);
        assert_eq!(eps[1].static_segments(), vec!["items"]);
        assert!(eps[1].status_codes.is_empty());
    }

    #[test]
    fn test_django_urlpatterns() {
        let eps = endpoints(
            r#"from django.urls import include, path, re_path
from . import views

urlpatterns = [
    path("books/", views.book_list, name="book-list"),
    path("books/<int:pk>/", views.BookDetail.as_view()),
    re_path(r"^authors/(?P<pk>\d+)/$", author_detail),
    path("api/", include("api.urls")),
]
"#,
        );
        assert_eq!(eps.len(), 3);
        assert_eq!(eps[0].path, "/books/");
        assert_eq!(eps[0].handler, "views.book_list");
        assert_eq!(eps[0].methods_label(), "ANY");
        assert_eq!(eps[1].handler, "views.BookDetail.as_view(...)");
        assert_eq!(eps[2].path, "/authors/(?P<pk>\\d+)/");
        assert_eq!(eps[2].framework, Framework::Django);
        assert_eq!(eps[2].static_segments(), vec!["authors"]);
    }

    #[test]
    fn test_join_route() {
        assert_eq!(join_route("", "users"), "/users");
        assert_eq!(join_route("/api/", "/users"), "/api/users");
        assert_eq!(join_route("/api", "/"), "/api");
    }
}
