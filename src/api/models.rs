//! Django, Pydantic and SQLAlchemy model classes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tree_sitter::Node;

use crate::parser::{
    class_bases, descendants, dotted_name, first_named_child, line_of, named_children, node_text,
    statements, ParsedSource,
};

/// Models with more fields than this are reported as complex.
pub const COMPLEX_MODEL_FIELDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Django,
    Pydantic,
    SqlAlchemy,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelKind::Django => "django",
            ModelKind::Pydantic => "pydantic",
            ModelKind::SqlAlchemy => "sqlalchemy",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelField {
    pub name: String,
    pub field_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    pub name: String,
    pub kind: ModelKind,
    pub fields: Vec<ModelField>,
    pub file: PathBuf,
    pub line: usize,
}

impl DataModel {
    pub fn is_complex(&self) -> bool {
        self.fields.len() > COMPLEX_MODEL_FIELDS
    }
}

pub fn models_in(parsed: &ParsedSource, file: &Path) -> Vec<DataModel> {
    let source = parsed.source();
    let uses_sqlalchemy = source.contains("sqlalchemy");

    descendants(parsed.root())
        .into_iter()
        .filter(|n| n.kind() == "class_definition")
        .filter_map(|class| {
            let bases = class_bases(class, source);
            let kind = model_kind(&bases, uses_sqlalchemy)?;
            let name = node_text(class.child_by_field_name("name")?, source).to_string();
            let fields = class
                .child_by_field_name("body")
                .map(|body| fields_of(body, kind, source))
                .unwrap_or_default();
            Some(DataModel {
                name,
                kind,
                fields,
                file: file.to_path_buf(),
                line: line_of(class),
            })
        })
        .collect()
}

fn model_kind(bases: &[String], uses_sqlalchemy: bool) -> Option<ModelKind> {
    bases.iter().find_map(|base| match base.as_str() {
        "models.Model" => Some(ModelKind::Django),
        "BaseModel" | "pydantic.BaseModel" => Some(ModelKind::Pydantic),
        "db.Model" => Some(ModelKind::SqlAlchemy),
        "Base" | "DeclarativeBase" if uses_sqlalchemy => Some(ModelKind::SqlAlchemy),
        _ => None,
    })
}

fn fields_of(body: Node<'_>, kind: ModelKind, source: &str) -> Vec<ModelField> {
    statements(body)
        .into_iter()
        .filter(|stmt| stmt.kind() == "expression_statement")
        .filter_map(first_named_child)
        .filter(|expr| expr.kind() == "assignment")
        .filter_map(|assignment| field_of(assignment, kind, source))
        .collect()
}

fn field_of(assignment: Node<'_>, kind: ModelKind, source: &str) -> Option<ModelField> {
    let left = assignment.child_by_field_name("left")?;
    if left.kind() != "identifier" {
        return None;
    }
    let name = node_text(left, source).to_string();
    if name.starts_with('_') || name == "model_config" {
        return None;
    }
    let annotation = assignment.child_by_field_name("type");
    let right = assignment.child_by_field_name("right");

    let field_type = match kind {
        ModelKind::Pydantic => node_text(annotation?, source).to_string(),
        ModelKind::Django => {
            let function = right.filter(|r| r.kind() == "call")?.child_by_field_name("function")?;
            let called = dotted_name(function, source);
            called.strip_prefix("models.")?.to_string()
        }
        ModelKind::SqlAlchemy => match right.filter(|r| r.kind() == "call") {
            Some(call) => column_type(call, source)?,
            None => node_text(annotation?, source).to_string(),
        },
    };
    Some(ModelField { name, field_type })
}

/// `db.Column(db.Integer, ...)` -> `Integer`; `Column(String(50))` -> `String`.
fn column_type(call: Node<'_>, source: &str) -> Option<String> {
    let function = dotted_name(call.child_by_field_name("function")?, source);
    let constructor = function.rsplit('.').next().unwrap_or_default();
    if !matches!(constructor, "Column" | "mapped_column" | "relationship") {
        return None;
    }
    if constructor == "relationship" {
        return Some("relationship".to_string());
    }
    let first = call
        .child_by_field_name("arguments")
        .and_then(|args| named_children(args).into_iter().next())
        .filter(|arg| matches!(arg.kind(), "identifier" | "attribute" | "call"));
    let type_name = match first {
        Some(arg) if arg.kind() == "call" => arg
            .child_by_field_name("function")
            .map(|f| dotted_name(f, source))
            .unwrap_or_default(),
        Some(arg) => dotted_name(arg, source),
        None => constructor.to_string(),
    };
    Some(type_name.rsplit('.').next().unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn models(source: &str) -> Vec<DataModel> {
        let parsed = ParsedSource::parse(source).unwrap();
        models_in(&parsed, Path::new("models.py"))
    }

    fn field_names(model: &DataModel) -> Vec<(&str, &str)> {
        model
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.field_type.as_str()))
            .collect()
    }

    #[test]
    fn test_django_model_fields() {
        let found = models(
            r#"from django.db import models


class Book(models.Model):
    title = models.CharField(max_length=200)
    author = models.ForeignKey("Author", on_delete=models.CASCADE)
    objects = BookManager()

    class Meta:
        ordering = ["title"]


class Helper:
    pass
"#,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Book");
        assert_eq!(found[0].kind, ModelKind::Django);
        assert_eq!(found[0].line, 4);
        assert_eq!(
            field_names(&found[0]),
            vec![("title", "CharField"), ("author", "ForeignKey")]
        );
    }

    #[test]
    fn test_pydantic_model_fields() {
        let found = models(
            "from pydantic import BaseModel\n\nclass Item(BaseModel):\n    name: str\n    price: float = 0.0\n    tags: list[str] = []\n    model_config = {}\n",
        );
        assert_eq!(found[0].kind, ModelKind::Pydantic);
        assert_eq!(
            field_names(&found[0]),
            vec![("name", "str"), ("price", "float"), ("tags", "list[str]")]
        );
    }

    #[test]
    fn test_sqlalchemy_columns() {
        let found = models(
            r#"from sqlalchemy import Column, Integer, String
from sqlalchemy.orm import declarative_base

Base = declarative_base()


class User(Base):
    __tablename__ = "users"
    id = Column(Integer, primary_key=True)
    name = Column(String(50))
    posts = relationship("Post")


class Post(db.Model):
    id = db.Column(db.Integer, primary_key=True)
"#,
        );
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].kind, ModelKind::SqlAlchemy);
        assert_eq!(
            field_names(&found[0]),
            vec![("id", "Integer"), ("name", "String"), ("posts", "relationship")]
        );
        assert_eq!(field_names(&found[1]), vec![("id", "Integer")]);
    }

    #[test]
    fn test_complex_model() {
        let fields: String = (0..11).map(|i| format!("    f{i}: int\n")).collect();
        let found = models(&format!("class Wide(BaseModel):\n{fields}"));
        assert!(found[0].is_complex());
        assert!(!models("class Narrow(BaseModel):\n    a: int\n")[0].is_complex());
    }
}
