//! Turning free-form model answers into structured data.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// A refactoring suggestion as proposed by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSuggestion {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub location: String,
    pub recommendation: String,
    pub code_example: String,
}

const FALLBACK_LIMIT: usize = 500;

/// First fenced block tagged `lang`, with surrounding whitespace trimmed.
pub fn extract_code_block(text: &str, lang: &str) -> Option<String> {
    let pattern = format!(r"(?s)```{}[ \t]*\r?\n?(.*?)```", regex::escape(lang));
    let re = Regex::new(&pattern).ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Extract structured suggestions from a model answer.
///
/// A ```json block wins (an array, an object with `suggestions`, or a single
/// object). Otherwise the answer is split on `## Suggestion N` headings, then
/// on `Suggestion N:` markers. If nothing matches, the whole answer becomes
/// one "General Refactoring" suggestion. Duplicates by type and description
/// are dropped and ids are renumbered from 1.
pub fn parse_refactoring_suggestions(text: &str) -> Vec<LlmSuggestion> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut suggestions = extract_code_block(text, "json")
        .and_then(|block| serde_json::from_str::<Value>(&block).ok())
        .map(suggestions_from_json)
        .unwrap_or_default();

    if suggestions.is_empty() {
        suggestions = suggestions_from_sections(text);
    }

    if suggestions.is_empty() {
        let mut recommendation: String = text.chars().take(FALLBACK_LIMIT).collect();
        if text.chars().count() > FALLBACK_LIMIT {
            recommendation.push_str("...");
        }
        suggestions.push(LlmSuggestion {
            id: 1,
            kind: "General Refactoring".to_string(),
            description: "Refactoring advice from the LLM".to_string(),
            location: "Entire file".to_string(),
            recommendation,
            code_example: String::new(),
        });
    }

    let mut seen = HashSet::new();
    suggestions.retain(|s| seen.insert(format!("{}|{}", s.kind, s.description)));
    for (i, suggestion) in suggestions.iter_mut().enumerate() {
        suggestion.id = i as u32 + 1;
    }
    suggestions
}

fn suggestions_from_json(value: Value) -> Vec<LlmSuggestion> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("suggestions") {
            Some(Value::Array(items)) => items,
            Some(_) => Vec::new(),
            None => vec![Value::Object(map)],
        },
        _ => Vec::new(),
    };

    items
        .iter()
        .filter(|item| item.is_object())
        .enumerate()
        .map(|(i, item)| LlmSuggestion {
            id: i as u32 + 1,
            kind: json_field(item, &["type", "kind", "refactoring_type"], "Unknown"),
            description: json_field(item, &["description", "issue"], ""),
            location: json_field(item, &["location", "lines", "line"], ""),
            recommendation: json_field(item, &["recommendation", "suggestion", "details"], ""),
            code_example: json_field(item, &["code_example", "code", "example"], ""),
        })
        .collect()
}

fn json_field(item: &Value, names: &[&str], default: &str) -> String {
    names
        .iter()
        .find_map(|name| item.get(*name))
        .map(|v| match v {
            Value::String(s) => s.trim().to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn suggestions_from_sections(text: &str) -> Vec<LlmSuggestion> {
    let heading = Regex::new(r"(?m)^\s*#{1,4}\s*Suggestion\s+(\d+)[^\n]*$");
    let inline = Regex::new(r"Suggestion\s+(\d+):");

    for re in [heading, inline].into_iter().flatten() {
        let starts: Vec<(usize, usize, u32)> = re
            .captures_iter(text)
            .filter_map(|c| {
                let whole = c.get(0)?;
                let number = c.get(1)?.as_str().parse().ok()?;
                Some((whole.start(), whole.end(), number))
            })
            .collect();
        if starts.is_empty() {
            continue;
        }

        return starts
            .iter()
            .enumerate()
            .map(|(i, &(_, body_start, number))| {
                let body_end = starts.get(i + 1).map_or(text.len(), |next| next.0);
                parse_section(number, &text[body_start..body_end])
            })
            .collect();
    }

    Vec::new()
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Type,
    Description,
    Location,
    Recommendation,
}

fn field_heading(line: &str) -> Option<(Field, String)> {
    let stripped = line
        .trim()
        .trim_start_matches('#')
        .trim_start_matches(['-', '*', ' '])
        .trim();

    let fields = [
        ("type", Field::Type),
        ("description", Field::Description),
        ("location", Field::Location),
        ("recommendation", Field::Recommendation),
    ];
    for (name, field) in fields {
        let matches = stripped
            .get(..name.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(name));
        if matches {
            let after = stripped[name.len()..].trim_start_matches('*').trim_start();
            // "Type" alone or "Type: ..." - not a sentence that merely starts with the word.
            if after.is_empty() || after.starts_with(':') {
                let value = after.trim_start_matches(':').trim().trim_matches('*').trim();
                return Some((field, value.to_string()));
            }
        }
    }
    None
}

fn parse_section(number: u32, body: &str) -> LlmSuggestion {
    let mut values: [Vec<String>; 4] = Default::default();
    let mut current: Option<Field> = None;
    let mut in_code = false;

    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
            current = None;
            continue;
        }
        if in_code {
            continue;
        }
        if let Some((field, inline)) = field_heading(line) {
            current = Some(field);
            if !inline.is_empty() {
                values[field as usize].push(inline);
            }
            continue;
        }
        if let Some(field) = current {
            let slot = &mut values[field as usize];
            if line.trim().is_empty() {
                if !slot.is_empty() {
                    current = None;
                }
                continue;
            }
            slot.push(line.trim().to_string());
        }
    }

    let joined = |field: Field| values[field as usize].join("\n");
    let kind = joined(Field::Type);

    LlmSuggestion {
        id: number,
        kind: if kind.is_empty() { "Unknown".to_string() } else { kind },
        description: joined(Field::Description),
        location: joined(Field::Location),
        recommendation: joined(Field::Recommendation),
        code_example: extract_code_block(body, "python").unwrap_or_default(),
    }
}

/// Line range mentioned in a location string: "line 12", "lines 12-20",
/// "L5", "12 to 18".
pub fn parse_line_range(location: &str) -> Option<(usize, Option<usize>)> {
    let re = Regex::new(r"(?i)(?:\blines?\b|\bL)\s*(\d+)(?:\s*(?:-|–|to)\s*(\d+))?").ok()?;
    let bare = Regex::new(r"(\d+)(?:\s*(?:-|–|to)\s*(\d+))?").ok()?;

    let caps = re.captures(location).or_else(|| bare.captures(location))?;
    let start = caps.get(1)?.as_str().parse().ok()?;
    let end = caps.get(2).and_then(|m| m.as_str().parse().ok());
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_code_block() {
        let text = "Here:\n```python\ndef f():\n    return 1\n```\nDone";
        assert_eq!(
            extract_code_block(text, "python").unwrap(),
            "def f():\n    return 1"
        );
        assert!(extract_code_block("no code here", "python").is_none());
    }

    #[test]
    fn test_parse_json_block() {
        let text = r#"```json
{"suggestions": [
  {"type": "Extract Method", "description": "long function", "location": "lines 3-9", "recommendation": "split it"},
  {"type": "Extract Method", "description": "long function", "location": "lines 3-9", "recommendation": "dupe"}
]}
```"#;
        let suggestions = parse_refactoring_suggestions(text);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, "Extract Method");
        assert_eq!(suggestions[0].location, "lines 3-9");
        assert_eq!(suggestions[0].id, 1);
    }

    #[test]
    fn test_parse_markdown_sections() {
        let text = r#"Some intro.

## Suggestion 1
### Type
Extract Method

### Description
`process` does too much.

### Location
Lines 10-25

### Recommendation
Move validation into its own function.

```python
def validate(data):
    return bool(data)
```

## Suggestion 2
### Type
Rename Variable

### Description
`x` is unclear.

### Location
line 4

### Recommendation
Call it `total`.
"#;
        let suggestions = parse_refactoring_suggestions(text);
        assert_eq!(suggestions.len(), 2);

        let first = &suggestions[0];
        assert_eq!(first.kind, "Extract Method");
        assert_eq!(first.description, "`process` does too much.");
        assert_eq!(first.location, "Lines 10-25");
        assert_eq!(first.recommendation, "Move validation into its own function.");
        assert_eq!(first.code_example, "def validate(data):\n    return bool(data)");

        assert_eq!(suggestions[1].kind, "Rename Variable");
        assert_eq!(suggestions[1].id, 2);
        assert_eq!(suggestions[1].code_example, "");
    }

    #[test]
    fn test_parse_inline_markers() {
        let text = "Suggestion 1:\nType: Simplify Conditional\nDescription: nested ifs\nLocation: line 7\nRecommendation: use guard clauses\n\nSuggestion 2:\nType: Add Docstring\nDescription: missing docs\n";
        let suggestions = parse_refactoring_suggestions(text);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].kind, "Simplify Conditional");
        assert_eq!(suggestions[0].recommendation, "use guard clauses");
        assert_eq!(suggestions[1].description, "missing docs");
    }

    #[test]
    fn test_fallback_truncates() {
        let text = "x".repeat(600);
        let suggestions = parse_refactoring_suggestions(&text);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, "General Refactoring");
        assert_eq!(suggestions[0].recommendation.len(), 503);
        assert!(suggestions[0].recommendation.ends_with("..."));
    }

    #[test]
    fn test_empty_response_yields_nothing() {
        assert!(parse_refactoring_suggestions("   ").is_empty());
    }

    #[test]
    fn test_non_ascii_field_lines() {
        let text = "## Suggestion 1\nTypeİİİİİİ\nDescription: x\n";
        let suggestions = parse_refactoring_suggestions(text);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, "Unknown");
        assert_eq!(suggestions[0].description, "x");

        let text = "## Suggestion 1\nTYPE: İnline Temp\n\nDescrİption: ß\nLocation: ünder line 3\n";
        let suggestions = parse_refactoring_suggestions(text);
        assert_eq!(suggestions[0].kind, "İnline Temp");
        assert_eq!(suggestions[0].description, "");
        assert_eq!(suggestions[0].location, "ünder line 3");
    }

    #[test]
    fn test_parse_line_range() {
        assert_eq!(parse_line_range("Lines 12-20"), Some((12, Some(20))));
        assert_eq!(parse_line_range("line 7 in process()"), Some((7, None)));
        assert_eq!(parse_line_range("L5"), Some((5, None)));
        assert_eq!(parse_line_range("function foo (30 to 42)"), Some((30, Some(42))));
        assert_eq!(parse_line_range("entire file"), None);
    }
}
