//! Canonical record shape for every externally supplied catalog payload.
//!
//! Sources deliver records as bare path strings, `[path, name]` pairs,
//! `[path, name, tags]` triples, or `{path, name, tags}` objects. All shape
//! detection lives in [`normalize_record`]; everything downstream sees a
//! [`RawRecord`].

use serde_json::Value;

use crate::error::{ArtError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub path: String,
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl RawRecord {
    pub fn new(path: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            path: path.into(),
            name: name.map(str::to_string),
            tags: None,
        }
    }
}

fn non_empty_text(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn parse_tags(value: Option<&Value>) -> Option<Vec<String>> {
    let tags: Vec<String> = match value? {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    if tags.is_empty() {
        None
    } else {
        Some(tags)
    }
}

/// Converts one heterogeneous source record into a [`RawRecord`].
/// Returns `None` for shapes that carry no usable path.
pub fn normalize_record(value: &Value) -> Option<RawRecord> {
    match value {
        Value::String(_) => Some(RawRecord {
            path: non_empty_text(Some(value))?,
            name: None,
            tags: None,
        }),
        Value::Array(parts) => Some(RawRecord {
            path: non_empty_text(parts.first())?,
            name: non_empty_text(parts.get(1)),
            tags: parse_tags(parts.get(2)),
        }),
        Value::Object(fields) => Some(RawRecord {
            path: non_empty_text(fields.get("path"))?,
            name: non_empty_text(fields.get("name")),
            tags: parse_tags(fields.get("tags")),
        }),
        _ => None,
    }
}

/// Parsed bulk catalog: either one flat array or arrays keyed by the
/// source's own category label.
pub struct CatalogDocument {
    root: Value,
}

impl CatalogDocument {
    pub fn parse(body: &str) -> Result<Self> {
        if body.trim().is_empty() {
            return Err(ArtError::EmptyPayload("catalog body is empty".to_string()));
        }
        let root: Value = serde_json::from_str(body)?;
        match &root {
            Value::Array(_) | Value::Object(_) => Ok(Self { root }),
            other => Err(ArtError::MalformedPayload(format!(
                "expected a JSON array or object at the top level, found {}",
                json_type_name(other)
            ))),
        }
    }

    /// Raw entries paired with their source category label, in document order.
    pub fn entries(&self) -> Box<dyn Iterator<Item = (Option<&str>, &Value)> + '_> {
        match &self.root {
            Value::Array(items) => Box::new(items.iter().map(|item| (None, item))),
            Value::Object(groups) => Box::new(groups.iter().flat_map(|(label, group)| {
                let items: &[Value] = match group {
                    Value::Array(items) => items.as_slice(),
                    _ => &[],
                };
                items.iter().map(move |item| (Some(label.as_str()), item))
            })),
            _ => Box::new(std::iter::empty()),
        }
    }

    pub fn entry_count(&self) -> usize {
        match &self.root {
            Value::Array(items) => items.len(),
            Value::Object(groups) => groups
                .values()
                .map(|group| group.as_array().map(Vec::len).unwrap_or(0))
                .sum(),
            _ => 0,
        }
    }
}

/// Records of a per-term search response: a bare array or `{"results": [...]}`.
pub fn parse_term_response(body: &str) -> Result<Vec<RawRecord>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let root: Value = serde_json::from_str(body)?;
    let items = match &root {
        Value::Array(items) => items,
        Value::Object(fields) => match fields.get("results") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ArtError::MalformedPayload(
                    "term search response has no results array".to_string(),
                ))
            }
        },
        other => {
            return Err(ArtError::MalformedPayload(format!(
                "unexpected term search response: {}",
                json_type_name(other)
            )))
        }
    };
    Ok(items.iter().filter_map(normalize_record).collect())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{normalize_record, parse_term_response, CatalogDocument, RawRecord};
    use crate::error::ErrorKind;

    #[test]
    fn test_normalize_record_accepts_every_shape() {
        assert_eq!(
            normalize_record(&json!("tokens/orc.webp")),
            Some(RawRecord::new("tokens/orc.webp", None))
        );
        assert_eq!(
            normalize_record(&json!(["tokens/orc.webp", "Orc"])),
            Some(RawRecord::new("tokens/orc.webp", Some("Orc")))
        );
        let triple = normalize_record(&json!(["tokens/orc.webp", "Orc", ["green", "brute"]]))
            .expect("triple should normalize");
        assert_eq!(
            triple.tags,
            Some(vec!["green".to_string(), "brute".to_string()])
        );
        let object = normalize_record(&json!({"path": "a.png", "name": "", "tags": "x, y"}))
            .expect("object should normalize");
        assert_eq!(object.name, None);
        assert_eq!(object.tags, Some(vec!["x".to_string(), "y".to_string()]));
    }

    #[test]
    fn test_normalize_record_rejects_pathless_shapes() {
        assert_eq!(normalize_record(&json!("  ")), None);
        assert_eq!(normalize_record(&json!([])), None);
        assert_eq!(normalize_record(&json!([3, "Orc"])), None);
        assert_eq!(normalize_record(&json!(12)), None);
    }

    #[test]
    fn test_document_entries_carry_source_labels() {
        let doc = CatalogDocument::parse(r#"{"Humanoid": ["a.webp", ["b.webp", "B"]], "junk": 4}"#)
            .expect("document should parse");
        let labels: Vec<Option<&str>> = doc.entries().map(|(label, _)| label).collect();
        assert_eq!(labels, vec![Some("Humanoid"), Some("Humanoid")]);
        assert_eq!(doc.entry_count(), 2);
    }

    #[test]
    fn test_document_entries_follow_label_order_in_body() {
        let doc = CatalogDocument::parse(r#"{"Undead": ["z.webp"], "Beast": ["b.webp"], "Aberration": ["a.webp"]}"#)
            .expect("document should parse");
        let labels: Vec<Option<&str>> = doc.entries().map(|(label, _)| label).collect();
        assert_eq!(labels, vec![Some("Undead"), Some("Beast"), Some("Aberration")]);
    }

    #[test]
    fn test_document_parse_errors_are_classified() {
        let empty = CatalogDocument::parse("   ").err().expect("empty body");
        assert_eq!(empty.kind(), ErrorKind::EmptyPayload);
        let malformed = CatalogDocument::parse("[1, 2").err().expect("bad json");
        assert_eq!(malformed.kind(), ErrorKind::MalformedPayload);
        let scalar = CatalogDocument::parse("42").err().expect("scalar root");
        assert_eq!(scalar.kind(), ErrorKind::MalformedPayload);
    }

    #[test]
    fn test_parse_term_response_accepts_wrapped_results() {
        let records = parse_term_response(r#"{"results": [["tokens/wolf.webp", "Wolf"], 7]}"#)
            .expect("wrapped results should parse");
        assert_eq!(records, vec![RawRecord::new("tokens/wolf.webp", Some("Wolf"))]);
        assert!(parse_term_response("").expect("empty body").is_empty());
    }
}
