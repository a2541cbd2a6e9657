//! Evidence attached to decisions.
//!
//! Evidence points at locations in the scanned text and never carries the
//! matched substring itself: a span record holds only the category, the
//! byte offsets and the detection confidence. Spans found inside a
//! structured payload also carry the JSON pointer of the string they were
//! found in, and their offsets are relative to that string.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{Category, Span};

/// Evidence map of a decision, keyed by category or guard-specific key.
///
/// A `BTreeMap` keeps serialization order stable across runs.
pub type Evidence = BTreeMap<String, Value>;

/// Key under which guard defects are recorded.
pub const DEFECT_KEY: &str = "_defect";

/// One detected span, as recorded in evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub category: Category,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl SpanRecord {
    pub fn at_path(mut self, path: Option<&str>) -> Self {
        self.path = path.map(str::to_string);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "category": self.category.as_str(),
            "start": self.start,
            "end": self.end,
            "confidence": self.confidence,
        });
        if let (Some(path), Some(map)) = (&self.path, value.as_object_mut()) {
            map.insert("path".to_string(), json!(path));
        }
        value
    }
}

impl From<&Span> for SpanRecord {
    fn from(span: &Span) -> Self {
        Self {
            category: span.category.clone(),
            start: span.start,
            end: span.end,
            confidence: span.confidence,
            path: None,
        }
    }
}

/// Convert per-category span records into decision evidence.
pub fn span_evidence(records: &BTreeMap<String, Vec<SpanRecord>>) -> Evidence {
    records
        .iter()
        .map(|(category, spans)| {
            let values = spans.iter().map(SpanRecord::to_value).collect();
            (category.clone(), Value::Array(values))
        })
        .collect()
}

/// Merge `from` into `into`, preserving execution order.
///
/// Arrays stored under the same key are concatenated; any other value under
/// an existing key is replaced by the later one.
pub fn merge_evidence(into: &mut Evidence, from: Evidence) {
    use std::collections::btree_map::Entry;

    for (key, value) in from {
        match into.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => match (slot.get_mut(), value) {
                (Value::Array(existing), Value::Array(more)) => existing.extend(more),
                (existing, value) => *existing = value,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_record_has_no_text() {
        let span = Span::new(12, 32, Category::Email, 0.95);
        let value = SpanRecord::from(&span).to_value();
        assert_eq!(
            value,
            json!({"category": "email", "start": 12, "end": 32, "confidence": 0.95})
        );
    }

    #[test]
    fn test_span_record_path() {
        let span = Span::new(0, 10, Category::Phone, 0.8);
        let value = SpanRecord::from(&span).at_path(Some("/phone")).to_value();
        assert_eq!(
            value,
            json!({"category": "phone", "start": 0, "end": 10, "confidence": 0.8, "path": "/phone"})
        );
    }

    #[test]
    fn test_merge_concatenates_arrays() {
        let mut into = Evidence::new();
        into.insert("email".into(), json!([{"start": 0}]));
        into.insert("char_count".into(), json!(10));

        let mut from = Evidence::new();
        from.insert("email".into(), json!([{"start": 20}]));
        from.insert("char_count".into(), json!(12));
        from.insert("phone".into(), json!([{"start": 40}]));

        merge_evidence(&mut into, from);

        assert_eq!(into["email"], json!([{"start": 0}, {"start": 20}]));
        assert_eq!(into["char_count"], json!(12));
        assert_eq!(into["phone"], json!([{"start": 40}]));
    }
}
