//! Span redaction.
//!
//! Applies a [`RedactionMode`] to detected spans. Spans are spliced from the
//! end of the text backwards so earlier offsets stay valid; evidence is
//! recorded in ascending start order and never holds the replaced text.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detector::SpanDetector;
use crate::error::ConfigurationError;
use crate::evidence::SpanRecord;
use crate::patterns::mask;
use crate::types::{rewrite_text_leaves, Span};

/// How a detected span is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionMode {
    /// Category-specific partial reveal, e.g. `j***@***.com`
    #[default]
    Mask,
    /// Delete the span
    Remove,
    /// Replace with `[CATEGORY_REMOVED]`
    Placeholder,
}

impl RedactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionMode::Mask => "mask",
            RedactionMode::Remove => "remove",
            RedactionMode::Placeholder => "placeholder",
        }
    }
}

impl FromStr for RedactionMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mask" => Ok(RedactionMode::Mask),
            "remove" => Ok(RedactionMode::Remove),
            "placeholder" => Ok(RedactionMode::Placeholder),
            other => Err(ConfigurationError::invalid(
                "redaction mode",
                format!("expected mask, remove or placeholder, got '{}'", other),
            )),
        }
    }
}

/// Redacted text plus per-category span records.
#[derive(Debug, Clone, PartialEq)]
pub struct Redacted {
    pub text: String,
    pub evidence: BTreeMap<String, Vec<SpanRecord>>,
}

impl Redacted {
    pub fn span_count(&self) -> usize {
        self.evidence.values().map(Vec::len).sum()
    }
}

/// Rewrite every span of `text` according to `mode`.
///
/// Spans must be sorted and non-overlapping, as returned by the detector.
/// Spans that do not fall on char boundaries of `text` are skipped.
pub fn redact(text: &str, spans: &[Span], mode: RedactionMode) -> Redacted {
    let mut output = text.to_string();
    let mut evidence: BTreeMap<String, Vec<SpanRecord>> = BTreeMap::new();

    let valid: Vec<&Span> = spans
        .iter()
        .filter(|span| !span.is_empty() && text.get(span.start..span.end).is_some())
        .collect();

    for span in valid.iter().rev() {
        let matched = &text[span.start..span.end];
        let replacement = match mode {
            RedactionMode::Mask => mask(&span.category, matched),
            RedactionMode::Remove => String::new(),
            RedactionMode::Placeholder => {
                format!("[{}_REMOVED]", span.category.as_str().to_uppercase())
            }
        };
        output.replace_range(span.start..span.end, &replacement);
    }

    for span in valid {
        evidence
            .entry(span.category.to_string())
            .or_default()
            .push(SpanRecord::from(span));
    }

    Redacted {
        text: output,
        evidence,
    }
}

/// Redacted payload plus per-category span records.
#[derive(Debug, Clone, PartialEq)]
pub struct RedactedPayload {
    pub output: Value,
    pub evidence: BTreeMap<String, Vec<SpanRecord>>,
}

impl RedactedPayload {
    pub fn span_count(&self) -> usize {
        self.evidence.values().map(Vec::len).sum()
    }
}

/// Detect and redact spans in every text leaf of `data`.
///
/// A string payload is redacted as a whole. Structured payloads keep their
/// shape: each string or number leaf is scanned on its own, and records of
/// spans found there carry the leaf's JSON pointer.
pub fn redact_payload(data: &Value, detector: &SpanDetector, mode: RedactionMode) -> RedactedPayload {
    let mut evidence: BTreeMap<String, Vec<SpanRecord>> = BTreeMap::new();

    let output = rewrite_text_leaves(data, &mut |pointer, text| {
        let spans = detector.detect(text);
        if spans.is_empty() {
            return None;
        }
        let redacted = redact(text, &spans, mode);
        for (category, records) in redacted.evidence {
            evidence
                .entry(category)
                .or_default()
                .extend(records.into_iter().map(|r| r.at_path(pointer)));
        }
        Some(redacted.text)
    });

    RedactedPayload { output, evidence }
}
