//! Weighted rule tables shared by the injection and toxicity guards.
//!
//! A rule is a regex tagged with the kind of content it detects. Guards
//! scan every text leaf of the payload with their table and score the hits
//! by kind.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use crate::error::ConfigurationError;
use crate::evidence::SpanRecord;
use crate::types::{rewrite_text_leaves, Category};

/// Kinds a rule table can report.
pub(crate) trait RuleKind: Copy + Ord {
    fn as_str(&self) -> &'static str;
    fn weight(&self) -> f64;
}

#[derive(Debug, Clone)]
pub(crate) struct Rule<K> {
    pub kind: K,
    pub regex: Regex,
}

impl<K: RuleKind> Rule<K> {
    pub fn compile(kind: K, pattern: &str) -> Result<Self, ConfigurationError> {
        let regex = Regex::new(pattern).map_err(|e| ConfigurationError::InvalidPattern {
            name: kind.as_str().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { kind, regex })
    }
}

/// Build a guard's table: built-in rules of the selected kinds plus custom
/// patterns, which must name a selected kind.
pub(crate) fn build_table<K: RuleKind>(
    builtin: &[(K, &str)],
    selected: &[K],
    custom: &BTreeMap<K, Vec<String>>,
) -> Result<Vec<Rule<K>>, ConfigurationError> {
    let mut rules: Vec<Rule<K>> = builtin
        .iter()
        .filter(|(kind, _)| selected.contains(kind))
        .map(|(kind, pattern)| Rule::compile(*kind, pattern))
        .collect::<Result<_, _>>()?;

    for (kind, patterns) in custom {
        if !selected.contains(kind) {
            return Err(ConfigurationError::invalid(
                "custom_patterns",
                format!("'{}' is not a selected category", kind.as_str()),
            ));
        }
        for pattern in patterns {
            rules.push(Rule::compile(*kind, pattern)?);
        }
    }

    Ok(rules)
}

/// Check a score threshold.
pub(crate) fn check_threshold(threshold: f64) -> Result<(), ConfigurationError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(ConfigurationError::invalid(
            "threshold",
            format!("{} is outside [0, 1]", threshold),
        ))
    }
}

/// One rule hit, located in a text leaf of the payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Hit<K> {
    pub kind: K,
    pub start: usize,
    pub end: usize,
    pub path: Option<String>,
}

impl<K: RuleKind> Hit<K> {
    pub fn record(&self) -> SpanRecord {
        SpanRecord {
            category: Category::Custom(self.kind.as_str().to_string()),
            start: self.start,
            end: self.end,
            confidence: self.kind.weight(),
            path: self.path.clone(),
        }
    }
}

/// Hits in one text, sorted by start and non-overlapping. Of overlapping
/// hits the earliest wins, then the longest.
fn scan_text<K: RuleKind>(rules: &[Rule<K>], text: &str) -> Vec<(K, usize, usize)> {
    let mut found: Vec<(K, usize, usize)> = rules
        .iter()
        .flat_map(|rule| {
            rule.regex
                .find_iter(text)
                .filter(|m| m.start() < m.end())
                .map(move |m| (rule.kind, m.start(), m.end()))
        })
        .collect();
    found.sort_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)));

    let mut kept: Vec<(K, usize, usize)> = Vec::new();
    for hit in found {
        if kept.last().map_or(true, |last| hit.1 >= last.2) {
            kept.push(hit);
        }
    }
    kept
}

/// Scan every text leaf of `data`.
///
/// With a `replacement`, each hit is replaced by the text it returns for
/// the hit's kind and the rewritten payload is returned alongside the hits;
/// without one the payload comes back unchanged.
pub(crate) fn scan_payload<K: RuleKind>(
    data: &Value,
    rules: &[Rule<K>],
    replacement: Option<fn(K) -> String>,
) -> (Vec<Hit<K>>, Value) {
    let mut hits = Vec::new();

    let output = rewrite_text_leaves(data, &mut |pointer, text| {
        let found = scan_text(rules, text);
        if found.is_empty() {
            return None;
        }

        let rewritten = replacement.map(|replace| {
            let mut out = text.to_string();
            for (kind, start, end) in found.iter().rev() {
                out.replace_range(*start..*end, &replace(*kind));
            }
            out
        });

        hits.extend(found.into_iter().map(|(kind, start, end)| Hit {
            kind,
            start,
            end,
            path: pointer.map(str::to_string),
        }));
        rewritten
    });

    (hits, output)
}

/// Highest weight of each kind that was hit, with its hit count.
pub(crate) fn per_kind<K: RuleKind>(hits: &[Hit<K>]) -> BTreeMap<K, (f64, usize)> {
    let mut kinds: BTreeMap<K, (f64, usize)> = BTreeMap::new();
    for hit in hits {
        let entry = kinds.entry(hit.kind).or_insert((0.0, 0));
        entry.0 = entry.0.max(hit.kind.weight());
        entry.1 += 1;
    }
    kinds
}

/// Bonus added when several kinds were hit: 0.1 per extra kind, at most 0.3.
pub(crate) fn multi_kind_bonus(kinds: usize) -> f64 {
    (kinds.saturating_sub(1) as f64 * 0.1).min(0.3)
}
