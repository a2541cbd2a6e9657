//! Profanity Guard
//!
//! Word-list profanity detection with leet-speak normalization
//! (`sh1t`, `$hit` and `b@stard` all normalize to listed words).
//!
//! ## Modes
//!
//! | Mode | On detection |
//! |------|--------------|
//! | **block** | deny, payload unchanged |
//! | **mask** | transform, each word becomes its first letter plus `*` |
//! | **flag** | allow, detections recorded in evidence only |

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::Context;
use crate::decision::Decision;
use crate::error::ConfigurationError;
use crate::evidence::SpanRecord;
use crate::guard::{Guard, GuardResult};
use crate::types::{rewrite_text_leaves, Category};

lazy_static! {
    // Word runs, including the symbols leet-speak substitutes for letters
    static ref WORD: Regex = Regex::new(r"[\p{L}\p{N}@$]+").unwrap();
}

const DEFAULT_WORDS: [&str; 8] = [
    "asshole", "bastard", "bitch", "crap", "damn", "fuck", "shit", "badword",
];

const CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfanityMode {
    Block,
    #[default]
    Mask,
    Flag,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfanityConfig {
    pub mode: ProfanityMode,
    /// Added to the built-in word list
    pub custom_words: Vec<String>,
    /// Never reported, even when listed
    pub allowlist: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProfanityGuard {
    mode: ProfanityMode,
    words: BTreeSet<String>,
}

/// Lowercase, undo leet substitutions, drop everything but letters and digits.
pub fn normalize_leet(word: &str) -> String {
    word.to_lowercase()
        .chars()
        .map(|c| match c {
            '0' => 'o',
            '1' => 'i',
            '3' => 'e',
            '4' | '@' => 'a',
            '5' | '$' => 's',
            '7' => 't',
            other => other,
        })
        .filter(|c| c.is_alphanumeric())
        .collect()
}

impl ProfanityGuard {
    pub fn new(config: ProfanityConfig) -> Result<Self, ConfigurationError> {
        let mut words: BTreeSet<String> = DEFAULT_WORDS.iter().map(|w| w.to_string()).collect();

        for word in &config.custom_words {
            let normalized = normalize_leet(word);
            if normalized.is_empty() {
                return Err(ConfigurationError::invalid(
                    "custom_words",
                    format!("'{}' has no letters or digits", word),
                ));
            }
            words.insert(normalized);
        }

        for word in &config.allowlist {
            words.remove(&normalize_leet(word));
        }

        Ok(Self {
            mode: config.mode,
            words,
        })
    }

    fn find(&self, text: &str) -> Vec<SpanRecord> {
        WORD.find_iter(text)
            .filter(|m| self.words.contains(&normalize_leet(m.as_str())))
            .map(|m| SpanRecord {
                category: Category::Custom("profanity".into()),
                start: m.start(),
                end: m.end(),
                confidence: CONFIDENCE,
                path: None,
            })
            .collect()
    }
}

fn mask_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => std::iter::once(first)
            .chain(chars.map(|_| '*'))
            .collect(),
        None => String::new(),
    }
}

impl Guard for ProfanityGuard {
    fn name(&self) -> &str {
        "profanity"
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        let mut found: Vec<SpanRecord> = Vec::new();
        let masked = rewrite_text_leaves(data, &mut |pointer, text| {
            let hits = self.find(text);
            if hits.is_empty() {
                return None;
            }
            let mut masked = text.to_string();
            for record in hits.iter().rev() {
                let replacement = mask_word(&text[record.start..record.end]);
                masked.replace_range(record.start..record.end, &replacement);
            }
            found.extend(hits.into_iter().map(|record| record.at_path(pointer)));
            Some(masked)
        });

        if found.is_empty() {
            return Ok(Decision::allow(data.clone(), ctx).with_evidence("profanity_count", json!(0)));
        }

        let reasons = vec![format!("profanity.detected: {} instance(s)", found.len())];
        let decision = match self.mode {
            ProfanityMode::Block => Decision::deny(data.clone(), reasons, ctx),
            ProfanityMode::Flag => Decision::allow(data.clone(), ctx),
            ProfanityMode::Mask => Decision::transform(masked, reasons, ctx),
        };

        let records: Vec<Value> = found.iter().map(SpanRecord::to_value).collect();
        Ok(decision
            .with_evidence("profanity", Value::Array(records))
            .with_evidence("profanity_count", json!(found.len())))
    }
}
