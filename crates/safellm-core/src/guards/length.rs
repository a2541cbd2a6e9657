//! Length Guard
//!
//! Denies text that is too short, too long, or has too many tokens.
//!
//! | Code | Condition |
//! |------|-----------|
//! | `length.min_chars_not_met` | fewer chars than `min_chars` |
//! | `length.max_chars_exceeded` | more chars than `max_chars` |
//! | `length.max_tokens_exceeded` | more whitespace tokens than `max_tokens` |
//!
//! Chars are Unicode scalar values; bounds are inclusive.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::Context;
use crate::decision::Decision;
use crate::error::ConfigurationError;
use crate::guard::{Guard, GuardResult};
use crate::types::payload_text;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LengthConfig {
    pub min_chars: Option<usize>,
    pub max_chars: Option<usize>,
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LengthGuard {
    config: LengthConfig,
}

impl LengthGuard {
    pub fn new(config: LengthConfig) -> Result<Self, ConfigurationError> {
        if let (Some(min), Some(max)) = (config.min_chars, config.max_chars) {
            if min > max {
                return Err(ConfigurationError::invalid(
                    "min_chars",
                    format!("min_chars ({}) cannot be greater than max_chars ({})", min, max),
                ));
            }
        }
        Ok(Self { config })
    }

    /// Shorthand for a guard with only an upper char bound.
    pub fn max_chars(max: usize) -> Self {
        Self {
            config: LengthConfig {
                max_chars: Some(max),
                ..Default::default()
            },
        }
    }

    pub fn config(&self) -> &LengthConfig {
        &self.config
    }
}

impl Guard for LengthGuard {
    fn name(&self) -> &str {
        "length"
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        let text = payload_text(data);
        let char_count = text.chars().count();
        let mut reasons = Vec::new();

        if let Some(min) = self.config.min_chars {
            if char_count < min {
                reasons.push(format!(
                    "length.min_chars_not_met: {} < {} characters",
                    char_count, min
                ));
            }
        }

        if let Some(max) = self.config.max_chars {
            if char_count > max {
                reasons.push(format!(
                    "length.max_chars_exceeded: {} > {} characters",
                    char_count, max
                ));
            }
        }

        let token_count = self.config.max_tokens.map(|max| {
            let count = text.split_whitespace().count();
            if count > max {
                reasons.push(format!(
                    "length.max_tokens_exceeded: {} > {} tokens",
                    count, max
                ));
            }
            count
        });

        let decision = if reasons.is_empty() {
            Decision::allow(data.clone(), ctx)
        } else {
            Decision::deny(data.clone(), reasons, ctx)
        };

        let decision = decision.with_evidence("char_count", json!(char_count));
        Ok(match token_count {
            Some(count) => decision.with_evidence("token_count", json!(count)),
            None => decision,
        })
    }
}
