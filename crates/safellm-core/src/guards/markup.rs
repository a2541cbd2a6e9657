//! Markup Guard
//!
//! Runs text through a [`MarkupSanitizer`] with a policy allow-list and
//! transforms the payload when the sanitizer changes anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::capability::markup::{Allowlist, MarkupSanitizer, TagStripSanitizer};
use crate::context::Context;
use crate::decision::Decision;
use crate::error::ConfigurationError;
use crate::guard::{Guard, GuardResult};
use crate::types::rewrite_text_leaves;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupPolicy {
    /// `p`, `br`, `strong`, `em`; no attributes
    #[default]
    Strict,
    /// Headings, lists, quotes, code, links and images
    Moderate,
    /// Tags and attributes from the config
    Custom,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupConfig {
    pub policy: MarkupPolicy,
    /// Only read by the custom policy
    pub allowed_tags: Vec<String>,
    /// Tag (or `*`) to attribute names; only read by the custom policy
    pub allowed_attributes: BTreeMap<String, Vec<String>>,
}

impl MarkupConfig {
    fn allowlist(&self) -> Result<Allowlist, ConfigurationError> {
        match self.policy {
            MarkupPolicy::Strict => Ok(Allowlist::strict()),
            MarkupPolicy::Moderate => Ok(Allowlist::moderate()),
            MarkupPolicy::Custom => {
                if let Some(tag) = self.allowed_tags.iter().find(|t| !is_tag_name(t)) {
                    return Err(ConfigurationError::invalid(
                        "allowed_tags",
                        format!("'{}' is not a tag name", tag),
                    ));
                }
                Ok(self
                    .allowed_attributes
                    .iter()
                    .fold(Allowlist::new(&self.allowed_tags), |list, (tag, attrs)| {
                        list.with_attributes(tag.clone(), attrs.iter().cloned())
                    }))
            }
        }
    }
}

fn is_tag_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic()) && chars.all(|c| c.is_ascii_alphanumeric())
}

#[derive(Clone)]
pub struct MarkupGuard {
    sanitizer: Arc<dyn MarkupSanitizer>,
    allowlist: Allowlist,
}

impl MarkupGuard {
    /// Guard over the built-in [`TagStripSanitizer`].
    pub fn new(config: MarkupConfig) -> Result<Self, ConfigurationError> {
        Self::with_sanitizer(config, Arc::new(TagStripSanitizer::new()))
    }

    pub fn with_sanitizer(
        config: MarkupConfig,
        sanitizer: Arc<dyn MarkupSanitizer>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            sanitizer,
            allowlist: config.allowlist()?,
        })
    }
}

impl Guard for MarkupGuard {
    fn name(&self) -> &str {
        "markup"
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        let mut removed = 0;
        let output = rewrite_text_leaves(data, &mut |_, text| {
            if !text.contains('<') {
                return None;
            }
            let sanitized = self.sanitizer.sanitize(text, &self.allowlist);
            if sanitized == text {
                return None;
            }
            removed += text.len().saturating_sub(sanitized.len());
            Some(sanitized)
        });

        if output == *data {
            return Ok(Decision::allow(data.clone(), ctx));
        }

        Ok(Decision::transform(output, vec!["markup.sanitized".to_string()], ctx)
            .with_evidence("markup_removed_bytes", json!(removed)))
    }
}
