//! Secrets Guard
//!
//! Masks vendor API keys, JWTs and `password=...` style indicators. Matches
//! are always masked, never removed, so the surrounding text stays readable.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::Context;
use crate::decision::Decision;
use crate::detector::SpanDetector;
use crate::error::ConfigurationError;
use crate::evidence::span_evidence;
use crate::guard::{Guard, GuardResult};
use crate::redactor::{redact_payload, RedactionMode};
use crate::types::Category;

use super::compile_custom;

/// API key vendors with a dedicated pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Aws,
    Stripe,
    Google,
    Github,
    Slack,
}

impl Vendor {
    pub const ALL: [Vendor; 5] = [
        Vendor::Aws,
        Vendor::Stripe,
        Vendor::Google,
        Vendor::Github,
        Vendor::Slack,
    ];

    pub fn category(&self) -> Category {
        match self {
            Vendor::Aws => Category::AwsKey,
            Vendor::Stripe => Category::StripeKey,
            Vendor::Google => Category::GoogleApiKey,
            Vendor::Github => Category::GithubToken,
            Vendor::Slack => Category::SlackToken,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Vendors to detect; `None` means all of them
    pub vendors: Option<Vec<Vendor>>,
    pub detect_jwt: bool,
    pub detect_passwords: bool,
    /// Extra named patterns, name to regex
    pub custom_patterns: BTreeMap<String, String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            vendors: None,
            detect_jwt: true,
            detect_passwords: true,
            custom_patterns: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct SecretsGuard {
    detector: SpanDetector,
}

impl SecretsGuard {
    pub fn new(config: SecretsConfig) -> Result<Self, ConfigurationError> {
        let vendors = config.vendors.as_deref().unwrap_or(&Vendor::ALL);
        let mut categories: BTreeSet<Category> = vendors.iter().map(Vendor::category).collect();

        if config.detect_jwt {
            categories.insert(Category::Jwt);
        }
        if config.detect_passwords {
            categories.insert(Category::Password);
        }

        if categories.is_empty() && config.custom_patterns.is_empty() {
            return Err(ConfigurationError::invalid(
                "vendors",
                "nothing to detect: no vendors, indicators or custom patterns",
            ));
        }

        let detector =
            SpanDetector::new(&categories).with_custom_patterns(compile_custom(&config.custom_patterns)?);

        Ok(Self { detector })
    }
}

impl Guard for SecretsGuard {
    fn name(&self) -> &str {
        "secrets"
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        let redacted = redact_payload(data, &self.detector, RedactionMode::Mask);
        let count = redacted.span_count();

        if count == 0 {
            return Ok(Decision::allow(data.clone(), ctx).with_evidence("secret_count", json!(0)));
        }

        let evidence = span_evidence(&redacted.evidence);

        Ok(Decision::transform(
            redacted.output,
            vec![format!("secrets.detected: {} secret(s)", count)],
            ctx,
        )
        .with_evidence_map(evidence)
        .with_evidence("secret_count", json!(count)))
    }
}
