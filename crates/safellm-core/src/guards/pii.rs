//! PII Guard
//!
//! Detects personal data with the span detector and rewrites it with the
//! redactor. Default targets are email, phone, credit_card, ssn, ip_address
//! and iban; `address` is opt-in.
//!
//! ## Outcomes
//!
//! | Outcome | Condition |
//! |---------|-----------|
//! | **allow** | no spans detected |
//! | **transform** | spans detected, `action_on_detect = transform` |
//! | **deny** | spans detected, `action_on_detect = deny` |

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

use super::{compile_custom, DetectAction};

/// Categories a PII guard may target.
pub const PII_CATEGORIES: [Category; 7] = [
    Category::Email,
    Category::Phone,
    Category::CreditCard,
    Category::Ssn,
    Category::IpAddress,
    Category::Iban,
    Category::Address,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PiiConfig {
    /// Category names to detect
    pub targets: Vec<String>,
    pub mode: RedactionMode,
    /// Extra named patterns, name to regex
    pub custom_patterns: BTreeMap<String, String>,
    pub action_on_detect: DetectAction,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            targets: ["email", "phone", "credit_card", "ssn", "ip_address", "iban"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            mode: RedactionMode::Mask,
            custom_patterns: BTreeMap::new(),
            action_on_detect: DetectAction::Transform,
        }
    }
}

impl PiiConfig {
    pub fn with_mode(mut self, mode: RedactionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_custom_pattern(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.custom_patterns.insert(name.into(), pattern.into());
        self
    }
}

#[derive(Debug)]
pub struct PiiGuard {
    detector: SpanDetector,
    mode: RedactionMode,
    action_on_detect: DetectAction,
}

impl PiiGuard {
    pub fn new(config: PiiConfig) -> Result<Self, ConfigurationError> {
        let mut categories = BTreeSet::new();
        for target in &config.targets {
            let category = Category::parse_builtin(target)?;
            if !PII_CATEGORIES.contains(&category) {
                return Err(ConfigurationError::UnsupportedCategory(target.clone()));
            }
            categories.insert(category);
        }

        if categories.is_empty() && config.custom_patterns.is_empty() {
            return Err(ConfigurationError::invalid(
                "targets",
                "at least one target or custom pattern is required",
            ));
        }

        let detector =
            SpanDetector::new(&categories).with_custom_patterns(compile_custom(&config.custom_patterns)?);

        Ok(Self {
            detector,
            mode: config.mode,
            action_on_detect: config.action_on_detect,
        })
    }
}

impl Guard for PiiGuard {
    fn name(&self) -> &str {
        "pii"
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        let redacted = redact_payload(data, &self.detector, self.mode);
        let count = redacted.span_count();

        if count == 0 {
            return Ok(Decision::allow(data.clone(), ctx).with_evidence("pii_count", json!(0)));
        }

        let reasons = vec![format!("pii.detected: {} instance(s)", count)];
        let evidence = span_evidence(&redacted.evidence);

        let decision = match self.action_on_detect {
            DetectAction::Transform => {
                Decision::transform(redacted.output, reasons, ctx)
            }
            DetectAction::Deny => Decision::deny(data.clone(), reasons, ctx),
        };

        Ok(decision
            .with_evidence_map(evidence)
            .with_evidence("pii_count", json!(count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Action;

    const SAMPLE: &str = "Email me at john.doe@example.com or call 555-123-4567";

    #[test]
    fn test_mask_mode() {
        let guard = PiiGuard::new(PiiConfig::default()).unwrap();
        let decision = guard.check(&json!(SAMPLE), &Context::new()).unwrap();

        assert_eq!(decision.action, Action::Transform);
        assert!(decision.allowed);
        let output = decision.output_text().unwrap();
        assert!(!output.contains("john.doe@example.com"));
        assert!(!output.contains("555-123-4567"));
        assert_eq!(decision.evidence["email"].as_array().unwrap().len(), 1);
        assert_eq!(decision.evidence["phone"].as_array().unwrap().len(), 1);
        assert_eq!(decision.evidence["pii_count"], json!(2));
        assert_eq!(decision.reasons, vec!["pii.detected: 2 instance(s)"]);
    }

    #[test]
    fn test_evidence_has_no_matched_text() {
        let guard = PiiGuard::new(PiiConfig::default()).unwrap();
        let decision = guard.check(&json!(SAMPLE), &Context::new()).unwrap();
        let evidence = serde_json::to_string(&decision.evidence).unwrap();
        assert!(!evidence.contains("john.doe"));
        assert!(!evidence.contains("4567"));
    }

    #[test]
    fn test_deny_on_detect() {
        let config = PiiConfig {
            action_on_detect: DetectAction::Deny,
            ..Default::default()
        };
        let guard = PiiGuard::new(config).unwrap();
        let decision = guard.check(&json!(SAMPLE), &Context::new()).unwrap();

        assert_eq!(decision.action, Action::Deny);
        assert_eq!(decision.output, json!(SAMPLE));
    }

    #[test]
    fn test_clean_text_allowed() {
        let guard = PiiGuard::new(PiiConfig::default()).unwrap();
        let decision = guard.check(&json!("nothing to see"), &Context::new()).unwrap();
        assert_eq!(decision.action, Action::Allow);
        assert_eq!(decision.evidence["pii_count"], json!(0));
    }

    #[test]
    fn test_structured_payload() {
        let guard = PiiGuard::new(PiiConfig::default()).unwrap();
        let data = json!({"contact": "john.doe@example.com", "id": 7});
        let decision = guard.check(&data, &Context::new()).unwrap();
        assert_eq!(decision.output, json!({"contact": "j***@***.com", "id": 7}));
        assert_eq!(decision.evidence["email"][0]["path"], json!("/contact"));
    }

    #[test]
    fn test_numeric_leaf_keeps_object_shape() {
        let guard = PiiGuard::new(PiiConfig::default()).unwrap();
        let data = json!({"phone": 5551234567u64, "name": "x"});
        let decision = guard.check(&data, &Context::new()).unwrap();

        assert_eq!(decision.action, Action::Transform);
        assert_eq!(decision.output, json!({"phone": "***-***-67", "name": "x"}));
        assert_eq!(decision.evidence["pii_count"], json!(1));
        assert_eq!(
            decision.evidence["phone"],
            json!([{"category": "phone", "start": 0, "end": 10, "confidence": 0.8, "path": "/phone"}])
        );
    }

    #[test]
    fn test_nested_array_payload() {
        let guard = PiiGuard::new(PiiConfig::default().with_mode(RedactionMode::Placeholder)).unwrap();
        let data = json!({"rows": [{"ssn": "123-45-6789"}, {"note": "ok"}]});
        let decision = guard.check(&data, &Context::new()).unwrap();
        assert_eq!(
            decision.output,
            json!({"rows": [{"ssn": "[SSN_REMOVED]"}, {"note": "ok"}]})
        );
        assert_eq!(decision.evidence["ssn"][0]["path"], json!("/rows/0/ssn"));
    }

    #[test]
    fn test_custom_pattern() {
        let config = PiiConfig {
            targets: vec![],
            ..Default::default()
        }
        .with_custom_pattern("employee_id", r"EMP-\d{5}")
        .with_mode(RedactionMode::Placeholder);

        let guard = PiiGuard::new(config).unwrap();
        let decision = guard.check(&json!("owner EMP-12345"), &Context::new()).unwrap();
        assert_eq!(decision.output, json!("owner [EMPLOYEE_ID_REMOVED]"));
        assert_eq!(decision.evidence["employee_id"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_non_pii_target() {
        let config = PiiConfig {
            targets: vec!["aws_key".into()],
            ..Default::default()
        };
        assert!(matches!(
            PiiGuard::new(config),
            Err(ConfigurationError::UnsupportedCategory(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_target() {
        let config = PiiConfig {
            targets: vec!["dna".into()],
            ..Default::default()
        };
        assert!(PiiGuard::new(config).is_err());
    }
}
