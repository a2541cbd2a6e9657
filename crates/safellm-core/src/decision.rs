//! The decision model.
//!
//! Every guard, and the pipeline as a whole, produces a [`Decision`]. The
//! constructors keep `allowed` and `action` consistent:
//!
//! | Action | allowed | output |
//! |--------|---------|--------|
//! | allow | true | input, unchanged |
//! | transform | true | input rewritten inside detected spans |
//! | deny | false | input, unchanged |
//! | retry | false | input, unchanged |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::evidence::{merge_evidence, Evidence};

/// What the caller should do with the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
    Transform,
    Retry,
}

impl Action {
    /// Deny and retry stop the output from reaching the caller.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Action::Deny | Action::Retry)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
            Action::Transform => "transform",
            Action::Retry => "retry",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one guard or one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub action: Action,
    /// Reason codes in detection order
    pub reasons: Vec<String>,
    pub evidence: Evidence,
    /// The original or transformed payload
    pub output: Value,
    pub correlation_id: String,
}

impl Decision {
    fn build(action: Action, output: Value, reasons: Vec<String>, ctx: &Context) -> Self {
        Self {
            allowed: !action.is_blocking(),
            action,
            reasons,
            evidence: Evidence::new(),
            output,
            correlation_id: ctx.correlation_id().to_string(),
        }
    }

    pub fn allow(output: Value, ctx: &Context) -> Self {
        Self::build(Action::Allow, output, Vec::new(), ctx)
    }

    pub fn deny(output: Value, reasons: Vec<String>, ctx: &Context) -> Self {
        Self::build(Action::Deny, output, reasons, ctx)
    }

    pub fn transform(output: Value, reasons: Vec<String>, ctx: &Context) -> Self {
        Self::build(Action::Transform, output, reasons, ctx)
    }

    pub fn retry(output: Value, reasons: Vec<String>, ctx: &Context) -> Self {
        Self::build(Action::Retry, output, reasons, ctx)
    }

    /// Attach a single evidence entry.
    pub fn with_evidence(mut self, key: impl Into<String>, value: Value) -> Self {
        let mut entry = Evidence::new();
        entry.insert(key.into(), value);
        merge_evidence(&mut self.evidence, entry);
        self
    }

    /// Attach a whole evidence map.
    pub fn with_evidence_map(mut self, evidence: Evidence) -> Self {
        merge_evidence(&mut self.evidence, evidence);
        self
    }

    /// The output as text, if it is a JSON string.
    pub fn output_text(&self) -> Option<&str> {
        self.output.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_allowed_follows_action() {
        let ctx = Context::new();
        assert!(Decision::allow(json!("a"), &ctx).allowed);
        assert!(Decision::transform(json!("b"), vec![], &ctx).allowed);
        assert!(!Decision::deny(json!("c"), vec![], &ctx).allowed);
        assert!(!Decision::retry(json!("d"), vec![], &ctx).allowed);
    }

    #[test]
    fn test_correlation_id_comes_from_context() {
        let ctx = Context::new().with_correlation_id("run-42");
        let decision = Decision::deny(json!("x"), vec!["code".into()], &ctx);
        assert_eq!(decision.correlation_id, "run-42");
    }

    #[test]
    fn test_action_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Action::Transform).unwrap(), "\"transform\"");
        let action: Action = serde_json::from_str("\"retry\"").unwrap();
        assert_eq!(action, Action::Retry);
    }

    #[test]
    fn test_with_evidence() {
        let ctx = Context::new();
        let decision = Decision::allow(json!("x"), &ctx)
            .with_evidence("char_count", json!(1))
            .with_evidence("email", json!([]));
        assert_eq!(decision.evidence.len(), 2);
        assert_eq!(decision.output_text(), Some("x"));
    }
}
