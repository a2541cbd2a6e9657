//! Prompt Injection Guard
//!
//! Looks for text that tries to steer a model away from its instructions:
//! role changes, instruction overrides, jailbreak names, prompt leaks and
//! similar. Each kind carries a weight and the hits combine into one score:
//!
//! - per kind: its weight, plus 0.05 per extra hit (at most +0.2)
//! - overall: the mean over kinds, plus 0.1 per extra kind (at most +0.3)
//!
//! Both are capped at 1.0. The guard acts when the score reaches `threshold`.
//!
//! | Action | On detection |
//! |--------|--------------|
//! | **block** | deny, payload unchanged |
//! | **sanitize** | transform, each hit becomes `[<KIND>_REMOVED]` |
//! | **flag** | allow, hits recorded in evidence only |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::Context;
use crate::decision::Decision;
use crate::error::ConfigurationError;
use crate::guard::{Guard, GuardResult};
use crate::guards::rules::{
    build_table, check_threshold, multi_kind_bonus, per_kind, scan_payload, Hit, Rule, RuleKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionKind {
    RoleManipulation,
    InstructionOverride,
    JailbreakAttempt,
    SystemPromptLeak,
    OutputManipulation,
    ContextConfusion,
    SocialEngineering,
}

impl InjectionKind {
    pub const ALL: [InjectionKind; 7] = [
        InjectionKind::RoleManipulation,
        InjectionKind::InstructionOverride,
        InjectionKind::JailbreakAttempt,
        InjectionKind::SystemPromptLeak,
        InjectionKind::OutputManipulation,
        InjectionKind::ContextConfusion,
        InjectionKind::SocialEngineering,
    ];

    fn placeholder(self) -> String {
        format!("[{}_REMOVED]", self.as_str().to_uppercase())
    }
}

impl RuleKind for InjectionKind {
    fn as_str(&self) -> &'static str {
        match self {
            InjectionKind::RoleManipulation => "role_manipulation",
            InjectionKind::InstructionOverride => "instruction_override",
            InjectionKind::JailbreakAttempt => "jailbreak_attempt",
            InjectionKind::SystemPromptLeak => "system_prompt_leak",
            InjectionKind::OutputManipulation => "output_manipulation",
            InjectionKind::ContextConfusion => "context_confusion",
            InjectionKind::SocialEngineering => "social_engineering",
        }
    }

    fn weight(&self) -> f64 {
        match self {
            InjectionKind::InstructionOverride => 1.0,
            InjectionKind::RoleManipulation => 0.9,
            InjectionKind::JailbreakAttempt => 0.8,
            InjectionKind::SystemPromptLeak => 0.8,
            InjectionKind::OutputManipulation => 0.7,
            InjectionKind::ContextConfusion => 0.6,
            InjectionKind::SocialEngineering => 0.5,
        }
    }
}

const PATTERNS: &[(InjectionKind, &str)] = &[
    (
        InjectionKind::RoleManipulation,
        r"(?i)\b(?:ignore|forget|disregard)\s+(?:all\s+)?(?:the\s+)?(?:previous|prior|above|earlier|your)\s+(?:instructions|prompts|rules|commands)\b",
    ),
    (
        InjectionKind::RoleManipulation,
        r"(?i)\b(?:you are now|from now on|starting now),?\s+(?:a|an|acting as)\s+(?:different|new|another|unrestricted)\b",
    ),
    (
        InjectionKind::RoleManipulation,
        r"(?i)\b(?:pretend|act|behave|respond)\s+(?:as if|like|that)\s+(?:you are|you're)\b",
    ),
    (
        InjectionKind::RoleManipulation,
        r"(?i)\b(?:system|admin|developer)\s+(?:override|bypass)\b",
    ),
    (
        InjectionKind::InstructionOverride,
        r"(?i)\b(?:new|updated|revised)\s+(?:instructions|system prompt)\s*:",
    ),
    (
        InjectionKind::InstructionOverride,
        r"(?i)\b(?:override|bypass|ignore|skip|disable|turn off|remove)\s+(?:your\s+|the\s+|all\s+)?(?:safety|security|content)?\s*(?:restrictions|filters|guardrails|guidelines)\b",
    ),
    (
        InjectionKind::InstructionOverride,
        r"(?i)\b(?:end|stop|terminate|cancel)\s+(?:safety|security|protection|filtering)\s+(?:mode|checks|protocols)\b",
    ),
    (
        InjectionKind::JailbreakAttempt,
        r"(?i)\b(?:do anything now|developer mode|god mode|jailbreak(?:ed)?)\b",
    ),
    (InjectionKind::JailbreakAttempt, r"\bDAN\b"),
    (
        InjectionKind::SystemPromptLeak,
        r"(?i)\b(?:what is|show me|print|repeat|reveal)\s+(?:your|the)\s+(?:system prompt|system message|initial prompt|hidden instructions)\b",
    ),
    (
        InjectionKind::OutputManipulation,
        r"(?i)\b(?:output|respond|answer|reply)\s+(?:only|just|simply)\s+(?:with\s+)?(?:yes|no|true|false)\b",
    ),
    (
        InjectionKind::OutputManipulation,
        r"(?i)\b(?:don't|do not|never)\s+(?:mention|say|include|add)\s+(?:any\s+)?(?:warnings?|disclaimers?)\b",
    ),
    (
        InjectionKind::ContextConfusion,
        r"(?i)\b(?:previous|earlier|above)\s+(?:conversation|chat|message)\s+(?:was|is)\s+(?:fake|a test|not real)\b",
    ),
    (
        InjectionKind::ContextConfusion,
        r"(?im)^\s*(?:\[system\]|system\s*:|<\|im_start\|>system)",
    ),
    (
        InjectionKind::SocialEngineering,
        r"(?i)\b(?:my|the)\s+(?:grandmother|grandma|mother|father)\s+(?:used to|would)\s+(?:tell|read|give)\b",
    ),
    (
        InjectionKind::SocialEngineering,
        r"(?i)\b(?:please|help)\s+(?:save|protect)\s+(?:my|our)\s+(?:life|lives)\b",
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionAction {
    #[default]
    Block,
    Flag,
    Sanitize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    pub action: InjectionAction,
    /// Score at or above which the guard acts
    pub threshold: f64,
    /// Kinds to look for; empty means all
    pub kinds: Vec<InjectionKind>,
    /// Extra regexes per kind
    pub custom_patterns: BTreeMap<InjectionKind, Vec<String>>,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            action: InjectionAction::Block,
            threshold: 0.7,
            kinds: Vec::new(),
            custom_patterns: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptInjectionGuard {
    action: InjectionAction,
    threshold: f64,
    rules: Vec<Rule<InjectionKind>>,
}

impl PromptInjectionGuard {
    pub fn new(config: InjectionConfig) -> Result<Self, ConfigurationError> {
        check_threshold(config.threshold)?;
        let kinds = if config.kinds.is_empty() {
            InjectionKind::ALL.to_vec()
        } else {
            config.kinds
        };
        Ok(Self {
            action: config.action,
            threshold: config.threshold,
            rules: build_table(PATTERNS, &kinds, &config.custom_patterns)?,
        })
    }
}

/// Combined score of a set of hits, in `[0, 1]`.
fn injection_score(hits: &[Hit<InjectionKind>]) -> f64 {
    let kinds = per_kind(hits);
    if kinds.is_empty() {
        return 0.0;
    }
    let total: f64 = kinds
        .values()
        .map(|(weight, count)| (weight + ((count - 1) as f64 * 0.05).min(0.2)).min(1.0))
        .sum();
    (total / kinds.len() as f64 + multi_kind_bonus(kinds.len())).min(1.0)
}

impl Guard for PromptInjectionGuard {
    fn name(&self) -> &str {
        "injection"
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        let replacement: Option<fn(InjectionKind) -> String> = match self.action {
            InjectionAction::Sanitize => Some(InjectionKind::placeholder),
            InjectionAction::Block | InjectionAction::Flag => None,
        };
        let (hits, sanitized) = scan_payload(data, &self.rules, replacement);
        let score = injection_score(&hits);

        let kinds: Vec<&str> = per_kind(&hits).keys().map(|kind| kind.as_str()).collect();
        let records: Vec<Value> = hits.iter().map(|hit| hit.record().to_value()).collect();

        let decision = if hits.is_empty() || score < self.threshold {
            Decision::allow(data.clone(), ctx)
        } else {
            tracing::debug!(score, kinds = ?kinds, "Prompt injection detected");
            let reasons = vec![format!("injection.detected: {:.2} ({})", score, kinds.join(", "))];
            match self.action {
                InjectionAction::Block => Decision::deny(data.clone(), reasons, ctx),
                InjectionAction::Sanitize => Decision::transform(sanitized, reasons, ctx),
                InjectionAction::Flag => Decision::allow(data.clone(), ctx),
            }
        };

        let decision = decision.with_evidence("injection_score", json!(score));
        if records.is_empty() {
            return Ok(decision);
        }
        Ok(decision
            .with_evidence("injection", Value::Array(records))
            .with_evidence("injection_kinds", json!(kinds)))
    }
}
