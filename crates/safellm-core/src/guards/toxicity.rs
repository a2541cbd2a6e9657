//! Toxicity Guard
//!
//! Pattern-based detection of threats, self-harm, extremism, sexual content
//! involving minors, harassment and discrimination. The severity score is
//! the count-weighted mean of the highest weight per category, plus 0.1 for
//! each extra category (at most +0.3), capped at 1.0.
//!
//! | Action | At or above `threshold` |
//! |--------|-------------------------|
//! | **block** | deny |
//! | **quarantine** | retry, so the caller can route it to review or regenerate |
//! | **flag** | allow, hits recorded in evidence only |
//!
//! The payload is never rewritten.

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
pub enum ToxicityCategory {
    Threats,
    SelfHarm,
    Extremism,
    AdultContent,
    Harassment,
    Discrimination,
}

impl ToxicityCategory {
    pub const ALL: [ToxicityCategory; 6] = [
        ToxicityCategory::Threats,
        ToxicityCategory::SelfHarm,
        ToxicityCategory::Extremism,
        ToxicityCategory::AdultContent,
        ToxicityCategory::Harassment,
        ToxicityCategory::Discrimination,
    ];
}

impl RuleKind for ToxicityCategory {
    fn as_str(&self) -> &'static str {
        match self {
            ToxicityCategory::Threats => "threats",
            ToxicityCategory::SelfHarm => "self_harm",
            ToxicityCategory::Extremism => "extremism",
            ToxicityCategory::AdultContent => "adult_content",
            ToxicityCategory::Harassment => "harassment",
            ToxicityCategory::Discrimination => "discrimination",
        }
    }

    fn weight(&self) -> f64 {
        match self {
            ToxicityCategory::Threats | ToxicityCategory::SelfHarm => 1.0,
            ToxicityCategory::Extremism => 0.9,
            ToxicityCategory::AdultContent => 0.8,
            ToxicityCategory::Harassment => 0.7,
            ToxicityCategory::Discrimination => 0.6,
        }
    }
}

const PATTERNS: &[(ToxicityCategory, &str)] = &[
    (
        ToxicityCategory::Threats,
        r"(?i)\b(?:kill|murder|hurt|harm|attack|destroy)\s+(?:you|him|her|them)\b",
    ),
    (
        ToxicityCategory::Threats,
        r"(?i)\b(?:i|we|they)\s+(?:will|am going to|are going to|gonna)\s+(?:kill|hurt|harm|attack)\b",
    ),
    (
        ToxicityCategory::Threats,
        r"(?i)\b(?:death|violence)\s+threats?\b",
    ),
    (
        ToxicityCategory::SelfHarm,
        r"(?i)\b(?:kill|hurt|harm|cut|burn)\s+(?:myself|yourself)\b",
    ),
    (
        ToxicityCategory::SelfHarm,
        r"(?i)\b(?:suicide|self-harm|self harm|end it all)\b",
    ),
    (
        ToxicityCategory::SelfHarm,
        r"(?i)\b(?:want to die|wish i was dead|not worth living)\b",
    ),
    (
        ToxicityCategory::Extremism,
        r"(?i)\b(?:terrorist|terrorism|bomb|explosives?)\b",
    ),
    (
        ToxicityCategory::Extremism,
        r"(?i)\b(?:extremist|radical|jihad)\s+(?:attack|action|movement)\b",
    ),
    (
        ToxicityCategory::AdultContent,
        r"(?i)\b(?:explicit|graphic|sexual|pornographic)\s+(?:content|material|images?)\b",
    ),
    (
        ToxicityCategory::AdultContent,
        r"(?i)\b(?:sex|sexual|nude|naked|porn)\b.*\b(?:minor|child|kid|underage)\b",
    ),
    (
        ToxicityCategory::Harassment,
        r"(?i)\b(?:stupid|idiot|moron|loser|pathetic|worthless)\b",
    ),
    (
        ToxicityCategory::Harassment,
        r"(?i)\b(?:shut up|get lost|piss off)\b",
    ),
    (
        ToxicityCategory::Harassment,
        r"(?i)\b(?:hate|despise|can't stand)\s+(?:you|people like you)\b",
    ),
    (
        ToxicityCategory::Discrimination,
        r"(?i)\b(?:all|those|these)\s+(?:people|guys|women|men)\s+(?:are|should be)\s+(?:banned|eliminated|removed)\b",
    ),
    (
        ToxicityCategory::Discrimination,
        r"(?i)\b(?:inferior|superior)\s+(?:race|gender|religion|nationality)\b",
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToxicityAction {
    #[default]
    Block,
    Flag,
    Quarantine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToxicityConfig {
    pub action: ToxicityAction,
    /// Severity at or above which the guard acts
    pub threshold: f64,
    /// Categories to look for; empty means all
    pub categories: Vec<ToxicityCategory>,
    /// Extra regexes per category
    pub custom_patterns: BTreeMap<ToxicityCategory, Vec<String>>,
}

impl Default for ToxicityConfig {
    fn default() -> Self {
        Self {
            action: ToxicityAction::Block,
            threshold: 0.6,
            categories: Vec::new(),
            custom_patterns: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToxicityGuard {
    action: ToxicityAction,
    threshold: f64,
    rules: Vec<Rule<ToxicityCategory>>,
}

impl ToxicityGuard {
    pub fn new(config: ToxicityConfig) -> Result<Self, ConfigurationError> {
        check_threshold(config.threshold)?;
        let categories = if config.categories.is_empty() {
            ToxicityCategory::ALL.to_vec()
        } else {
            config.categories
        };
        Ok(Self {
            action: config.action,
            threshold: config.threshold,
            rules: build_table(PATTERNS, &categories, &config.custom_patterns)?,
        })
    }
}

fn severity(hits: &[Hit<ToxicityCategory>]) -> f64 {
    let categories = per_kind(hits);
    if categories.is_empty() {
        return 0.0;
    }
    let (weighted, count) = categories
        .values()
        .fold((0.0, 0usize), |(sum, total), (weight, n)| {
            (sum + weight * *n as f64, total + n)
        });
    (weighted / count as f64 + multi_kind_bonus(categories.len())).min(1.0)
}

impl Guard for ToxicityGuard {
    fn name(&self) -> &str {
        "toxicity"
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        let (hits, _) = scan_payload(data, &self.rules, None);
        let score = severity(&hits);

        let decision = if hits.is_empty() || score < self.threshold {
            Decision::allow(data.clone(), ctx)
        } else {
            let categories: Vec<&str> = per_kind(&hits).keys().map(|c| c.as_str()).collect();
            let reasons = vec![format!(
                "toxicity.detected: {:.2} ({})",
                score,
                categories.join(", ")
            )];
            match self.action {
                ToxicityAction::Block => Decision::deny(data.clone(), reasons, ctx),
                ToxicityAction::Quarantine => {
                    tracing::info!(score, "Output quarantined for review");
                    Decision::retry(data.clone(), reasons, ctx)
                }
                ToxicityAction::Flag => Decision::allow(data.clone(), ctx),
            }
        };

        let decision = decision.with_evidence("toxicity_score", json!(score));
        if hits.is_empty() {
            return Ok(decision);
        }
        let records: Vec<Value> = hits.iter().map(|hit| hit.record().to_value()).collect();
        let categories: Vec<&str> = per_kind(&hits).keys().map(|c| c.as_str()).collect();
        Ok(decision
            .with_evidence("toxicity", Value::Array(records))
            .with_evidence("toxicity_categories", json!(categories)))
    }
}
