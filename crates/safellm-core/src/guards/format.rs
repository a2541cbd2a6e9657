//! Format Guard
//!
//! Checks that the whole payload is one value of an expected format: JSON,
//! an email address, a URL, a phone number, a card number, an IP address,
//! a UUID, or a custom regex that must match the full text.
//!
//! | Action | On an invalid payload |
//! |--------|-----------------------|
//! | **block** | deny |
//! | **transform** | repair it (trim, lowercase, add a scheme, normalize digits); deny if the repair is still invalid |
//! | **flag** | allow, result recorded in evidence only |
//!
//! Evidence describes the value (JSON type, IP scope, UUID version, card
//! network) without echoing it.

use std::net::{Ipv4Addr, Ipv6Addr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::context::Context;
use crate::decision::Decision;
use crate::error::ConfigurationError;
use crate::guard::{Guard, GuardResult};
use crate::patterns::luhn_check;
use crate::types::payload_text;

lazy_static! {
    static ref EMAIL_STRICT: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
    static ref EMAIL_LENIENT: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref URL_STRICT: Regex = Regex::new(
        r"^https?://[-\w.]+(?::\d{1,5})?(?:/[-\w/.~%]*)?(?:\?[-\w&=%.]*)?(?:#[-\w.]*)?$"
    )
    .unwrap();
    static ref URL_LENIENT: Regex = Regex::new(r"^https?://\S+$").unwrap();
    static ref URL_PARTS: Regex = Regex::new(r"^(https?)://[^:/?#]+(?::(\d+))?").unwrap();
    // Phone patterns run on the number with separators removed
    static ref PHONE_STRICT: Regex = Regex::new(r"^\+[1-9]\d{4,14}$").unwrap();
    static ref PHONE_LENIENT: Regex =
        Regex::new(r"^(?:\+?1)?[2-9]\d{2}[2-9]\d{6}$|^\+[1-9]\d{4,14}$").unwrap();
    static ref PHONE_SEPARATORS: Regex = Regex::new(r"[\s\-().]").unwrap();
    static ref CARD_SEPARATORS: Regex = Regex::new(r"[\s\-]").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    #[default]
    Json,
    Email,
    Url,
    Phone,
    CreditCard,
    Ipv4,
    Ipv6,
    Uuid,
    Custom,
}

impl FormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Json => "json",
            FormatKind::Email => "email",
            FormatKind::Url => "url",
            FormatKind::Phone => "phone",
            FormatKind::CreditCard => "credit_card",
            FormatKind::Ipv4 => "ipv4",
            FormatKind::Ipv6 => "ipv6",
            FormatKind::Uuid => "uuid",
            FormatKind::Custom => "custom",
        }
    }
}

impl std::str::FromStr for FormatKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| ConfigurationError::invalid("format", format!("unknown format '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatAction {
    #[default]
    Block,
    Flag,
    Transform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    pub format: FormatKind,
    /// Required for `custom`, rejected otherwise
    pub pattern: Option<String>,
    pub action: FormatAction,
    /// Strict email, URL, phone and UUID forms, Luhn for cards
    pub strict: bool,
    /// Let null and empty payloads through
    pub allow_empty: bool,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            format: FormatKind::Json,
            pattern: None,
            action: FormatAction::Block,
            strict: true,
            allow_empty: false,
        }
    }
}

impl FormatConfig {
    pub fn new(format: FormatKind) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormatGuard {
    name: String,
    config: FormatConfig,
    custom: Option<Regex>,
}

type Details = Map<String, Value>;

impl FormatGuard {
    pub fn new(config: FormatConfig) -> Result<Self, ConfigurationError> {
        let custom = match (config.format, &config.pattern) {
            (FormatKind::Custom, Some(pattern)) => Some(
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                    ConfigurationError::InvalidPattern {
                        name: "custom".to_string(),
                        message: e.to_string(),
                    }
                })?,
            ),
            (FormatKind::Custom, None) => {
                return Err(ConfigurationError::MissingField("pattern".to_string()))
            }
            (_, Some(_)) => {
                return Err(ConfigurationError::invalid(
                    "pattern",
                    "only used with the custom format",
                ))
            }
            (_, None) => None,
        };

        Ok(Self {
            name: format!("format_{}", config.format.as_str()),
            config,
            custom,
        })
    }

    pub fn config(&self) -> &FormatConfig {
        &self.config
    }

    /// Validate one text, returning descriptive details or an error message.
    fn validate(&self, text: &str) -> Result<Details, String> {
        let strict = self.config.strict;
        let mut details = Details::new();

        match self.config.format {
            FormatKind::Json => {
                let parsed: Value = serde_json::from_str(text).map_err(|e| {
                    format!("invalid JSON at line {} column {}", e.line(), e.column())
                })?;
                details.insert("json_type".into(), json!(json_type(&parsed)));
            }
            FormatKind::Email => {
                let pattern = if strict { &*EMAIL_STRICT } else { &*EMAIL_LENIENT };
                if !pattern.is_match(text) {
                    return Err("not an email address".into());
                }
            }
            FormatKind::Url => {
                let pattern = if strict { &*URL_STRICT } else { &*URL_LENIENT };
                if !pattern.is_match(text) {
                    return Err("not an http(s) URL".into());
                }
                if let Some(caps) = URL_PARTS.captures(text) {
                    details.insert("scheme".into(), json!(&caps[1]));
                    if let Some(port) = caps.get(2) {
                        details.insert("port".into(), json!(port.as_str()));
                    }
                }
            }
            FormatKind::Phone => {
                let digits = PHONE_SEPARATORS.replace_all(text, "");
                let pattern = if strict { &*PHONE_STRICT } else { &*PHONE_LENIENT };
                if !pattern.is_match(&digits) {
                    let message = if strict { "not an E.164 phone number" } else { "not a phone number" };
                    return Err(message.to_string());
                }
            }
            FormatKind::CreditCard => {
                let digits = CARD_SEPARATORS.replace_all(text, "");
                if !(13..=19).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit())
                {
                    return Err("card numbers have 13 to 19 digits".into());
                }
                if strict && !luhn_check(&digits) {
                    return Err("failed Luhn check".into());
                }
                details.insert("card_network".into(), json!(card_network(&digits)));
            }
            FormatKind::Ipv4 => {
                let addr: Ipv4Addr = text.parse().map_err(|_| "not an IPv4 address".to_string())?;
                details.insert("is_private".into(), json!(addr.is_private()));
                details.insert("is_loopback".into(), json!(addr.is_loopback()));
            }
            FormatKind::Ipv6 => {
                let addr: Ipv6Addr = text.parse().map_err(|_| "not an IPv6 address".to_string())?;
                details.insert("compressed".into(), json!(text.contains("::")));
                details.insert("is_loopback".into(), json!(addr.is_loopback()));
            }
            FormatKind::Uuid => {
                let uuid = Uuid::parse_str(text).map_err(|_| "not a UUID".to_string())?;
                // Only the 8-4-4-4-12 form is accepted in strict mode
                if strict && text.len() != 36 {
                    return Err("UUID is not in hyphenated form".into());
                }
                details.insert("version".into(), json!(uuid.get_version_num()));
            }
            FormatKind::Custom => {
                let matched = self.custom.as_ref().is_some_and(|re| re.is_match(text));
                if !matched {
                    return Err("does not match the custom pattern".into());
                }
            }
        }

        Ok(details)
    }

    /// Best-effort repair of an invalid text, `None` when nothing applies.
    fn repair(&self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        let repaired = match self.config.format {
            FormatKind::Email => trimmed.to_lowercase(),
            FormatKind::Url if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") => {
                format!("http://{}", trimmed)
            }
            FormatKind::Phone => {
                let digits = PHONE_SEPARATORS.replace_all(trimmed, "");
                match digits.len() {
                    _ if digits.starts_with('+') => digits.into_owned(),
                    11 if digits.starts_with('1') => format!("+{}", digits),
                    10 => format!("+1{}", digits),
                    _ => return None,
                }
            }
            FormatKind::CreditCard => CARD_SEPARATORS.replace_all(trimmed, "").into_owned(),
            _ => trimmed.to_string(),
        };
        (repaired != text).then_some(repaired)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn card_network(digits: &str) -> &'static str {
    let prefix2: u32 = digits.get(..2).and_then(|p| p.parse().ok()).unwrap_or(0);
    let prefix4: u32 = digits.get(..4).and_then(|p| p.parse().ok()).unwrap_or(0);
    match (prefix2, prefix4) {
        (40..=49, _) => "visa",
        (51..=55, _) | (_, 2221..=2720) => "mastercard",
        (34 | 37, _) => "amex",
        (65, _) | (_, 6011) => "discover",
        _ => "unknown",
    }
}

impl Guard for FormatGuard {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        let kind = self.config.format.as_str();

        let is_empty = data.is_null() || data.as_str().is_some_and(str::is_empty);
        if is_empty {
            let evidence = json!({"kind": kind, "valid": self.config.allow_empty, "empty": true});
            let decision = if self.config.allow_empty {
                Decision::allow(data.clone(), ctx)
            } else {
                Decision::deny(data.clone(), vec![format!("format.empty: expected {}", kind)], ctx)
            };
            return Ok(decision.with_evidence("format", evidence));
        }

        // Structured payloads are already JSON
        let result = match (self.config.format, data) {
            (FormatKind::Json, Value::Array(_) | Value::Object(_)) => {
                let mut details = Details::new();
                details.insert("json_type".into(), json!(json_type(data)));
                Ok(details)
            }
            _ => self.validate(&payload_text(data)),
        };

        let error = match result {
            Ok(mut details) => {
                details.insert("kind".into(), json!(kind));
                details.insert("valid".into(), json!(true));
                return Ok(Decision::allow(data.clone(), ctx)
                    .with_evidence("format", Value::Object(details)));
            }
            Err(error) => error,
        };

        let mut evidence = Map::new();
        evidence.insert("kind".into(), json!(kind));
        evidence.insert("valid".into(), json!(false));
        evidence.insert("error".into(), json!(error));
        let mut reasons = vec![format!("format.invalid: expected {} ({})", kind, error)];

        let decision = match self.config.action {
            FormatAction::Block => Decision::deny(data.clone(), reasons, ctx),
            FormatAction::Flag => Decision::allow(data.clone(), ctx),
            FormatAction::Transform => {
                let repaired = self
                    .repair(&payload_text(data))
                    .filter(|candidate| self.validate(candidate).is_ok());
                match repaired {
                    Some(repaired) => {
                        evidence.insert("repaired".into(), json!(true));
                        reasons.push(format!("format.repaired: {}", kind));
                        Decision::transform(Value::String(repaired), reasons, ctx)
                    }
                    None => {
                        evidence.insert("repaired".into(), json!(false));
                        reasons.push(format!("format.unrepairable: {}", kind));
                        Decision::deny(data.clone(), reasons, ctx)
                    }
                }
            }
        };

        Ok(decision.with_evidence("format", Value::Object(evidence)))
    }
}
