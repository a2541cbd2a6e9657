//! Core types shared by the detector, redactor and guards.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigurationError;

/// A detection category.
///
/// Declaration order is the overlap priority order: when two candidates of
/// equal length overlap, the category declared first wins. More specific
/// categories (checksum-confirmed numbers, vendor keys) come before general
/// ones (phone numbers, addresses). Custom categories always rank last.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Category {
    CreditCard,
    Iban,
    Ssn,
    AwsKey,
    StripeKey,
    GithubToken,
    GoogleApiKey,
    SlackToken,
    Jwt,
    Password,
    Email,
    IpAddress,
    Phone,
    Address,
    Custom(String),
}

impl Category {
    /// Every built-in category, in priority order.
    pub const BUILTIN: [Category; 14] = [
        Category::CreditCard,
        Category::Iban,
        Category::Ssn,
        Category::AwsKey,
        Category::StripeKey,
        Category::GithubToken,
        Category::GoogleApiKey,
        Category::SlackToken,
        Category::Jwt,
        Category::Password,
        Category::Email,
        Category::IpAddress,
        Category::Phone,
        Category::Address,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Category::CreditCard => "credit_card",
            Category::Iban => "iban",
            Category::Ssn => "ssn",
            Category::AwsKey => "aws_key",
            Category::StripeKey => "stripe_key",
            Category::GithubToken => "github_token",
            Category::GoogleApiKey => "google_api_key",
            Category::SlackToken => "slack_token",
            Category::Jwt => "jwt",
            Category::Password => "password",
            Category::Email => "email",
            Category::IpAddress => "ip_address",
            Category::Phone => "phone",
            Category::Address => "address",
            Category::Custom(name) => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Category::Custom(_))
    }

    /// Parse a built-in category name, rejecting anything else.
    pub fn parse_builtin(name: &str) -> Result<Self, ConfigurationError> {
        match Category::from(name.to_string()) {
            Category::Custom(other) => Err(ConfigurationError::UnsupportedCategory(other)),
            category => Ok(category),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        match category {
            Category::Custom(name) => name,
            builtin => builtin.as_str().to_string(),
        }
    }
}

impl From<String> for Category {
    fn from(name: String) -> Self {
        match name.as_str() {
            "credit_card" => Category::CreditCard,
            "iban" => Category::Iban,
            "ssn" => Category::Ssn,
            "aws_key" => Category::AwsKey,
            "stripe_key" => Category::StripeKey,
            "github_token" => Category::GithubToken,
            "google_api_key" => Category::GoogleApiKey,
            "slack_token" => Category::SlackToken,
            "jwt" => Category::Jwt,
            "password" => Category::Password,
            "email" => Category::Email,
            "ip_address" => Category::IpAddress,
            "phone" => Category::Phone,
            "address" => Category::Address,
            _ => Category::Custom(name),
        }
    }
}

impl FromStr for Category {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::parse_builtin(s)
    }
}

/// A detected region of interest.
///
/// Offsets are byte offsets into the scanned UTF-8 text and always fall on
/// char boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub category: Category,
    /// 1.0 for checksum-confirmed matches, below 1.0 for pattern-only matches
    pub confidence: f64,
}

impl Span {
    pub fn new(start: usize, end: usize, category: Category, confidence: f64) -> Self {
        Self {
            start,
            end,
            category,
            confidence,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Text view of a payload.
///
/// Strings are borrowed as-is; any other JSON value is scanned through its
/// compact serialization.
pub fn payload_text(data: &Value) -> Cow<'_, str> {
    match data {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Rewrite the text leaves of a payload in place.
///
/// A string payload is a single leaf with no pointer. In any other payload
/// every string and every number (through its decimal text) is a leaf,
/// addressed by its JSON pointer; object keys, booleans and nulls are kept.
/// `rewrite` returns the replacement text, or `None` to keep the leaf. A
/// rewritten number becomes a string.
pub fn rewrite_text_leaves<F>(data: &Value, rewrite: &mut F) -> Value
where
    F: FnMut(Option<&str>, &str) -> Option<String>,
{
    match data {
        Value::String(s) => rewrite(None, s).map_or_else(|| data.clone(), Value::String),
        other => {
            let mut pointer = String::new();
            rewrite_leaf(other, &mut pointer, rewrite)
        }
    }
}

fn rewrite_leaf<F>(value: &Value, pointer: &mut String, rewrite: &mut F) -> Value
where
    F: FnMut(Option<&str>, &str) -> Option<String>,
{
    match value {
        Value::String(s) => rewrite(Some(pointer.as_str()), s)
            .map_or_else(|| value.clone(), Value::String),
        Value::Number(n) => rewrite(Some(pointer.as_str()), &n.to_string())
            .map_or_else(|| value.clone(), Value::String),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let len = pointer.len();
                    pointer.push('/');
                    pointer.push_str(&i.to_string());
                    let rewritten = rewrite_leaf(item, pointer, rewrite);
                    pointer.truncate(len);
                    rewritten
                })
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    let len = pointer.len();
                    pointer.push('/');
                    pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
                    let rewritten = rewrite_leaf(item, pointer, rewrite);
                    pointer.truncate(len);
                    (key.clone(), rewritten)
                })
                .collect(),
        ),
        Value::Bool(_) | Value::Null => value.clone(),
    }
}
