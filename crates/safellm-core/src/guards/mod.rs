//! Built-in guards.
//!
//! Each guard takes an explicit configuration record, validates it in `new`
//! and never changes it afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::patterns::CustomPattern;

pub mod format;
pub mod injection;
pub mod length;
pub mod markup;
pub mod pii;
pub mod profanity;
mod rules;
pub mod schema;
pub mod secrets;
pub mod toxicity;

pub use format::{FormatAction, FormatConfig, FormatGuard, FormatKind};
pub use injection::{InjectionAction, InjectionConfig, InjectionKind, PromptInjectionGuard};
pub use length::{LengthConfig, LengthGuard};
pub use markup::{MarkupConfig, MarkupGuard, MarkupPolicy};
pub use pii::{PiiConfig, PiiGuard};
pub use profanity::{ProfanityConfig, ProfanityGuard, ProfanityMode};
pub use schema::{AsyncSchemaGuard, SchemaGuard};
pub use secrets::{SecretsConfig, SecretsGuard, Vendor};
pub use toxicity::{ToxicityAction, ToxicityCategory, ToxicityConfig, ToxicityGuard};

/// What a detecting guard does once it finds something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectAction {
    /// Rewrite the payload and let it through
    #[default]
    Transform,
    /// Block the payload unchanged
    Deny,
}

/// Compile named custom patterns from configuration.
pub(crate) fn compile_custom(
    patterns: &BTreeMap<String, String>,
) -> Result<Vec<CustomPattern>, ConfigurationError> {
    patterns
        .iter()
        .map(|(name, pattern)| CustomPattern::new(name.clone(), pattern))
        .collect()
}
