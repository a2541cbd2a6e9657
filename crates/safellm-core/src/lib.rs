//! # safellm-core
//!
//! Deterministic validation and sanitization of language model output.
//!
//! This crate provides the validation pipeline for SafeLLM, answering:
//! - Is this output allowed to reach the caller?
//! - If so, in what (possibly redacted) form?
//! - If not, which guard stopped it and why?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input and context always produce the same decision
//! 2. **No I/O**: Pattern work never blocks or suspends; external work goes
//!    through capability traits
//! 3. **Traceable**: Every decision carries reason codes and offset-only
//!    evidence, never the sensitive text itself
//! 4. **Parallel-safe**: Guards are immutable and shared across runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use safellm_core::{Pipeline, PiiGuard, PiiConfig, LengthGuard};
//!
//! let pipeline = Pipeline::builder("chat-output")
//!     .guard(LengthGuard::max_chars(4000))
//!     .guard(PiiGuard::new(PiiConfig::default())?)
//!     .build()?;
//!
//! let decision = pipeline.validate("Mail john@example.com".into(), None);
//! match decision.action {
//!     Action::Allow | Action::Transform => send(decision.output),
//!     Action::Deny | Action::Retry => log(decision.reasons),
//! }
//! ```

pub mod capability;
pub mod context;
pub mod decision;
pub mod detector;
pub mod error;
pub mod evidence;
pub mod guard;
pub mod guards;
pub mod patterns;
pub mod pipeline;
pub mod redactor;
pub mod types;

// Re-export main types at crate root
pub use capability::{
    Allowlist, AsyncSchemaValidator, JsonSchemaValidator, MarkupSanitizer, NoopTelemetry,
    SchemaValidator, SchemaViolation, TagStripSanitizer, TelemetryEvent, TelemetrySink,
};
pub use context::Context;
pub use decision::{Action, Decision};
pub use detector::{detect, SpanDetector};
pub use error::{ConfigurationError, DefectKind, GuardDefect};
pub use evidence::{Evidence, SpanRecord, DEFECT_KEY};
pub use guard::{Guard, GuardResult};
pub use guards::{
    AsyncSchemaGuard, DetectAction, FormatAction, FormatConfig, FormatGuard, FormatKind,
    InjectionAction, InjectionConfig, InjectionKind, LengthConfig, LengthGuard, MarkupConfig,
    MarkupGuard, MarkupPolicy, PiiConfig, PiiGuard, ProfanityConfig, ProfanityGuard,
    ProfanityMode, PromptInjectionGuard, SchemaGuard, SecretsConfig, SecretsGuard,
    ToxicityAction, ToxicityCategory, ToxicityConfig, ToxicityGuard, Vendor,
};
pub use patterns::{luhn_check, CustomPattern};
pub use pipeline::{OnError, Pipeline, PipelineBuilder, PipelineConfig};
pub use redactor::{redact, redact_payload, Redacted, RedactedPayload, RedactionMode};
pub use types::{payload_text, rewrite_text_leaves, Category, Span};
