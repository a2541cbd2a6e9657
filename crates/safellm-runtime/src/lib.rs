//! # safellm-runtime
//!
//! Async and stateful extensions for SafeLLM.
//!
//! ## Important
//!
//! This crate is OPTIONAL. Pipelines built from `safellm-core` alone are
//! deterministic and never suspend or keep state between runs.
//!
//! Use this crate when:
//! - Output must pass an external classifier (moderation endpoint, topic model)
//! - Callers need per-user or per-tenant request limits
//! - Pipeline runs should show up in `tracing` output
//! - Defaults come from `SAFELLM_*` environment variables
//!
//! ## Example
//!
//! ```rust,ignore
//! use safellm_core::{Pipeline, PiiGuard, PiiConfig};
//! use safellm_runtime::{ClassifierConfig, RuntimeConfig, TracingTelemetry};
//!
//! let runtime = RuntimeConfig::from_env()?;
//! let pipeline = Pipeline::builder("moderated")
//!     .config(runtime.pipeline)
//!     .guard(PiiGuard::new(PiiConfig::default())?)
//!     .guard(runtime.classifier_guard(ClassifierConfig::blocking(["toxic"]), moderation)?)
//!     .telemetry(Arc::new(TracingTelemetry))
//!     .build()?;
//!
//! let decision = pipeline.avalidate(output.into(), Some(&ctx)).await;
//! ```

pub mod env;
pub mod guards;
pub mod resilience;
pub mod telemetry;

use safellm_core::ConfigurationError;
use thiserror::Error;

pub use env::RuntimeConfig;
pub use guards::{
    Classification, Classifier, ClassifierConfig, ClassifierError, ClassifierGuard, RateKey,
    RateLimitConfig, RateLimitGuard,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use telemetry::TracingTelemetry;

/// Errors from the runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Invalid value for {var}: {message}")]
    InvalidEnv { var: String, message: String },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
