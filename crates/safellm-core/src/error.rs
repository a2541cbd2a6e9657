//! Error types for SafeLLM.
//!
//! Validation failures are never errors: a guard that rejects its input
//! returns a deny or retry [`Decision`](crate::Decision). Only two kinds of
//! failure exist here:
//!
//! - [`ConfigurationError`]: raised eagerly by constructors, before any
//!   `validate` call. This is the only error a caller ever sees.
//! - [`GuardDefect`]: an unexpected failure inside a guard. The pipeline
//!   catches it and turns it into a Decision according to its `on_error`
//!   policy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid guard or pipeline construction parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid regex pattern '{name}': {message}")]
    InvalidPattern { name: String, message: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Unsupported category: {0}")]
    UnsupportedCategory(String),

    #[error("Pipeline must have at least one guard")]
    EmptyPipeline,

    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl ConfigurationError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Coarse classification of a guard defect, surfaced in reasons and evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectKind {
    /// A bug or broken invariant inside the guard's own logic
    Internal,
    /// An external capability (schema validator, classifier) failed
    Capability,
    /// An external capability did not answer in time
    Timeout,
    /// The guard panicked
    Panic,
}

impl DefectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectKind::Internal => "internal",
            DefectKind::Capability => "capability",
            DefectKind::Timeout => "timeout",
            DefectKind::Panic => "panic",
        }
    }
}

impl std::fmt::Display for DefectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unexpected failure inside a guard.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} failure: {message}")]
pub struct GuardDefect {
    pub kind: DefectKind,
    pub message: String,
}

impl GuardDefect {
    pub fn new(kind: DefectKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(DefectKind::Internal, message)
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::new(DefectKind::Capability, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DefectKind::Timeout, message)
    }

    /// Build a defect from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "guard panicked".to_string()
        };
        Self::new(DefectKind::Panic, message)
    }
}
