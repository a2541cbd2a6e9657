//! Runtime configuration from environment variables.
//!
//! | Variable | Values | Default |
//! |---|---|---|
//! | `SAFELLM_FAIL_FAST` | `true`/`false`/`1`/`0`/`yes`/`no` | `true` |
//! | `SAFELLM_ON_ERROR` | `deny`/`continue` | `deny` |
//! | `SAFELLM_REDACTION_MODE` | `mask`/`remove`/`placeholder` | `mask` |
//! | `SAFELLM_CLASSIFIER_TIMEOUT` | humantime duration, e.g. `750ms` | `5s` |
//!
//! Unset or empty variables keep their defaults.

use std::sync::Arc;
use std::time::Duration;

use safellm_core::{OnError, PipelineConfig, RedactionMode};

use crate::guards::{Classifier, ClassifierConfig, ClassifierGuard};
use crate::RuntimeError;

pub const FAIL_FAST: &str = "SAFELLM_FAIL_FAST";
pub const ON_ERROR: &str = "SAFELLM_ON_ERROR";
pub const REDACTION_MODE: &str = "SAFELLM_REDACTION_MODE";
pub const CLASSIFIER_TIMEOUT: &str = "SAFELLM_CLASSIFIER_TIMEOUT";

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub pipeline: PipelineConfig,
    pub redaction_mode: RedactionMode,
    pub classifier_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            redaction_mode: RedactionMode::default(),
            classifier_timeout: Duration::from_secs(5),
        }
    }
}

impl RuntimeConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RuntimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get(FAIL_FAST) {
            config.pipeline.fail_fast = parse_bool(&raw).ok_or_else(|| RuntimeError::InvalidEnv {
                var: FAIL_FAST.to_string(),
                message: format!("expected a boolean, got '{}'", raw),
            })?;
        }

        if let Some(raw) = get(ON_ERROR) {
            config.pipeline.on_error = raw
                .parse::<OnError>()
                .map_err(|e| invalid_env(ON_ERROR, e))?;
        }

        if let Some(raw) = get(REDACTION_MODE) {
            config.redaction_mode = raw
                .parse::<RedactionMode>()
                .map_err(|e| invalid_env(REDACTION_MODE, e))?;
        }

        if let Some(raw) = get(CLASSIFIER_TIMEOUT) {
            let timeout = humantime::parse_duration(raw.trim())
                .map_err(|e| invalid_env(CLASSIFIER_TIMEOUT, e))?;
            if timeout.is_zero() {
                return Err(invalid_env(CLASSIFIER_TIMEOUT, "must be longer than zero"));
            }
            config.classifier_timeout = timeout;
        }

        tracing::debug!(
            fail_fast = config.pipeline.fail_fast,
            on_error = ?config.pipeline.on_error,
            redaction_mode = config.redaction_mode.as_str(),
            "Loaded runtime configuration"
        );

        Ok(config)
    }

    /// Build a classifier guard that waits at most `classifier_timeout`.
    ///
    /// The timeout in `config` is replaced by the configured one.
    pub fn classifier_guard(
        &self,
        config: ClassifierConfig,
        classifier: Arc<dyn Classifier>,
    ) -> Result<ClassifierGuard, RuntimeError> {
        let config = ClassifierConfig {
            timeout: self.classifier_timeout,
            ..config
        };
        Ok(ClassifierGuard::new(config, classifier)?)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid_env(var: &str, error: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::InvalidEnv {
        var: var.to_string(),
        message: error.to_string(),
    }
}
