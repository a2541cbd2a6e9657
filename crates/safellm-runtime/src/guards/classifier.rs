//! Classifier Guard
//!
//! Awaits an externally supplied [`Classifier`] under a timeout and blocks
//! labels from a configured set. Failures and timeouts are reported as
//! defects so the pipeline's `on_error` policy decides the outcome; a
//! shared [`CircuitBreaker`] stops calling a classifier that keeps failing.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use safellm_core::{
    payload_text, ConfigurationError, Context, Decision, Guard, GuardDefect, GuardResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::resilience::CircuitBreaker;

/// Label assigned to a text by a [`Classifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    /// Confidence in `[0.0, 1.0]`
    pub score: f64,
}

impl Classification {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),
}

/// External text classifier, e.g. a moderation endpoint.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Guard name; also the circuit breaker key
    pub name: String,
    pub blocked_labels: BTreeSet<String>,
    pub threshold: f64,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Ask for a retry instead of denying
    pub retry_on_block: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            name: "classifier".to_string(),
            blocked_labels: BTreeSet::new(),
            threshold: 0.8,
            timeout: Duration::from_secs(5),
            retry_on_block: false,
        }
    }
}

impl ClassifierConfig {
    pub fn blocking<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked_labels: labels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

pub struct ClassifierGuard {
    config: ClassifierConfig,
    classifier: Arc<dyn Classifier>,
    breaker: Arc<CircuitBreaker>,
}

impl ClassifierGuard {
    pub fn new(
        config: ClassifierConfig,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self, ConfigurationError> {
        if config.name.trim().is_empty() {
            return Err(ConfigurationError::MissingField("name".into()));
        }
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(ConfigurationError::invalid(
                "threshold",
                format!("{} is outside [0, 1]", config.threshold),
            ));
        }
        if config.timeout.is_zero() {
            return Err(ConfigurationError::invalid("timeout", "must be longer than zero"));
        }

        Ok(Self {
            config,
            classifier,
            breaker: Arc::new(CircuitBreaker::default()),
        })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Share a breaker with other guards instead of owning one.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn verdict(&self, data: &Value, classification: Classification, ctx: &Context) -> Decision {
        let evidence = json!({
            "label": classification.label,
            "score": classification.score,
        });

        let blocked = self.config.blocked_labels.contains(&classification.label)
            && classification.score >= self.config.threshold;
        if !blocked {
            return Decision::allow(data.clone(), ctx).with_evidence("classification", evidence);
        }

        let reasons = vec![format!(
            "classifier.blocked: {} ({:.2})",
            classification.label, classification.score
        )];
        let decision = if self.config.retry_on_block {
            Decision::retry(data.clone(), reasons, ctx)
        } else {
            Decision::deny(data.clone(), reasons, ctx)
        };
        decision.with_evidence("classification", evidence)
    }
}

#[async_trait]
impl Guard for ClassifierGuard {
    fn name(&self) -> &str {
        &self.config.name
    }

    /// Blocking form. Drives the classifier on a private current-thread
    /// runtime, so it must not be called from inside a tokio runtime; use
    /// `Pipeline::avalidate` there.
    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(GuardDefect::internal(
                "classifier cannot block inside an async runtime, use avalidate",
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| GuardDefect::internal(format!("failed to start runtime: {}", e)))?;
        runtime.block_on(self.acheck(data, ctx))
    }

    async fn acheck(&self, data: &Value, ctx: &Context) -> GuardResult {
        let name = self.config.name.as_str();
        if !self.breaker.allows(name) {
            tracing::debug!(
                correlation_id = ctx.correlation_id(),
                guard = name,
                "Circuit open, skipping classifier"
            );
            return Err(GuardDefect::capability(format!("circuit open for {}", name)));
        }

        let text = payload_text(data);
        match tokio::time::timeout(self.config.timeout, self.classifier.classify(&text)).await {
            Err(_) => {
                self.breaker.record_failure(name);
                tracing::warn!(
                    correlation_id = ctx.correlation_id(),
                    guard = name,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "Classifier timed out"
                );
                Err(GuardDefect::timeout(format!(
                    "classifier did not answer within {:?}",
                    self.config.timeout
                )))
            }
            Ok(Err(error)) => {
                self.breaker.record_failure(name);
                tracing::warn!(
                    correlation_id = ctx.correlation_id(),
                    guard = name,
                    error = %error,
                    "Classifier failed"
                );
                Err(GuardDefect::capability(error.to_string()))
            }
            Ok(Ok(classification)) if !(0.0..=1.0).contains(&classification.score) => {
                self.breaker.record_failure(name);
                tracing::warn!(
                    correlation_id = ctx.correlation_id(),
                    guard = name,
                    score = classification.score,
                    "Classifier score out of range"
                );
                Err(GuardDefect::capability(format!(
                    "score {} is outside [0, 1]",
                    classification.score
                )))
            }
            Ok(Ok(classification)) => {
                self.breaker.record_success(name);
                Ok(self.verdict(data, classification, ctx))
            }
        }
    }
}
