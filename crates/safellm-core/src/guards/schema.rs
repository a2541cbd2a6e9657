//! Schema Guards
//!
//! Check structured output against a schema through the
//! [`SchemaValidator`] or [`AsyncSchemaValidator`] capability.
//!
//! String payloads are parsed as JSON first. A string that is not JSON is
//! denied with `schema.invalid_json`; a string that parses and validates is
//! passed on as the parsed value (transform). Non-string payloads are
//! validated as-is and allowed unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::capability::schema::{AsyncSchemaValidator, JsonSchemaValidator, SchemaValidator, SchemaViolation};
use crate::context::Context;
use crate::decision::Decision;
use crate::error::ConfigurationError;
use crate::guard::{Guard, GuardResult};

/// Payload ready for validation.
enum Parsed {
    FromString(Value),
    Structured(Value),
}

impl Parsed {
    fn value(&self) -> &Value {
        match self {
            Parsed::FromString(v) | Parsed::Structured(v) => v,
        }
    }
}

fn parse(data: &Value) -> Result<Parsed, String> {
    match data {
        Value::String(text) => serde_json::from_str(text)
            .map(Parsed::FromString)
            .map_err(|e| e.to_string()),
        other => Ok(Parsed::Structured(other.clone())),
    }
}

fn invalid_json(data: &Value, error: String, ctx: &Context) -> Decision {
    Decision::deny(data.clone(), vec![format!("schema.invalid_json: {}", error)], ctx)
}

fn verdict(data: &Value, parsed: Parsed, violations: Vec<SchemaViolation>, ctx: &Context) -> Decision {
    if !violations.is_empty() {
        let reasons = violations
            .iter()
            .map(|v| format!("schema.violation: {}", v))
            .collect();
        let errors: Vec<Value> = violations
            .iter()
            .map(|v| json!({"path": v.path, "message": v.message}))
            .collect();
        return Decision::deny(data.clone(), reasons, ctx).with_evidence("schema_errors", Value::Array(errors));
    }

    match parsed {
        Parsed::FromString(value) => Decision::transform(value, Vec::new(), ctx),
        Parsed::Structured(_) => Decision::allow(data.clone(), ctx),
    }
}

/// Validates against a synchronous [`SchemaValidator`].
#[derive(Clone)]
pub struct SchemaGuard {
    validator: Arc<dyn SchemaValidator>,
}

impl SchemaGuard {
    pub fn new(validator: Arc<dyn SchemaValidator>) -> Self {
        Self { validator }
    }

    /// Compile a JSON Schema and validate against it.
    pub fn from_schema(schema: &Value) -> Result<Self, ConfigurationError> {
        Ok(Self::new(Arc::new(JsonSchemaValidator::new(schema)?)))
    }
}

impl Guard for SchemaGuard {
    fn name(&self) -> &str {
        "schema"
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        let parsed = match parse(data) {
            Ok(parsed) => parsed,
            Err(error) => return Ok(invalid_json(data, error, ctx)),
        };

        let violations = self.validator.validate(parsed.value()).err().unwrap_or_default();
        Ok(verdict(data, parsed, violations, ctx))
    }
}

/// Validates against an [`AsyncSchemaValidator`].
///
/// The blocking `check` drives `acheck` on a local executor, so it must not
/// be called from inside an async runtime worker.
#[derive(Clone)]
pub struct AsyncSchemaGuard {
    validator: Arc<dyn AsyncSchemaValidator>,
}

impl AsyncSchemaGuard {
    pub fn new(validator: Arc<dyn AsyncSchemaValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Guard for AsyncSchemaGuard {
    fn name(&self) -> &str {
        "async_schema"
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        futures::executor::block_on(self.acheck(data, ctx))
    }

    async fn acheck(&self, data: &Value, ctx: &Context) -> GuardResult {
        let parsed = match parse(data) {
            Ok(parsed) => parsed,
            Err(error) => return Ok(invalid_json(data, error, ctx)),
        };

        let violations = self.validator.validate(parsed.value()).await?;
        Ok(verdict(data, parsed, violations, ctx))
    }
}
