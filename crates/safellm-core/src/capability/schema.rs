//! Structural schema validation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigurationError, GuardDefect};

/// One schema violation, located by JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    /// JSON pointer into the instance, `/` for the root
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validates a JSON value against a fixed schema.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), Vec<SchemaViolation>>;
}

/// Validates a JSON value through an external, asynchronous service.
///
/// An empty list means the value is valid. `Err` is a capability failure,
/// not a violation.
#[async_trait]
pub trait AsyncSchemaValidator: Send + Sync {
    async fn validate(&self, value: &Value) -> Result<Vec<SchemaViolation>, GuardDefect>;
}

/// [`SchemaValidator`] backed by a compiled JSON Schema.
pub struct JsonSchemaValidator {
    validator: jsonschema::Validator,
}

impl JsonSchemaValidator {
    /// Compile `schema`. An invalid schema is rejected here, never at
    /// validation time.
    pub fn new(schema: &Value) -> Result<Self, ConfigurationError> {
        let validator = jsonschema::options()
            .build(schema)
            .map_err(|e| ConfigurationError::InvalidSchema(e.to_string()))?;
        Ok(Self { validator })
    }
}

impl std::fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchemaValidator").finish_non_exhaustive()
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, value: &Value) -> Result<(), Vec<SchemaViolation>> {
        let violations: Vec<SchemaViolation> = self
            .validator
            .iter_errors(value)
            .map(|e| {
                let path = e.instance_path.to_string();
                let path = if path.is_empty() { "/".to_string() } else { path };
                SchemaViolation::new(path, e.to_string())
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
