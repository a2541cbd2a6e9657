//! Per-run request context.
//!
//! A [`Context`] is owned by the caller and handed to every guard by shared
//! reference, so guards can read it but never change it. The correlation
//! identifier is fixed when the context is built and links the final
//! [`Decision`](crate::Decision) to logs and telemetry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Request metadata shared by all guards in one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    correlation_id: String,
    model: Option<String>,
    user_role: Option<String>,
    purpose: Option<String>,
    trace_id: Option<String>,
    seed: Option<u64>,
    created_at: DateTime<Utc>,
    metadata: BTreeMap<String, Value>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            model: None,
            user_role: None,
            purpose: None,
            trace_id: None,
            seed: None,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }
}

impl Context {
    /// Create a new context with a fresh correlation ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-supplied correlation ID instead of a generated one.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_user_role(mut self, role: impl Into<String>) -> Self {
        self.user_role = Some(role.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Add a metadata entry. Existing keys are never overwritten.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.append_metadata(key, value);
        self
    }

    /// Append a metadata entry between runs.
    ///
    /// Returns `false` and leaves the context untouched if the key exists.
    pub fn append_metadata(&mut self, key: impl Into<String>, value: Value) -> bool {
        use std::collections::btree_map::Entry;

        match self.metadata.entry(key.into()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Copy this context, keeping its identity and merging extra metadata.
    pub fn derive(&self, metadata: BTreeMap<String, Value>) -> Self {
        let mut copy = self.clone();
        for (key, value) in metadata {
            copy.append_metadata(key, value);
        }
        copy
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn user_role(&self) -> Option<&str> {
        self.user_role.as_deref()
    }

    pub fn purpose(&self) -> Option<&str> {
        self.purpose.as_deref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}
