//! Capability interfaces for external collaborators.
//!
//! Guards that need work done outside this crate (structural schema
//! validation, markup sanitization) and the pipeline's telemetry hook
//! depend on these traits only. Each trait ships with one thin adapter.

pub mod markup;
pub mod schema;
pub mod telemetry;

pub use markup::{Allowlist, MarkupSanitizer, TagStripSanitizer};
pub use schema::{AsyncSchemaValidator, JsonSchemaValidator, SchemaValidator, SchemaViolation};
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};
