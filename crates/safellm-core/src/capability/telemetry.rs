//! Telemetry hook fired once per pipeline run.

use serde::{Deserialize, Serialize};

use crate::decision::Action;

/// Summary of one pipeline run. Carries no payload text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub pipeline: String,
    pub correlation_id: String,
    pub allowed: bool,
    pub action: Action,
    pub reasons: Vec<String>,
    /// Guards that actually ran; lower than the pipeline size after fail-fast
    pub guards_run: usize,
    pub defects: usize,
    pub duration_ms: u64,
    /// `sync` or `async`
    pub mode: String,
}

/// Receives telemetry events.
///
/// Emission is fire-and-forget: the pipeline ignores whatever a sink does,
/// including panicking.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &TelemetryEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _event: &TelemetryEvent) {}
}
