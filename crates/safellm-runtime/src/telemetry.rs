//! Telemetry sink that writes pipeline runs to `tracing`.

use safellm_core::{TelemetryEvent, TelemetrySink};

/// Emits one `info` event per pipeline run, or `warn` when the run was
/// blocked.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: &TelemetryEvent) {
        if event.allowed {
            tracing::info!(
                pipeline = %event.pipeline,
                correlation_id = %event.correlation_id,
                action = %event.action,
                guards_run = event.guards_run,
                defects = event.defects,
                duration_ms = event.duration_ms,
                mode = %event.mode,
                "Pipeline run completed"
            );
        } else {
            tracing::warn!(
                pipeline = %event.pipeline,
                correlation_id = %event.correlation_id,
                action = %event.action,
                reasons = ?event.reasons,
                guards_run = event.guards_run,
                defects = event.defects,
                duration_ms = event.duration_ms,
                mode = %event.mode,
                "Pipeline run blocked"
            );
        }
    }
}
