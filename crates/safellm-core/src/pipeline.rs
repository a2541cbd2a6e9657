//! The pipeline engine.
//!
//! A [`Pipeline`] runs an ordered list of guards over one payload and folds
//! their decisions into a single [`Decision`].
//!
//! ## Step rules
//!
//! | Guard outcome | Effect |
//! |---------------|--------|
//! | allow | merge evidence, data unchanged |
//! | transform | data replaced by the guard output |
//! | deny / retry | recorded; stops the run when `fail_fast` |
//! | defect (error or panic) | `on_error = deny` stops with deny; `continue` records it and goes on |
//!
//! ## Aggregation
//!
//! The final action is the last blocking action recorded, else `transform`
//! if any guard transformed, else `allow`. A blocked run returns the original
//! input; an allowed run returns the final data. Reasons and evidence keep
//! execution order.
//!
//! `validate` and `avalidate` drive the same per-run state machine and
//! differ only in how each guard is invoked.

use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::capability::telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};
use crate::context::Context;
use crate::decision::{Action, Decision};
use crate::error::{ConfigurationError, GuardDefect};
use crate::evidence::{merge_evidence, Evidence, DEFECT_KEY};
use crate::guard::{Guard, GuardResult};

/// What to do when a guard fails unexpectedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Stop and deny
    #[default]
    Deny,
    /// Record the failure, treat the guard as allow, keep going
    Continue,
}

impl FromStr for OnError {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deny" => Ok(OnError::Deny),
            "continue" => Ok(OnError::Continue),
            other => Err(ConfigurationError::invalid(
                "on_error",
                format!("expected deny or continue, got '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stop at the first deny or retry
    pub fail_fast: bool,
    pub on_error: OnError,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fail_fast: true,
            on_error: OnError::Deny,
        }
    }
}

/// An ordered, immutable composition of guards.
///
/// Holds no per-run state; one pipeline can serve concurrent runs.
pub struct Pipeline {
    name: String,
    guards: Vec<Arc<dyn Guard>>,
    config: PipelineConfig,
    telemetry: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("guards", &self.guard_names())
            .field("config", &self.config)
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        guards: Vec<Arc<dyn Guard>>,
        config: PipelineConfig,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigurationError::MissingField("pipeline name".into()));
        }
        if guards.is_empty() {
            return Err(ConfigurationError::EmptyPipeline);
        }

        Ok(Self {
            name,
            guards,
            config,
            telemetry: Arc::new(NoopTelemetry),
        })
    }

    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    pub fn guard_names(&self) -> Vec<&str> {
        self.guards.iter().map(|g| g.name()).collect()
    }

    /// Run every guard with blocking checks.
    ///
    /// A fresh [`Context`] is created when `ctx` is `None`.
    pub fn validate(&self, data: Value, ctx: Option<&Context>) -> Decision {
        let owned;
        let ctx = match ctx {
            Some(ctx) => ctx,
            None => {
                owned = Context::new();
                &owned
            }
        };

        let mut run = Run::new(self, ctx, data);
        for (step, guard) in self.guards.iter().enumerate() {
            let outcome = check_caught(guard.as_ref(), &run.data, ctx);
            if run.step(step, guard.as_ref(), outcome) == Flow::Stop {
                break;
            }
        }
        run.finish(Mode::Sync)
    }

    /// Run every guard with suspending checks.
    ///
    /// Same outcome as [`validate`](Self::validate) for the same input and
    /// context. Dropping the future part-way leaves nothing half applied.
    pub async fn avalidate(&self, data: Value, ctx: Option<&Context>) -> Decision {
        let owned;
        let ctx = match ctx {
            Some(ctx) => ctx,
            None => {
                owned = Context::new();
                &owned
            }
        };

        let mut run = Run::new(self, ctx, data);
        for (step, guard) in self.guards.iter().enumerate() {
            let outcome = acheck_caught(guard.as_ref(), &run.data, ctx).await;
            if run.step(step, guard.as_ref(), outcome) == Flow::Stop {
                break;
            }
        }
        run.finish(Mode::Async)
    }

    fn emit(&self, event: &TelemetryEvent) {
        let sink = &self.telemetry;
        if panic::catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
            tracing::warn!(
                pipeline = %self.name,
                correlation_id = %event.correlation_id,
                "Telemetry sink panicked, event dropped"
            );
        }
    }
}

fn check_caught(guard: &dyn Guard, data: &Value, ctx: &Context) -> GuardResult {
    match panic::catch_unwind(AssertUnwindSafe(|| guard.check(data, ctx))) {
        Ok(result) => result,
        Err(payload) => Err(GuardDefect::from_panic(payload.as_ref())),
    }
}

async fn acheck_caught(guard: &dyn Guard, data: &Value, ctx: &Context) -> GuardResult {
    match AssertUnwindSafe(guard.acheck(data, ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(GuardDefect::from_panic(payload.as_ref())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Sync,
    Async,
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Mode::Sync => "sync",
            Mode::Async => "async",
        }
    }
}

/// Per-call state shared by both drivers.
struct Run<'a> {
    pipeline: &'a Pipeline,
    ctx: &'a Context,
    original: Value,
    data: Value,
    reasons: Vec<String>,
    evidence: Evidence,
    blocking: Option<Action>,
    transformed: bool,
    guards_run: usize,
    defects: usize,
    started: Instant,
}

impl<'a> Run<'a> {
    fn new(pipeline: &'a Pipeline, ctx: &'a Context, data: Value) -> Self {
        tracing::debug!(
            pipeline = %pipeline.name,
            correlation_id = %ctx.correlation_id(),
            guards = pipeline.guards.len(),
            "Pipeline run started"
        );

        Self {
            pipeline,
            ctx,
            original: data.clone(),
            data,
            reasons: Vec::new(),
            evidence: Evidence::new(),
            blocking: None,
            transformed: false,
            guards_run: 0,
            defects: 0,
            started: Instant::now(),
        }
    }

    fn step(&mut self, step: usize, guard: &dyn Guard, outcome: GuardResult) -> Flow {
        self.guards_run += 1;

        let decision = match outcome {
            Ok(decision) => decision,
            Err(defect) => return self.defect(step, guard.name(), defect),
        };

        tracing::debug!(
            pipeline = %self.pipeline.name,
            correlation_id = %self.ctx.correlation_id(),
            guard = guard.name(),
            step,
            action = %decision.action,
            "Guard finished"
        );

        let action = decision.action;
        self.reasons.extend(decision.reasons);
        merge_evidence(&mut self.evidence, decision.evidence);

        match action {
            Action::Allow => Flow::Continue,
            Action::Transform => {
                self.data = decision.output;
                self.transformed = true;
                Flow::Continue
            }
            Action::Deny | Action::Retry => {
                self.blocking = Some(action);
                tracing::info!(
                    pipeline = %self.pipeline.name,
                    correlation_id = %self.ctx.correlation_id(),
                    guard = guard.name(),
                    step,
                    action = %action,
                    "Guard blocked payload"
                );
                if self.pipeline.config.fail_fast {
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
        }
    }

    fn defect(&mut self, step: usize, guard: &str, defect: GuardDefect) -> Flow {
        self.defects += 1;

        tracing::error!(
            pipeline = %self.pipeline.name,
            correlation_id = %self.ctx.correlation_id(),
            guard,
            step,
            kind = %defect.kind,
            error = %defect.message,
            "Guard failed"
        );

        self.reasons
            .push(format!("guard.defect: {} ({})", guard, defect.kind));

        let mut entry = Evidence::new();
        entry.insert(
            DEFECT_KEY.to_string(),
            json!([{
                "guard": guard,
                "kind": defect.kind.as_str(),
                "message": defect.message,
            }]),
        );
        merge_evidence(&mut self.evidence, entry);

        match self.pipeline.config.on_error {
            OnError::Deny => {
                self.blocking = Some(Action::Deny);
                Flow::Stop
            }
            OnError::Continue => Flow::Continue,
        }
    }

    fn finish(self, mode: Mode) -> Decision {
        let decision = match self.blocking {
            Some(Action::Retry) => Decision::retry(self.original, self.reasons, self.ctx),
            Some(_) => Decision::deny(self.original, self.reasons, self.ctx),
            None if self.transformed => Decision::transform(self.data, self.reasons, self.ctx),
            None => Decision {
                reasons: self.reasons,
                ..Decision::allow(self.data, self.ctx)
            },
        }
        .with_evidence_map(self.evidence);

        let duration_ms = self.started.elapsed().as_millis() as u64;

        if decision.allowed {
            tracing::debug!(
                pipeline = %self.pipeline.name,
                correlation_id = %decision.correlation_id,
                action = %decision.action,
                duration_ms,
                "Pipeline run finished"
            );
        } else {
            tracing::info!(
                pipeline = %self.pipeline.name,
                correlation_id = %decision.correlation_id,
                action = %decision.action,
                reasons = decision.reasons.len(),
                duration_ms,
                "Pipeline blocked payload"
            );
        }

        self.pipeline.emit(&TelemetryEvent {
            pipeline: self.pipeline.name.clone(),
            correlation_id: decision.correlation_id.clone(),
            allowed: decision.allowed,
            action: decision.action,
            reasons: decision.reasons.clone(),
            guards_run: self.guards_run,
            defects: self.defects,
            duration_ms,
            mode: mode.as_str().to_string(),
        });

        decision
    }
}

/// Fluent construction of a [`Pipeline`].
pub struct PipelineBuilder {
    name: String,
    guards: Vec<Arc<dyn Guard>>,
    config: PipelineConfig,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guards: Vec::new(),
            config: PipelineConfig::default(),
            telemetry: None,
        }
    }

    pub fn guard(mut self, guard: impl Guard + 'static) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    pub fn shared_guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.config.on_error = on_error;
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn build(self) -> Result<Pipeline, ConfigurationError> {
        let pipeline = Pipeline::new(self.name, self.guards, self.config)?;
        Ok(match self.telemetry {
            Some(sink) => pipeline.with_telemetry(sink),
            None => pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::{LengthConfig, LengthGuard};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns a fixed action, optionally replacing the output.
    struct Fixed {
        name: &'static str,
        action: Action,
        output: Option<Value>,
    }

    impl Fixed {
        fn new(name: &'static str, action: Action) -> Self {
            Self {
                name,
                action,
                output: None,
            }
        }

        fn transform(name: &'static str, output: Value) -> Self {
            Self {
                name,
                action: Action::Transform,
                output: Some(output),
            }
        }
    }

    impl Guard for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
            let output = self.output.clone().unwrap_or_else(|| data.clone());
            let reasons = vec![format!("{}.{}", self.name, self.action)];
            let decision = match self.action {
                Action::Allow => Decision::allow(output, ctx),
                Action::Transform => Decision::transform(output, reasons, ctx),
                Action::Deny => Decision::deny(output, reasons, ctx),
                Action::Retry => Decision::retry(output, reasons, ctx),
            };
            Ok(decision.with_evidence(self.name, json!([self.name])))
        }
    }

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl Guard for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Decision::allow(data.clone(), ctx))
        }
    }

    struct Failing;

    impl Guard for Failing {
        fn name(&self) -> &str {
            "flaky"
        }

        fn check(&self, _data: &Value, _ctx: &Context) -> GuardResult {
            Err(GuardDefect::capability("classifier unreachable"))
        }
    }

    struct Panicking;

    impl Guard for Panicking {
        fn name(&self) -> &str {
            "panicky"
        }

        fn check(&self, _data: &Value, _ctx: &Context) -> GuardResult {
            panic!("index out of range")
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    impl TelemetrySink for Recorder {
        fn emit(&self, event: &TelemetryEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    struct ExplodingSink;

    impl TelemetrySink for ExplodingSink {
        fn emit(&self, _event: &TelemetryEvent) {
            panic!("sink down")
        }
    }

    fn pipeline(guards: Vec<Arc<dyn Guard>>, config: PipelineConfig) -> Pipeline {
        Pipeline::new("test", guards, config).unwrap()
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        assert!(matches!(
            Pipeline::new("p", vec![], PipelineConfig::default()),
            Err(ConfigurationError::EmptyPipeline)
        ));
        assert!(Pipeline::builder("").guard(Counting::default()).build().is_err());
    }

    #[test]
    fn test_length_deny() {
        let p = Pipeline::builder("length")
            .guard(LengthGuard::max_chars(5))
            .build()
            .unwrap();
        let decision = p.validate(json!("hello world"), None);

        assert!(!decision.allowed);
        assert_eq!(decision.action, Action::Deny);
        assert!(decision.reasons[0].starts_with("length.max_chars_exceeded"));
        assert_eq!(decision.output, json!("hello world"));
    }

    #[test]
    fn test_transform_chain() {
        let p = pipeline(
            vec![
                Arc::new(Fixed::new("a", Action::Allow)),
                Arc::new(Fixed::transform("b", json!("X"))),
                Arc::new(Fixed::new("c", Action::Allow)),
            ],
            PipelineConfig::default(),
        );
        let decision = p.validate(json!("input"), None);

        assert!(decision.allowed);
        assert_eq!(decision.action, Action::Transform);
        assert_eq!(decision.output, json!("X"));
        assert_eq!(decision.evidence.len(), 3);
    }

    #[test]
    fn test_fail_fast_skips_later_guards() {
        let counter = Arc::new(Counting::default());
        let p = pipeline(
            vec![Arc::new(Fixed::new("gate", Action::Deny)), counter.clone()],
            PipelineConfig::default(),
        );
        p.validate(json!("x"), None);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);

        let counter = Arc::new(Counting::default());
        let p = pipeline(
            vec![Arc::new(Fixed::new("gate", Action::Deny)), counter.clone()],
            PipelineConfig {
                fail_fast: false,
                ..Default::default()
            },
        );
        let decision = p.validate(json!("x"), None);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(decision.action, Action::Deny);
    }

    #[test]
    fn test_deny_after_transform_returns_original() {
        let p = pipeline(
            vec![
                Arc::new(Fixed::transform("rewrite", json!("changed"))),
                Arc::new(Fixed::new("gate", Action::Deny)),
            ],
            PipelineConfig::default(),
        );
        let decision = p.validate(json!("original"), None);
        assert_eq!(decision.action, Action::Deny);
        assert_eq!(decision.output, json!("original"));
    }

    #[test]
    fn test_retry_preserved_unless_later_deny() {
        let config = PipelineConfig {
            fail_fast: false,
            ..Default::default()
        };

        let p = pipeline(
            vec![
                Arc::new(Fixed::new("ask_again", Action::Retry)),
                Arc::new(Fixed::new("fine", Action::Allow)),
            ],
            config,
        );
        let decision = p.validate(json!("x"), None);
        assert_eq!(decision.action, Action::Retry);
        assert!(!decision.allowed);

        let p = pipeline(
            vec![
                Arc::new(Fixed::new("ask_again", Action::Retry)),
                Arc::new(Fixed::new("gate", Action::Deny)),
            ],
            config,
        );
        let decision = p.validate(json!("x"), None);
        assert_eq!(decision.action, Action::Deny);
        assert_eq!(decision.reasons, vec!["ask_again.retry", "gate.deny"]);
    }

    #[test]
    fn test_defect_denies_by_default() {
        let counter = Arc::new(Counting::default());
        let p = pipeline(vec![Arc::new(Failing), counter.clone()], PipelineConfig::default());
        let decision = p.validate(json!("x"), None);

        assert!(!decision.allowed);
        assert_eq!(decision.action, Action::Deny);
        assert_eq!(decision.reasons, vec!["guard.defect: flaky (capability)"]);
        assert_eq!(
            decision.evidence[DEFECT_KEY],
            json!([{"guard": "flaky", "kind": "capability", "message": "classifier unreachable"}])
        );
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_defect_continue() {
        let counter = Arc::new(Counting::default());
        let p = pipeline(
            vec![Arc::new(Failing), counter.clone()],
            PipelineConfig {
                on_error: OnError::Continue,
                ..Default::default()
            },
        );
        let decision = p.validate(json!("x"), None);

        assert!(decision.allowed);
        assert_eq!(decision.action, Action::Allow);
        assert_eq!(decision.reasons.len(), 1);
        assert!(decision.reasons[0].contains("flaky"));
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_is_a_defect() {
        let p = pipeline(vec![Arc::new(Panicking)], PipelineConfig::default());
        let decision = p.validate(json!("x"), None);
        assert_eq!(decision.reasons, vec!["guard.defect: panicky (panic)"]);
        assert_eq!(decision.evidence[DEFECT_KEY][0]["message"], json!("index out of range"));
    }

    #[test]
    fn test_correlation_id_from_context() {
        let p = pipeline(vec![Arc::new(Counting::default())], PipelineConfig::default());
        let ctx = Context::new().with_correlation_id("req-7");
        assert_eq!(p.validate(json!("x"), Some(&ctx)).correlation_id, "req-7");
        assert!(!p.validate(json!("x"), None).correlation_id.is_empty());
    }

    #[test]
    fn test_telemetry_emitted_once() {
        let recorder = Arc::new(Recorder::default());
        let p = Pipeline::builder("observed")
            .guard(Fixed::new("gate", Action::Deny))
            .guard(Counting::default())
            .telemetry(recorder.clone())
            .build()
            .unwrap();
        p.validate(json!("x"), None);

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pipeline, "observed");
        assert_eq!(events[0].guards_run, 1);
        assert_eq!(events[0].action, Action::Deny);
        assert_eq!(events[0].mode, "sync");
    }

    #[test]
    fn test_panicking_sink_is_swallowed() {
        let p = Pipeline::builder("p")
            .guard(Counting::default())
            .telemetry(Arc::new(ExplodingSink))
            .build()
            .unwrap();
        assert!(p.validate(json!("x"), None).allowed);
    }

    #[test]
    fn test_on_error_from_str() {
        assert_eq!("Continue".parse::<OnError>().unwrap(), OnError::Continue);
        assert!("ignore".parse::<OnError>().is_err());
    }

    #[tokio::test]
    async fn test_sync_async_parity() {
        let guards: Vec<Arc<dyn Guard>> = vec![
            Arc::new(LengthGuard::new(LengthConfig { max_chars: Some(100), ..Default::default() }).unwrap()),
            Arc::new(Fixed::transform("rewrite", json!("X"))),
            Arc::new(Failing),
            Arc::new(Fixed::new("gate", Action::Retry)),
            Arc::new(Panicking),
        ];

        for config in [
            PipelineConfig::default(),
            PipelineConfig { fail_fast: false, on_error: OnError::Continue },
            PipelineConfig { fail_fast: true, on_error: OnError::Continue },
        ] {
            let p = pipeline(guards.clone(), config);
            let ctx = Context::new();
            let sync = p.validate(json!("payload"), Some(&ctx));
            let not_sync = p.avalidate(json!("payload"), Some(&ctx)).await;
            assert_eq!(sync, not_sync);
        }
    }

    #[tokio::test]
    async fn test_async_fail_fast() {
        let counter = Arc::new(Counting::default());
        let p = pipeline(
            vec![Arc::new(Fixed::new("gate", Action::Deny)), counter.clone()],
            PipelineConfig::default(),
        );
        let decision = p.avalidate(json!("x"), None).await;
        assert_eq!(decision.action, Action::Deny);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }
}
