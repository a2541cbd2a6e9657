//! `safellm` - run a guard pipeline over model output from a file or stdin.
//!
//! Prints the decision as JSON on stdout. Exits 0 when the output is
//! allowed (possibly transformed) and 2 when it is denied or needs a retry.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use safellm_core::{
    Context, FormatConfig, FormatGuard, FormatKind, InjectionConfig, LengthConfig, LengthGuard,
    MarkupConfig, MarkupGuard, OnError, PiiConfig, PiiGuard, Pipeline, ProfanityConfig,
    ProfanityGuard, PromptInjectionGuard, RedactionMode, SchemaGuard, SecretsConfig, SecretsGuard,
    ToxicityConfig, ToxicityGuard,
};
use safellm_runtime::{RuntimeConfig, TracingTelemetry};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "safellm")]
#[command(about = "Validate and sanitize language model output")]
#[command(version)]
struct Cli {
    /// Read input from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Parse the input as JSON instead of treating it as text
    #[arg(long)]
    json: bool,

    /// Deny input longer than this many characters
    #[arg(long)]
    max_chars: Option<usize>,

    /// Deny input with more than this many whitespace tokens
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Redact PII; the mode defaults to SAFELLM_REDACTION_MODE
    #[arg(long, value_name = "MODE", num_args = 0..=1)]
    pii: Option<Option<RedactionMode>>,

    /// Mask API keys, tokens and passwords
    #[arg(long)]
    secrets: bool,

    /// Deny prompt injection attempts
    #[arg(long)]
    injection: bool,

    /// Deny threats, harassment and other toxic content
    #[arg(long)]
    toxicity: bool,

    /// Require the whole input to be one value of this format
    #[arg(long, value_name = "KIND")]
    format: Option<FormatKind>,

    /// Regex the whole input must match, for --format custom
    #[arg(long, value_name = "REGEX", requires = "format")]
    format_pattern: Option<String>,

    /// Mask profanity
    #[arg(long)]
    profanity: bool,

    /// Strip markup down to the strict allow-list
    #[arg(long)]
    markup: bool,

    /// Validate the input against a JSON Schema file
    #[arg(long, value_name = "FILE")]
    schema: Option<PathBuf>,

    /// Run every guard even after a deny
    #[arg(long)]
    no_fail_fast: bool,

    /// What a failing guard does to the run: deny or continue
    #[arg(long)]
    on_error: Option<OnError>,

    /// User role recorded in the run context
    #[arg(long)]
    user_role: Option<String>,

    /// Use the async pipeline entry point
    #[arg(long = "async")]
    run_async: bool,
}

impl Cli {
    fn runtime_config(&self, mut config: RuntimeConfig) -> RuntimeConfig {
        if self.no_fail_fast {
            config.pipeline.fail_fast = false;
        }
        if let Some(on_error) = self.on_error {
            config.pipeline.on_error = on_error;
        }
        if let Some(Some(mode)) = self.pii {
            config.redaction_mode = mode;
        }
        config
    }

    fn build_pipeline(&self, config: &RuntimeConfig) -> Result<Pipeline> {
        let mut builder = Pipeline::builder("cli")
            .config(config.pipeline)
            .telemetry(Arc::new(TracingTelemetry));

        if let Some(path) = &self.schema {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read schema {}", path.display()))?;
            let schema: Value = serde_json::from_str(&raw)
                .with_context(|| format!("schema {} is not valid JSON", path.display()))?;
            builder = builder.guard(SchemaGuard::from_schema(&schema)?);
        }
        if let Some(format) = self.format {
            builder = builder.guard(FormatGuard::new(FormatConfig {
                pattern: self.format_pattern.clone(),
                ..FormatConfig::new(format)
            })?);
        }
        if self.secrets {
            builder = builder.guard(SecretsGuard::new(SecretsConfig::default())?);
        }
        if self.pii.is_some() {
            let pii = PiiConfig::default().with_mode(config.redaction_mode);
            builder = builder.guard(PiiGuard::new(pii)?);
        }
        if self.injection {
            builder = builder.guard(PromptInjectionGuard::new(InjectionConfig::default())?);
        }
        if self.toxicity {
            builder = builder.guard(ToxicityGuard::new(ToxicityConfig::default())?);
        }
        if self.profanity {
            builder = builder.guard(ProfanityGuard::new(ProfanityConfig::default())?);
        }
        if self.markup {
            builder = builder.guard(MarkupGuard::new(MarkupConfig::default())?);
        }
        if self.max_chars.is_some() || self.max_tokens.is_some() {
            builder = builder.guard(LengthGuard::new(LengthConfig {
                max_chars: self.max_chars,
                max_tokens: self.max_tokens,
                ..Default::default()
            })?);
        }

        builder.build().context("no guards selected; pass at least one guard flag")
    }

    fn read_input(&self) -> Result<Value> {
        let raw = match &self.input {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("failed to read stdin")?;
                buf
            }
        };

        if self.json {
            serde_json::from_str(&raw).context("input is not valid JSON")
        } else {
            Ok(Value::String(raw))
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.runtime_config(RuntimeConfig::from_env()?);
    let pipeline = cli.build_pipeline(&config)?;
    let data = cli.read_input()?;

    let mut ctx = Context::new();
    if let Some(role) = &cli.user_role {
        ctx = ctx.with_user_role(role.clone());
    }

    tracing::debug!(
        guards = ?pipeline.guard_names(),
        run_async = cli.run_async,
        "Running pipeline"
    );

    let decision = if cli.run_async {
        pipeline.avalidate(data, Some(&ctx)).await
    } else {
        pipeline.validate(data, Some(&ctx))
    };

    println!("{}", serde_json::to_string_pretty(&decision)?);

    Ok(if decision.allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
