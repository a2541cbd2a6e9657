//! Rate Limit Guard
//!
//! Sliding-window request limiting per key. Exceeding the window blocks the
//! key for a fixed duration.
//!
//! Unlike every other guard this one holds mutable state: per-key request
//! history behind a `parking_lot::Mutex`. A single instance shared by many
//! pipelines counts all of their runs together. Keys with no request left in
//! the window and no active block are dropped on the next check.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use safellm_core::{ConfigurationError, Context, Decision, Guard, GuardResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;

/// Which context field requests are counted against.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateKey {
    /// `ctx.user_role`, `anonymous` when unset
    #[default]
    UserRole,
    CorrelationId,
    /// A metadata entry, `default` when absent
    Metadata(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    #[serde(with = "human_duration")]
    pub window: Duration,
    #[serde(with = "human_duration")]
    pub block_duration: Duration,
    pub key: RateKey,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(3600),
            block_duration: Duration::from_secs(300),
            key: RateKey::UserRole,
        }
    }
}

mod human_duration {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

#[derive(Debug, Default)]
struct KeyState {
    requests: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl KeyState {
    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        let blocked = self.blocked_until.is_some_and(|until| now < until);
        let recent = self
            .requests
            .back()
            .is_some_and(|last| now.duration_since(*last) <= window);
        !blocked && !recent
    }
}

pub struct RateLimitGuard {
    config: RateLimitConfig,
    state: Mutex<HashMap<String, KeyState>>,
}

impl RateLimitGuard {
    pub fn new(config: RateLimitConfig) -> Result<Self, ConfigurationError> {
        if config.max_requests == 0 {
            return Err(ConfigurationError::invalid("max_requests", "must be at least 1"));
        }
        if config.window.is_zero() {
            return Err(ConfigurationError::invalid("window", "must be longer than zero"));
        }
        if let RateKey::Metadata(name) = &config.key {
            if name.is_empty() {
                return Err(ConfigurationError::invalid("key", "metadata key name is empty"));
            }
        }

        Ok(Self {
            config,
            state: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn rate_key(&self, ctx: &Context) -> String {
        match &self.config.key {
            RateKey::UserRole => ctx.user_role().unwrap_or("anonymous").to_string(),
            RateKey::CorrelationId => ctx.correlation_id().to_string(),
            RateKey::Metadata(name) => match ctx.metadata().get(name) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "default".to_string(),
            },
        }
    }

    /// Number of keys with live history or an active block.
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().len()
    }

    /// Forget all history and blocks.
    pub fn reset(&self) {
        self.state.lock().clear();
    }
}

impl Guard for RateLimitGuard {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
        let key = self.rate_key(ctx);
        let now = Instant::now();
        let window = self.config.window;
        let mut state = self.state.lock();
        state.retain(|_, keyed| !keyed.is_stale(now, window));
        let entry = state.entry(key.clone()).or_default();

        if let Some(until) = entry.blocked_until {
            if now < until {
                let remaining = until.duration_since(now).as_secs();
                tracing::debug!(
                    correlation_id = ctx.correlation_id(),
                    guard = "rate_limit",
                    remaining_secs = remaining,
                    "Key still blocked"
                );
                return Ok(Decision::deny(
                    data.clone(),
                    vec![format!(
                        "rate_limit.exceeded: blocked for {} more second(s)",
                        remaining
                    )],
                    ctx,
                )
                .with_evidence("rate_key", json!(key))
                .with_evidence("remaining_seconds", json!(remaining)));
            }
            entry.blocked_until = None;
        }

        while let Some(oldest) = entry.requests.front() {
            if now.duration_since(*oldest) > window {
                entry.requests.pop_front();
            } else {
                break;
            }
        }

        if entry.requests.len() >= self.config.max_requests {
            entry.blocked_until = Some(now + self.config.block_duration);
            tracing::warn!(
                correlation_id = ctx.correlation_id(),
                guard = "rate_limit",
                requests = entry.requests.len(),
                "Rate limit exceeded, blocking key"
            );
            return Ok(Decision::deny(
                data.clone(),
                vec![format!(
                    "rate_limit.exceeded: {} request(s) per {}",
                    self.config.max_requests,
                    humantime::format_duration(self.config.window)
                )],
                ctx,
            )
            .with_evidence("rate_key", json!(key))
            .with_evidence("requests_in_window", json!(entry.requests.len()))
            .with_evidence("max_requests", json!(self.config.max_requests))
            .with_evidence("window_seconds", json!(self.config.window.as_secs()))
            .with_evidence(
                "blocked_for_seconds",
                json!(self.config.block_duration.as_secs()),
            ));
        }

        entry.requests.push_back(now);
        let in_window = entry.requests.len();

        Ok(Decision::allow(data.clone(), ctx)
            .with_evidence("rate_key", json!(key))
            .with_evidence("requests_in_window", json!(in_window))
            .with_evidence(
                "requests_remaining",
                json!(self.config.max_requests - in_window),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safellm_core::Action;

    fn guard(max_requests: usize, window: u64, block: u64) -> RateLimitGuard {
        RateLimitGuard::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(window),
            block_duration: Duration::from_secs(block),
            key: RateKey::UserRole,
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_zero_requests() {
        let result = RateLimitGuard::new(RateLimitConfig {
            max_requests: 0,
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty_metadata_key() {
        let result = RateLimitGuard::new(RateLimitConfig {
            key: RateKey::Metadata(String::new()),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_until_limit() {
        let guard = guard(2, 60, 300);
        let ctx = Context::new().with_user_role("analyst");

        let first = guard.check(&json!("a"), &ctx).unwrap();
        assert_eq!(first.action, Action::Allow);
        assert_eq!(first.evidence["requests_remaining"], json!(1));

        let second = guard.check(&json!("b"), &ctx).unwrap();
        assert_eq!(second.action, Action::Allow);

        let third = guard.check(&json!("c"), &ctx).unwrap();
        assert_eq!(third.action, Action::Deny);
        assert!(third.reasons[0].starts_with("rate_limit.exceeded"));
        assert_eq!(third.evidence["rate_key"], json!("analyst"));
        assert_eq!(third.output, json!("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_expires() {
        let guard = guard(1, 60, 300);
        let ctx = Context::new().with_user_role("analyst");

        guard.check(&json!("a"), &ctx).unwrap();
        assert_eq!(guard.check(&json!("b"), &ctx).unwrap().action, Action::Deny);

        tokio::time::advance(Duration::from_secs(100)).await;
        let blocked = guard.check(&json!("c"), &ctx).unwrap();
        assert_eq!(blocked.action, Action::Deny);
        assert_eq!(blocked.evidence["remaining_seconds"], json!(200));

        tokio::time::advance(Duration::from_secs(201)).await;
        assert_eq!(guard.check(&json!("d"), &ctx).unwrap().action, Action::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let guard = guard(2, 60, 300);
        let ctx = Context::new();

        guard.check(&json!("a"), &ctx).unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        guard.check(&json!("b"), &ctx).unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        let decision = guard.check(&json!("c"), &ctx).unwrap();
        assert_eq!(decision.action, Action::Allow);
        assert_eq!(decision.evidence["requests_in_window"], json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let guard = guard(1, 60, 300);
        let alice = Context::new().with_user_role("alice");
        let bob = Context::new().with_user_role("bob");

        guard.check(&json!("a"), &alice).unwrap();
        assert_eq!(guard.check(&json!("b"), &alice).unwrap().action, Action::Deny);
        assert_eq!(guard.check(&json!("c"), &bob).unwrap().action, Action::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_are_dropped() {
        let guard = RateLimitGuard::new(RateLimitConfig {
            max_requests: 5,
            window: Duration::from_secs(60),
            key: RateKey::CorrelationId,
            ..Default::default()
        })
        .unwrap();

        for _ in 0..1000 {
            guard.check(&json!("x"), &Context::new()).unwrap();
        }
        assert_eq!(guard.tracked_keys(), 1000);

        tokio::time::advance(Duration::from_secs(61)).await;
        guard.check(&json!("x"), &Context::new()).unwrap();
        assert_eq!(guard.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_key_outlives_window() {
        let guard = guard(1, 60, 300);
        let ctx = Context::new().with_user_role("analyst");

        guard.check(&json!("a"), &ctx).unwrap();
        guard.check(&json!("b"), &ctx).unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;

        let other = Context::new().with_user_role("other");
        guard.check(&json!("c"), &other).unwrap();
        assert_eq!(guard.tracked_keys(), 2);
        assert_eq!(guard.check(&json!("d"), &ctx).unwrap().action, Action::Deny);
    }

    #[test]
    fn test_metadata_key() {
        let guard = RateLimitGuard::new(RateLimitConfig {
            key: RateKey::Metadata("tenant".into()),
            ..Default::default()
        })
        .unwrap();

        let ctx = Context::new().with_metadata("tenant", json!("acme"));
        let decision = guard.check(&json!("x"), &ctx).unwrap();
        assert_eq!(decision.evidence["rate_key"], json!("acme"));

        let decision = guard.check(&json!("x"), &Context::new()).unwrap();
        assert_eq!(decision.evidence["rate_key"], json!("default"));
    }

    #[test]
    fn test_anonymous_fallback() {
        let guard = RateLimitGuard::new(RateLimitConfig::default()).unwrap();
        let decision = guard.check(&json!("x"), &Context::new()).unwrap();
        assert_eq!(decision.evidence["rate_key"], json!("anonymous"));
    }

    #[test]
    fn test_config_durations_deserialize() {
        let config: RateLimitConfig =
            serde_json::from_value(json!({"max_requests": 5, "window": "1m", "block_duration": "30s"}))
                .unwrap();
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.block_duration, Duration::from_secs(30));
        assert_eq!(config.key, RateKey::UserRole);
    }
}
