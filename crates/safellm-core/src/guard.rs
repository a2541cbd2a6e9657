//! The guard contract.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::Context;
use crate::decision::Decision;
use crate::error::GuardDefect;

/// Result of a single guard check.
pub type GuardResult = Result<Decision, GuardDefect>;

/// A single validation unit in a [`Pipeline`](crate::Pipeline).
///
/// # Contract
/// - MUST NOT mutate shared state; configuration is fixed at construction
/// - MUST return a Decision for every well-formed input; rejections are deny
///   or retry decisions, not errors
/// - `Err(GuardDefect)` is reserved for unexpected failures, such as a
///   capability that cannot be reached
/// - `acheck` MAY suspend, but only on an external capability call
#[async_trait]
pub trait Guard: Send + Sync {
    /// Stable name, used in reasons, logs and telemetry.
    fn name(&self) -> &str;

    /// Blocking check.
    fn check(&self, data: &Value, ctx: &Context) -> GuardResult;

    /// Suspending check. Defaults to [`check`](Guard::check).
    async fn acheck(&self, data: &Value, ctx: &Context) -> GuardResult {
        self.check(data, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl Guard for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn check(&self, data: &Value, ctx: &Context) -> GuardResult {
            Ok(Decision::allow(data.clone(), ctx))
        }
    }

    #[tokio::test]
    async fn test_acheck_defaults_to_check() {
        let ctx = Context::new();
        let sync = Echo.check(&json!("x"), &ctx).unwrap();
        let not_sync = Echo.acheck(&json!("x"), &ctx).await.unwrap();
        assert_eq!(sync, not_sync);
    }
}
