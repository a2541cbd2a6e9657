//! Runtime guards inside a full pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use safellm_core::{Action, Context, OnError, PiiConfig, PiiGuard, Pipeline};
use safellm_runtime::{
    Classification, Classifier, ClassifierConfig, ClassifierError, ClassifierGuard,
    RateLimitConfig, RateLimitGuard,
};
use serde_json::json;

struct KeywordClassifier;

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        if text.contains("idiot") {
            Ok(Classification::new("toxic", 0.97))
        } else {
            Ok(Classification::new("neutral", 0.9))
        }
    }
}

struct Hanging;

#[async_trait]
impl Classifier for Hanging {
    async fn classify(&self, _text: &str) -> Result<Classification, ClassifierError> {
        std::future::pending().await
    }
}

fn moderation() -> ClassifierGuard {
    ClassifierGuard::new(ClassifierConfig::blocking(["toxic"]), Arc::new(KeywordClassifier))
        .unwrap()
}

#[tokio::test]
async fn classifier_runs_after_redaction() {
    let pipeline = Pipeline::builder("moderated")
        .guard(PiiGuard::new(PiiConfig::default()).unwrap())
        .guard(moderation())
        .build()
        .unwrap();

    let ok = pipeline
        .avalidate(json!("Reach me at jane@example.org"), None)
        .await;
    assert_eq!(ok.action, Action::Transform);
    assert_eq!(ok.evidence["classification"]["label"], json!("neutral"));

    let blocked = pipeline
        .avalidate(json!("you idiot, jane@example.org"), None)
        .await;
    assert_eq!(blocked.action, Action::Deny);
    assert_eq!(blocked.output, json!("you idiot, jane@example.org"));
    assert!(blocked
        .reasons
        .contains(&"classifier.blocked: toxic (0.97)".to_string()));
}

#[tokio::test(start_paused = true)]
async fn classifier_timeout_follows_on_error() {
    let hanging = || {
        ClassifierGuard::new(
            ClassifierConfig {
                timeout: Duration::from_millis(50),
                ..ClassifierConfig::blocking(["toxic"])
            },
            Arc::new(Hanging),
        )
        .unwrap()
    };

    let strict = Pipeline::builder("strict").guard(hanging()).build().unwrap();
    let decision = strict.avalidate(json!("hello"), None).await;
    assert_eq!(decision.action, Action::Deny);
    assert_eq!(decision.reasons, vec!["guard.defect: classifier (timeout)"]);

    let lenient = Pipeline::builder("lenient")
        .guard(hanging())
        .on_error(OnError::Continue)
        .build()
        .unwrap();
    let decision = lenient.avalidate(json!("hello"), None).await;
    assert!(decision.allowed);
    assert_eq!(decision.output, json!("hello"));
}

#[tokio::test]
async fn rate_limit_shared_across_runs() {
    let pipeline = Pipeline::builder("limited")
        .guard(
            RateLimitGuard::new(RateLimitConfig {
                max_requests: 2,
                ..Default::default()
            })
            .unwrap(),
        )
        .build()
        .unwrap();
    let ctx = Context::new().with_user_role("intern");

    for _ in 0..2 {
        assert!(pipeline.avalidate(json!("q"), Some(&ctx)).await.allowed);
    }
    let third = pipeline.avalidate(json!("q"), Some(&ctx)).await;
    assert!(!third.allowed);
    assert!(third.reasons[0].starts_with("rate_limit.exceeded"));
}
