//! Guards that need a clock, shared state or an async capability.

mod classifier;
mod rate_limit;

pub use classifier::{
    Classification, Classifier, ClassifierConfig, ClassifierError, ClassifierGuard,
};
pub use rate_limit::{RateKey, RateLimitConfig, RateLimitGuard};
