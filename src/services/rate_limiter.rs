//! Fixed-window request limiter keyed by `(action class, subject)`.
//!
//! Counting happens in the shared [`CacheStore`] through an atomic bounded
//! increment, so concurrent requests can never push a window past its
//! maximum. Backend failures fail open.

use super::cache_store::CacheStore;
use chrono::Duration;
use std::{fmt, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    Upload,
    Download,
    Auth,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Auth => "auth",
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub max_attempts: u64,
    pub window: Duration,
}

/// Per-class policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicies {
    pub upload: RatePolicy,
    pub download: RatePolicy,
    pub auth: RatePolicy,
}

impl Default for RatePolicies {
    fn default() -> Self {
        Self {
            upload: RatePolicy {
                max_attempts: 20,
                window: Duration::minutes(1),
            },
            download: RatePolicy {
                max_attempts: 100,
                window: Duration::minutes(1),
            },
            auth: RatePolicy {
                max_attempts: 5,
                window: Duration::minutes(15),
            },
        }
    }
}

impl RatePolicies {
    pub fn for_class(&self, class: ActionClass) -> RatePolicy {
        match class {
            ActionClass::Upload => self.upload,
            ActionClass::Download => self.download,
            ActionClass::Auth => self.auth,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
    policies: RatePolicies,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn CacheStore>, policies: RatePolicies) -> Self {
        Self { cache, policies }
    }

    fn key(class: ActionClass, subject: &str) -> String {
        format!("ratelimit:{}:{}", class, subject)
    }

    /// Count one attempt for `subject` and report whether it is over the limit.
    ///
    /// An attempt rejected as exceeded is not counted. Cache errors are
    /// logged and treated as "not exceeded".
    pub async fn exceeds(&self, class: ActionClass, subject: &str) -> bool {
        let policy = self.policies.for_class(class);
        let key = Self::key(class, subject);

        match self
            .cache
            .bounded_increment(&key, policy.max_attempts, policy.window)
            .await
        {
            Ok(Some(_)) => false,
            Ok(None) => {
                tracing::warn!("Rate limit exceeded for key: {}", key);
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "Error checking rate limit for key: {}", key);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::{Clock, ManualClock},
        services::cache_store::MemoryCacheStore,
    };

    fn limiter() -> (RateLimiter, MemoryCacheStore, ManualClock) {
        let clock = ManualClock::default();
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let cache = MemoryCacheStore::new(clock_dyn);
        (
            RateLimiter::new(Arc::new(cache.clone()), RatePolicies::default()),
            cache,
            clock,
        )
    }

    #[tokio::test]
    async fn twenty_first_upload_in_a_minute_is_rejected() {
        let (limiter, _cache, clock) = limiter();

        for attempt in 1..=20 {
            assert!(
                !limiter.exceeds(ActionClass::Upload, "10.0.0.1").await,
                "attempt {} should pass",
                attempt
            );
        }
        assert!(limiter.exceeds(ActionClass::Upload, "10.0.0.1").await);

        clock.advance(Duration::seconds(60));
        assert!(!limiter.exceeds(ActionClass::Upload, "10.0.0.1").await);
    }

    #[tokio::test]
    async fn window_is_fixed_not_sliding() {
        let (limiter, _cache, clock) = limiter();

        assert!(!limiter.exceeds(ActionClass::Auth, "ip").await);
        clock.advance(Duration::minutes(14));
        for _ in 0..4 {
            assert!(!limiter.exceeds(ActionClass::Auth, "ip").await);
        }
        assert!(limiter.exceeds(ActionClass::Auth, "ip").await);

        // window opened at t=0 and closes at t=15min regardless of later hits
        clock.advance(Duration::minutes(1));
        assert!(!limiter.exceeds(ActionClass::Auth, "ip").await);
    }

    #[tokio::test]
    async fn classes_and_subjects_are_counted_separately() {
        let (limiter, _cache, _clock) = limiter();

        for _ in 0..20 {
            limiter.exceeds(ActionClass::Upload, "a").await;
        }
        assert!(limiter.exceeds(ActionClass::Upload, "a").await);
        assert!(!limiter.exceeds(ActionClass::Upload, "b").await);
        assert!(!limiter.exceeds(ActionClass::Download, "a").await);
    }

    #[tokio::test]
    async fn backend_failure_fails_open() {
        let (limiter, cache, _clock) = limiter();
        cache.set_unavailable(true);
        for _ in 0..50 {
            assert!(!limiter.exceeds(ActionClass::Upload, "x").await);
        }
    }

    #[test]
    fn default_policies_match_the_published_table() {
        let policies = RatePolicies::default();
        assert_eq!(policies.for_class(ActionClass::Upload).max_attempts, 20);
        assert_eq!(policies.for_class(ActionClass::Download).max_attempts, 100);
        assert_eq!(
            policies.for_class(ActionClass::Auth).window,
            Duration::minutes(15)
        );
    }
}
