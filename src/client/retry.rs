// Retry decisions: exponential backoff, server hints and jitter
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{ApiError, RateLimitHint};

/// Whether to retry a failed attempt and how long to wait first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub wait: Duration,
}

impl RetryDecision {
    pub const GIVE_UP: RetryDecision = RetryDecision {
        retry: false,
        wait: Duration::ZERO,
    };

    fn after(wait: Duration) -> Self {
        Self { retry: true, wait }
    }
}

/// Stateless retry rules. The caller owns the attempt counter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
    retry_after_ceiling: Duration,
    reset_buffer: Duration,
    jitter_ratio: f64,
    hint_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            retry_after_ceiling: Duration::from_millis(config.retry_after_ceiling_ms),
            reset_buffer: Duration::from_millis(config.reset_buffer_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
            hint_jitter: Duration::from_millis(config.hint_jitter_ms),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Blind exponential backoff: `base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }

    /// Decides what to do after `attempt` retries have already been spent
    /// (0 after the first failure).
    pub fn decide(&self, error: &ApiError, attempt: u32) -> RetryDecision {
        self.decide_at(error, attempt, Utc::now(), &mut rand::rng())
    }

    pub fn decide_at<R: Rng>(
        &self,
        error: &ApiError,
        attempt: u32,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> RetryDecision {
        if attempt >= self.max_retries || !error.is_retryable() {
            return RetryDecision::GIVE_UP;
        }

        let backoff = self.backoff(attempt);
        let Some(hint) = error.rate_limit_hint() else {
            return RetryDecision::after(backoff + self.jitter(backoff, rng));
        };

        if let Some(retry_after) = self.plausible_retry_after(hint) {
            let jitter = random_up_to(self.hint_jitter, rng);
            return RetryDecision::after(retry_after + jitter);
        }

        let chosen = match self.wait_until_reset(hint, now) {
            Some(until_reset) if until_reset < backoff => until_reset,
            _ => backoff,
        };
        RetryDecision::after(chosen + self.jitter(chosen, rng))
    }

    fn plausible_retry_after(&self, hint: &RateLimitHint) -> Option<Duration> {
        hint.retry_after
            .filter(|retry_after| *retry_after < self.retry_after_ceiling)
    }

    fn wait_until_reset(&self, hint: &RateLimitHint, now: DateTime<Utc>) -> Option<Duration> {
        let reset = hint.reset?;
        // A reset in the past clamps to zero.
        let remaining = (reset - now).to_std().unwrap_or(Duration::ZERO);
        Some(remaining + self.reset_buffer)
    }

    fn jitter<R: Rng>(&self, backoff: Duration, rng: &mut R) -> Duration {
        random_up_to(backoff.mul_f64(self.jitter_ratio), rng)
    }
}

fn random_up_to<R: Rng>(max: Duration, rng: &mut R) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.random_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn rate_limited(hint: RateLimitHint) -> ApiError {
        ApiError::RateLimited(hint)
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert!(policy.backoff(64) >= Duration::from_secs(3600));
    }

    #[test]
    fn gives_up_past_max_retries() {
        let policy = RetryPolicy::default();
        let error = ApiError::transient("connection reset");
        let now = Utc::now();
        for attempt in 0..3 {
            assert!(policy.decide_at(&error, attempt, now, &mut rng()).retry);
        }
        assert_eq!(policy.decide_at(&error, 3, now, &mut rng()), RetryDecision::GIVE_UP);
    }

    #[test]
    fn terminal_and_cancelled_errors_are_never_retried() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let terminal = ApiError::Terminal {
            status: 400,
            code: Some(4000),
            message: "bad request".into(),
            data: None,
        };
        assert!(!policy.decide_at(&terminal, 0, now, &mut rng()).retry);
        assert!(!policy.decide_at(&ApiError::Cancelled, 0, now, &mut rng()).retry);
        assert!(!policy.decide_at(&ApiError::ShuttingDown, 0, now, &mut rng()).retry);
    }

    #[test]
    fn transient_wait_is_backoff_plus_bounded_jitter() {
        let policy = RetryPolicy::default();
        let error = ApiError::transient("timeout");
        let now = Utc::now();
        let mut rng = rng();
        for _ in 0..50 {
            let decision = policy.decide_at(&error, 1, now, &mut rng);
            assert!(decision.wait >= Duration::from_millis(1000));
            assert!(decision.wait <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn plausible_retry_after_wins_over_backoff() {
        let policy = RetryPolicy::default();
        let error = rate_limited(RateLimitHint::with_retry_after(Duration::from_millis(1200)));
        let decision = policy.decide_at(&error, 2, Utc::now(), &mut rng());
        assert!(decision.retry);
        assert!(decision.wait >= Duration::from_millis(1200));
        assert!(decision.wait <= Duration::from_millis(1300));
    }

    #[test]
    fn implausible_retry_after_falls_back_to_backoff() {
        let policy = RetryPolicy::default();
        let error = rate_limited(RateLimitHint::with_retry_after(Duration::from_secs(90)));
        let decision = policy.decide_at(&error, 0, Utc::now(), &mut rng());
        assert!(decision.wait >= Duration::from_millis(500));
        assert!(decision.wait <= Duration::from_millis(750));
    }

    #[test]
    fn near_reset_beats_longer_backoff() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let hint = RateLimitHint {
            reset: Some(now + chrono::Duration::milliseconds(300)),
            ..RateLimitHint::default()
        };
        // backoff for attempt 2 is 2000ms; reset + buffer is 400ms
        let decision = policy.decide_at(&rate_limited(hint), 2, now, &mut rng());
        assert!(decision.wait >= Duration::from_millis(400));
        assert!(decision.wait <= Duration::from_millis(600));
    }

    #[test]
    fn distant_reset_does_not_extend_backoff() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let hint = RateLimitHint {
            reset: Some(now + chrono::Duration::seconds(30)),
            ..RateLimitHint::default()
        };
        let decision = policy.decide_at(&rate_limited(hint), 0, now, &mut rng());
        assert!(decision.wait <= Duration::from_millis(750));
    }

    #[test]
    fn reset_in_the_past_only_waits_for_buffer() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let hint = RateLimitHint {
            reset: Some(now - chrono::Duration::seconds(5)),
            ..RateLimitHint::default()
        };
        let decision = policy.decide_at(&rate_limited(hint), 0, now, &mut rng());
        assert!(decision.wait >= Duration::from_millis(100));
        assert!(decision.wait <= Duration::from_millis(150));
    }
}
