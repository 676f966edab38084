// Dual token-bucket limiter mirroring the server's steady + burst limits
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::client::context::CallContext;
use crate::config::RateLimitConfig;
use crate::error::{ApiError, RateLimitHint};

const TOKEN_EPSILON: f64 = 1e-9;
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_second: f64, tokens: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_per_second,
            tokens: tokens.min(capacity),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    fn time_until_token(&self) -> Duration {
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_second)
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    steady_rate: f64,
    burst_capacity: u32,
    burst_window: Duration,
    steady: TokenBucket,
    // None when the server grants no burst allowance
    burst: Option<TokenBucket>,
}

impl LimiterState {
    fn build_buckets(&mut self, now: Instant, carry_over: bool) {
        let steady_tokens = if carry_over { self.steady.tokens } else { 1.0 };
        self.steady = TokenBucket::new(1.0, self.steady_rate, steady_tokens, now);

        let burst_tokens = match (&self.burst, carry_over) {
            (Some(old), true) => old.tokens,
            (None, true) => 0.0,
            (_, false) => self.burst_capacity as f64,
        };
        self.burst = (self.burst_capacity > 0).then(|| {
            let capacity = self.burst_capacity as f64;
            TokenBucket::new(
                capacity,
                capacity / self.burst_window.as_secs_f64(),
                burst_tokens,
                now,
            )
        });
    }

    /// Takes a token from the steady bucket, falling back to the burst bucket.
    /// On failure returns how long until either bucket has one.
    fn acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.steady.refill(now);
        if self.steady.try_take() {
            return Ok(());
        }
        if let Some(burst) = self.burst.as_mut() {
            burst.refill(now);
            if burst.try_take() {
                return Ok(());
            }
        }

        let steady_wait = self.steady.time_until_token();
        let wait = match &self.burst {
            Some(burst) => steady_wait.min(burst.time_until_token()),
            None => steady_wait,
        };
        Err(wait.max(MIN_WAIT))
    }
}

/// Rate limiter enforcing a steady per-second rate plus a burst allowance.
///
/// The steady bucket holds a single token and refills at the steady rate. The
/// burst bucket holds `burst_capacity` tokens and refills over
/// `burst_window`. A request takes from the steady bucket when possible and
/// only dips into the burst allowance when the steady bucket is empty.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(steady_rate: f64, burst_capacity: u32, burst_window: Duration) -> Self {
        let now = Instant::now();
        let steady_rate = if steady_rate > 0.0 { steady_rate } else { 1.0 };
        let burst_window = burst_window.max(Duration::from_secs(1));
        let mut state = LimiterState {
            steady_rate,
            burst_capacity,
            burst_window,
            steady: TokenBucket::new(1.0, steady_rate, 1.0, now),
            burst: None,
        };
        state.build_buckets(now, false);
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.steady_rate_per_second,
            config.burst_capacity,
            config.burst_window(),
        )
    }

    /// Current (steady rate, burst capacity).
    pub fn limits(&self) -> (f64, u32) {
        let state = self.state.lock();
        (state.steady_rate, state.burst_capacity)
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.state.lock().acquire(Instant::now()).is_ok()
    }

    /// Waits until a token is available or `ctx` is cancelled.
    pub async fn wait(&self, ctx: &CallContext) -> Result<(), ApiError> {
        loop {
            if ctx.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            // The lock is never held across the sleep.
            let wait = match self.state.lock().acquire(Instant::now()) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            trace!(wait_ms = wait.as_millis() as u64, "rate limiter waiting for token");
            tokio::select! {
                _ = sleep(wait) => {}
                _ = ctx.cancelled() => return Err(ApiError::Cancelled),
            }
        }
    }

    /// Replaces both buckets when the server reports different limits.
    ///
    /// Returns `true` when the limits changed. Tokens already accumulated are
    /// carried into the new buckets, clamped to the new capacities.
    pub fn update_limits(&self, steady_rate: f64, burst_capacity: u32) -> bool {
        if !(steady_rate > 0.0) {
            return false;
        }

        let mut state = self.state.lock();
        if (state.steady_rate - steady_rate).abs() < TOKEN_EPSILON
            && state.burst_capacity == burst_capacity
        {
            return false;
        }

        debug!(
            old_rate = state.steady_rate,
            new_rate = steady_rate,
            old_burst = state.burst_capacity,
            new_burst = burst_capacity,
            "updating rate limits from server"
        );
        let now = Instant::now();
        state.steady.refill(now);
        if let Some(burst) = state.burst.as_mut() {
            burst.refill(now);
        }
        state.steady_rate = steady_rate;
        state.burst_capacity = burst_capacity;
        state.build_buckets(now, true);
        true
    }

    /// Applies whichever limits a 429 hint reports; missing values keep their current setting.
    pub fn update_from_hint(&self, hint: &RateLimitHint) -> bool {
        if hint.limit_per_second.is_none() && hint.limit_burst.is_none() {
            return false;
        }
        let (rate, burst) = self.limits();
        self.update_limits(
            hint.limit_per_second.unwrap_or(rate),
            hint.limit_burst.unwrap_or(burst),
        )
    }
}
