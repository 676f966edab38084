use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::context::CallContext;
use crate::client::executor::{ApiRequest, Executor};
use crate::client::rate_limiter::RateLimiter;
use crate::client::retry::RetryPolicy;
use crate::config::DispatcherConfig;
use crate::error::{ApiError, Result};

/// Central dispatcher that serialises every API call onto one worker.
///
/// Callers enqueue requests from any number of tasks; a single background
/// worker pops at most one call per tick, waits for the rate limiter,
/// executes it (retrying in place) and delivers exactly one result back on
/// the call's private channel. Cloning shares the same queue and worker.
#[derive(Clone)]
pub struct ApiRequestBroker {
    request_sender: mpsc::Sender<PendingCall>,
    shutdown: CancellationToken,
    metrics: Arc<RwLock<BrokerMetrics>>,
    current_interval_us: Arc<AtomicU64>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// A request waiting in the queue together with its delivery channel.
struct PendingCall {
    request: ApiRequest,
    ctx: CallContext,
    enqueued_at: Instant,
    response_sender: oneshot::Sender<Result<Value>>,
}

impl PendingCall {
    fn is_abandoned(&self) -> bool {
        self.ctx.is_cancelled() || self.response_sender.is_closed()
    }

    fn deliver(self, result: Result<Value>) {
        if self.response_sender.send(result).is_err() {
            debug!(path = %self.request.path, "caller dropped before response was delivered");
        }
    }
}

/// Aggregate counters, append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrokerMetrics {
    pub total_processed: u64,
    pub total_queue_wait: Duration,
    pub total_processing: Duration,
    pub rate_limited_responses: u64,
    pub retries: u64,
}

impl BrokerMetrics {
    pub fn avg_queue_wait(&self) -> Duration {
        average(self.total_queue_wait, self.total_processed)
    }

    pub fn avg_processing_time(&self) -> Duration {
        average(self.total_processing, self.total_processed)
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(total.as_secs_f64() / count as f64)
    }
}

/// Tick interval that backs off under sustained throttling and recovers slowly.
#[derive(Debug, Clone)]
pub(crate) struct AdaptiveCadence {
    base: Duration,
    max: Duration,
    current: Duration,
    throttle_after: u32,
    throttle_step: f64,
    recover_after: u32,
    recover_step: f64,
    rate_limited_streak: u32,
    success_streak: u32,
}

/// Outcome of one executor attempt, as far as pacing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    Success,
    RateLimited,
    Other,
}

impl AttemptOutcome {
    fn of(result: &Result<Value>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(ApiError::RateLimited(_)) => Self::RateLimited,
            Err(_) => Self::Other,
        }
    }
}

const MAX_INTERVAL_FACTOR: f64 = 100.0;

// Keeps the step multipliers in [0, 1]; NaN counts as 0.
fn unit_fraction(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn interval_factor(value: f64) -> f64 {
    if value.is_nan() {
        1.0
    } else {
        value.clamp(1.0, MAX_INTERVAL_FACTOR)
    }
}

impl AdaptiveCadence {
    pub(crate) fn new(config: &DispatcherConfig) -> Self {
        let base = config.tick_interval().max(Duration::from_millis(1));
        Self {
            base,
            max: base.mul_f64(interval_factor(config.max_interval_factor)),
            current: base,
            throttle_after: config.throttle_after.max(1),
            throttle_step: unit_fraction(config.throttle_step),
            recover_after: config.recover_after.max(1),
            recover_step: unit_fraction(config.recover_step),
            rate_limited_streak: 0,
            success_streak: 0,
        }
    }

    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    /// Records one attempt; returns the new interval when it changed.
    pub(crate) fn observe(&mut self, outcome: AttemptOutcome) -> Option<Duration> {
        let previous = self.current;
        match outcome {
            AttemptOutcome::RateLimited => {
                self.success_streak = 0;
                self.rate_limited_streak += 1;
                if self.rate_limited_streak >= self.throttle_after {
                    self.rate_limited_streak = 0;
                    self.current = self.current.mul_f64(1.0 + self.throttle_step).min(self.max);
                }
            }
            AttemptOutcome::Success => {
                self.rate_limited_streak = 0;
                self.success_streak += 1;
                if self.success_streak >= self.recover_after {
                    self.success_streak = 0;
                    self.current = self.current.mul_f64(1.0 - self.recover_step).max(self.base);
                }
            }
            AttemptOutcome::Other => {
                self.rate_limited_streak = 0;
                self.success_streak = 0;
            }
        }
        (self.current != previous).then_some(self.current)
    }
}

/// Worker-owned state.
struct BrokerState {
    receiver: mpsc::Receiver<PendingCall>,
    executor: Arc<dyn Executor>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    cadence: AdaptiveCadence,
    metrics: Arc<RwLock<BrokerMetrics>>,
    current_interval_us: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl ApiRequestBroker {
    /// Create a new broker and start the background worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        executor: Arc<dyn Executor>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        config: &DispatcherConfig,
    ) -> Self {
        let (request_sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let metrics = Arc::new(RwLock::new(BrokerMetrics::default()));
        let cadence = AdaptiveCadence::new(config);
        let current_interval_us = Arc::new(AtomicU64::new(cadence.current().as_micros() as u64));

        let state = BrokerState {
            receiver,
            executor,
            limiter,
            policy,
            cadence,
            metrics: metrics.clone(),
            current_interval_us: current_interval_us.clone(),
            shutdown: shutdown.clone(),
        };
        let worker = tokio::spawn(Self::broker_worker(state));

        Self {
            request_sender,
            shutdown,
            metrics,
            current_interval_us,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Submit a request and wait for its response, deserialised into `T`.
    pub async fn enqueue<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.enqueue_with_context(&CallContext::new(), request).await
    }

    /// Like [`enqueue`](Self::enqueue), honouring `ctx` cancellation and
    /// deadline and passing its labels through to the executor.
    pub async fn enqueue_with_context<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        request: ApiRequest,
    ) -> Result<T> {
        let value = self.submit(ctx, request).await?;
        serde_json::from_value(value).map_err(ApiError::decode)
    }

    /// Submit a request and wait for the raw JSON response.
    pub async fn submit(&self, ctx: &CallContext, request: ApiRequest) -> Result<Value> {
        if self.shutdown.is_cancelled() {
            return Err(ApiError::ShuttingDown);
        }
        if ctx.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let (response_sender, response_receiver) = oneshot::channel();
        let call = PendingCall {
            request,
            ctx: ctx.clone(),
            enqueued_at: Instant::now(),
            response_sender,
        };

        // Blocks while the queue is full.
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ApiError::ShuttingDown),
            _ = ctx.cancelled() => return Err(ApiError::Cancelled),
            sent = self.request_sender.send(call) => {
                sent.map_err(|_| ApiError::ShuttingDown)?;
            }
        }

        tokio::select! {
            biased;
            response = response_receiver => {
                // Sender dropped without a response: worker is gone.
                response.unwrap_or(Err(ApiError::ShuttingDown))
            }
            _ = ctx.cancelled() => Err(ApiError::Cancelled),
        }
    }

    /// Stop the worker. Returns once no call is executing; queued calls
    /// receive [`ApiError::ShuttingDown`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.take() {
            if let Err(e) = handle.await {
                warn!("API request broker worker ended abnormally: {}", e);
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of calls waiting in the queue.
    pub fn queue_length(&self) -> usize {
        self.request_sender.max_capacity() - self.request_sender.capacity()
    }

    pub fn metrics(&self) -> BrokerMetrics {
        self.metrics.read().clone()
    }

    /// Interval currently used between dispatched calls.
    pub fn current_interval(&self) -> Duration {
        Duration::from_micros(self.current_interval_us.load(Ordering::Relaxed))
    }

    fn ticker(start: Instant, period: Duration) -> Interval {
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Background worker: one call per tick, in FIFO order.
    async fn broker_worker(mut state: BrokerState) {
        info!(
            interval_ms = state.cadence.current().as_millis() as u64,
            "API request broker started"
        );
        let mut ticker = Self::ticker(Instant::now(), state.cadence.current());

        loop {
            tokio::select! {
                biased;
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let call = match Self::next_live_call(&mut state.receiver) {
                Ok(Some(call)) => call,
                Ok(None) => continue,
                Err(()) => break,
            };

            if let Some(new_interval) = Self::handle_request(&mut state, call).await {
                // The call just handled used up the current tick.
                ticker = Self::ticker(Instant::now() + new_interval, new_interval);
            }
        }

        Self::drain(&mut state.receiver);
        info!("API request broker stopped");
    }

    /// Pops the next call whose caller is still waiting. `Err` once every
    /// sender is gone and the queue is empty.
    fn next_live_call(
        receiver: &mut mpsc::Receiver<PendingCall>,
    ) -> std::result::Result<Option<PendingCall>, ()> {
        loop {
            match receiver.try_recv() {
                Ok(call) if call.is_abandoned() => {
                    debug!(path = %call.request.path, "skipping cancelled call");
                    call.deliver(Err(ApiError::Cancelled));
                }
                Ok(call) => return Ok(Some(call)),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(()),
            }
        }
    }

    fn drain(receiver: &mut mpsc::Receiver<PendingCall>) {
        receiver.close();
        let mut rejected = 0usize;
        while let Ok(call) = receiver.try_recv() {
            call.deliver(Err(ApiError::ShuttingDown));
            rejected += 1;
        }
        if rejected > 0 {
            info!(rejected, "rejected queued calls during shutdown");
        }
    }

    /// Executes one call and delivers its outcome. Returns the new tick
    /// interval if pacing changed.
    async fn handle_request(state: &mut BrokerState, call: PendingCall) -> Option<Duration> {
        let queue_wait = call.enqueued_at.elapsed();
        let started = Instant::now();
        let previous_interval = state.cadence.current();

        let result = Self::execute_with_retries(state, &call).await;

        let processing = started.elapsed();
        {
            let mut metrics = state.metrics.write();
            metrics.total_processed += 1;
            metrics.total_queue_wait += queue_wait;
            metrics.total_processing += processing;
        }

        match &result {
            Ok(_) => debug!(
                method = %call.request.method,
                path = %call.request.path,
                labels = ?call.ctx.labels(),
                queue_wait_ms = queue_wait.as_millis() as u64,
                processing_ms = processing.as_millis() as u64,
                "API call completed"
            ),
            Err(e) => debug!(
                method = %call.request.method,
                path = %call.request.path,
                labels = ?call.ctx.labels(),
                status = e.status(),
                "API call failed: {}",
                e
            ),
        }
        call.deliver(result);

        let current = state.cadence.current();
        (current != previous_interval).then_some(current)
    }

    /// Bounded retry loop around the executor. Retries happen in place: the
    /// call is never re-queued behind later arrivals.
    async fn execute_with_retries(state: &mut BrokerState, call: &PendingCall) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            tokio::select! {
                biased;
                interrupted = Self::interrupted(&state.shutdown, &call.ctx) => return Err(interrupted),
                ready = state.limiter.wait(&call.ctx) => ready?,
            }

            let result = tokio::select! {
                biased;
                interrupted = Self::interrupted(&state.shutdown, &call.ctx) => return Err(interrupted),
                result = state.executor.execute(&call.request, call.ctx.labels()) => result,
            };

            if let Some(new_interval) = state.cadence.observe(AttemptOutcome::of(&result)) {
                state
                    .current_interval_us
                    .store(new_interval.as_micros() as u64, Ordering::Relaxed);
                info!(
                    interval_ms = new_interval.as_millis() as u64,
                    "adjusted request cadence"
                );
            }

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if let ApiError::RateLimited(hint) = &error {
                state.metrics.write().rate_limited_responses += 1;
                state.limiter.update_from_hint(hint);
            }

            let decision = state.policy.decide(&error, attempt);
            if !decision.retry {
                return Err(error);
            }

            warn!(
                path = %call.request.path,
                attempt = attempt + 1,
                wait_ms = decision.wait.as_millis() as u64,
                "retrying API call: {}",
                error
            );
            state.metrics.write().retries += 1;

            tokio::select! {
                biased;
                interrupted = Self::interrupted(&state.shutdown, &call.ctx) => return Err(interrupted),
                _ = sleep(decision.wait) => {}
            }
            attempt += 1;
        }
    }

    /// Resolves with the error matching whichever scope is cancelled first.
    async fn interrupted(shutdown: &CancellationToken, ctx: &CallContext) -> ApiError {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => ApiError::ShuttingDown,
            _ = ctx.cancelled() => ApiError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadence(base_ms: u64) -> AdaptiveCadence {
        AdaptiveCadence::new(&DispatcherConfig {
            tick_interval_ms: base_ms,
            ..DispatcherConfig::default()
        })
    }

    #[test]
    fn single_rate_limit_is_not_enough_to_slow_down() {
        let mut cadence = cadence(100);
        assert_eq!(cadence.observe(AttemptOutcome::RateLimited), None);
        assert_eq!(cadence.observe(AttemptOutcome::Success), None);
        assert_eq!(cadence.observe(AttemptOutcome::RateLimited), None);
        assert_eq!(cadence.current(), Duration::from_millis(100));
    }

    #[test]
    fn throttling_raises_interval_up_to_cap() {
        let mut cadence = cadence(100);
        cadence.observe(AttemptOutcome::RateLimited);
        let raised = cadence.observe(AttemptOutcome::RateLimited).unwrap();
        assert!(raised > Duration::from_millis(119) && raised < Duration::from_millis(121));

        for _ in 0..20 {
            cadence.observe(AttemptOutcome::RateLimited);
        }
        assert_eq!(cadence.current(), Duration::from_millis(200));
    }

    #[test]
    fn successes_recover_towards_base() {
        let mut cadence = cadence(100);
        for _ in 0..4 {
            cadence.observe(AttemptOutcome::RateLimited);
        }
        let raised = cadence.current();
        assert!(raised > Duration::from_millis(100));

        for _ in 0..4 {
            assert_eq!(cadence.observe(AttemptOutcome::Success), None);
        }
        let lowered = cadence.observe(AttemptOutcome::Success).unwrap();
        assert!(lowered < raised);

        for _ in 0..500 {
            cadence.observe(AttemptOutcome::Success);
        }
        assert_eq!(cadence.current(), Duration::from_millis(100));
    }

    #[test]
    fn other_errors_break_both_streaks() {
        let mut cadence = cadence(100);
        cadence.observe(AttemptOutcome::RateLimited);
        cadence.observe(AttemptOutcome::Other);
        assert_eq!(cadence.observe(AttemptOutcome::RateLimited), None);
    }

    #[test]
    fn out_of_range_steps_are_clamped() {
        let mut cadence = AdaptiveCadence::new(&DispatcherConfig {
            tick_interval_ms: 100,
            throttle_after: 1,
            throttle_step: -0.5,
            recover_after: 1,
            recover_step: 1.5,
            max_interval_factor: f64::INFINITY,
            ..DispatcherConfig::default()
        });
        assert_eq!(cadence.observe(AttemptOutcome::RateLimited), None);
        assert_eq!(cadence.observe(AttemptOutcome::Success), None);
        assert_eq!(cadence.current(), Duration::from_millis(100));

        let mut cadence = AdaptiveCadence::new(&DispatcherConfig {
            tick_interval_ms: 100,
            throttle_after: 1,
            throttle_step: 7.0,
            recover_after: 1,
            recover_step: f64::NAN,
            max_interval_factor: 2.0,
            ..DispatcherConfig::default()
        });
        for _ in 0..10 {
            cadence.observe(AttemptOutcome::RateLimited);
        }
        assert_eq!(cadence.current(), Duration::from_millis(200));
        assert_eq!(cadence.observe(AttemptOutcome::Success), None);
        assert_eq!(cadence.current(), Duration::from_millis(200));
    }

    #[test]
    fn averages_handle_empty_metrics() {
        let metrics = BrokerMetrics::default();
        assert_eq!(metrics.avg_queue_wait(), Duration::ZERO);

        let metrics = BrokerMetrics {
            total_processed: 4,
            total_queue_wait: Duration::from_secs(2),
            total_processing: Duration::from_secs(1),
            ..BrokerMetrics::default()
        };
        assert_eq!(metrics.avg_queue_wait(), Duration::from_millis(500));
        assert_eq!(metrics.avg_processing_time(), Duration::from_millis(250));
    }
}
