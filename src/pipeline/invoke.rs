//! Robust invocation engine.
//!
//! Wraps one logical transform call with a hard timeout, bounded retries
//! with escalating temperature and backoff, adaptive recursive splitting,
//! and a deterministic fallback. Once retries are exhausted the engine
//! guarantees one of three outcomes: a merged result from the split halves,
//! the task's deterministic fallback, or an explicit error. Rate-limit and
//! credential failures always propagate untouched so the caller can apply
//! its cooldown policy.
//!
//! The recursive split-then-merge control flow is an explicit task tree: a
//! `split` on the payload plus a concurrent invoke of both halves, which
//! keeps termination (depth bound, item floor) independently testable.

use crate::defaults;
use crate::error::{LongformError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the invocation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Hard per-invocation timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts before splitting or falling back.
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff multiplier applied per attempt.
    pub backoff_factor: u64,
    /// Sampling temperatures, one per attempt; the last entry repeats if
    /// attempts exceed the list.
    pub temperatures: Vec<f32>,
    /// A failing payload must hold more items than this to be split.
    pub min_split_items: usize,
    /// Maximum split recursion depth.
    pub max_split_depth: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::INVOKE_TIMEOUT_SECS,
            max_attempts: defaults::MAX_ATTEMPTS,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            backoff_factor: defaults::BACKOFF_FACTOR,
            temperatures: defaults::ATTEMPT_TEMPERATURES.to_vec(),
            min_split_items: defaults::MIN_SPLIT_ITEMS,
            max_split_depth: defaults::MAX_SPLIT_DEPTH,
        }
    }
}

/// One unit kind the engine knows how to invoke.
///
/// `attempt` performs a single raw call (build request → transform service
/// → decode → typed parse). The remaining methods describe how the payload
/// splits and how the task degrades when the service is unusable. Tasks
/// whose payloads cannot be split or synthesized (stage-1 audio windows)
/// return `None` from `split`/`fallback` and surface exhaustion as an error.
#[async_trait]
pub trait TransformTask: Send + Sync {
    type Payload: Clone + Send + Sync + 'static;
    type Output: Send + 'static;

    async fn attempt(&self, payload: &Self::Payload, temperature: f32) -> Result<Self::Output>;

    fn item_count(&self, payload: &Self::Payload) -> usize;

    /// Splits the payload in half, preserving order across the pair.
    fn split(&self, payload: &Self::Payload) -> Option<(Self::Payload, Self::Payload)>;

    /// Merges the outputs of two split halves, left before right.
    fn merge(&self, left: Self::Output, right: Self::Output) -> Self::Output;

    /// Deterministic result synthesized directly from the payload.
    fn fallback(&self, payload: &Self::Payload) -> Option<Self::Output>;
}

type InvokeFuture<'a, O> = Pin<Box<dyn Future<Output = Result<O>> + Send + 'a>>;

/// The invocation engine. Stateless apart from its configuration; one
/// instance serves every stage.
#[derive(Debug, Clone)]
pub struct RobustInvoker {
    config: RetryConfig,
}

impl RobustInvoker {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Runs the full retry → split → fallback ladder for one unit.
    pub async fn invoke<T: TransformTask>(
        &self,
        task: &T,
        payload: T::Payload,
    ) -> Result<T::Output> {
        self.invoke_at_depth(task, payload, 0).await
    }

    fn invoke_at_depth<'a, T: TransformTask>(
        &'a self,
        task: &'a T,
        payload: T::Payload,
        depth: u32,
    ) -> InvokeFuture<'a, T::Output> {
        Box::pin(async move {
            let last_err = match self.attempt_with_retries(task, &payload).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_rate_limit() || e.is_fatal() => return Err(e),
                Err(e) => e,
            };

            // All attempts exhausted: split if the payload is large enough
            // and we have depth budget left.
            let item_count = task.item_count(&payload);
            if item_count > self.config.min_split_items && depth < self.config.max_split_depth {
                if let Some((left, right)) = task.split(&payload) {
                    debug!(depth, item_count, "splitting failed unit in half");
                    match tokio::try_join!(
                        self.invoke_at_depth(task, left, depth + 1),
                        self.invoke_at_depth(task, right, depth + 1),
                    ) {
                        Ok((l, r)) => return Ok(task.merge(l, r)),
                        Err(e) if e.is_rate_limit() || e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(error = %e, "split halves failed, degrading to fallback");
                        }
                    }
                }
            }

            match task.fallback(&payload) {
                Some(output) => {
                    warn!(item_count, "returning deterministic fallback result");
                    Ok(output)
                }
                None => Err(last_err),
            }
        })
    }

    /// The bounded attempt loop: timeout per call, backoff between calls,
    /// escalating temperature.
    async fn attempt_with_retries<T: TransformTask>(
        &self,
        task: &T,
        payload: &T::Payload,
    ) -> Result<T::Output> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let mut backoff = Duration::from_millis(self.config.backoff_base_ms);
        let mut last_err = LongformError::Other("no attempts configured".to_string());

        for attempt in 0..self.config.max_attempts.max(1) {
            if attempt > 0 {
                debug!(attempt, delay_ms = backoff.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(backoff).await;
                backoff *= self.config.backoff_factor.max(1) as u32;
            }

            let temperature = self.temperature_for(attempt);
            match tokio::time::timeout(timeout, task.attempt(payload, temperature)).await {
                Err(_) => {
                    warn!(attempt, "invocation exceeded timeout");
                    last_err = LongformError::InvokeTimeout {
                        seconds: self.config.timeout_secs,
                    };
                }
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(e)) if e.is_retryable() => {
                    warn!(attempt, error = %e, "attempt failed, may retry");
                    last_err = e;
                }
                // Rate limits, credential failures and anything unclassified
                // propagate to the caller untouched.
                Ok(Err(e)) => return Err(e),
            }
        }
        Err(last_err)
    }

    fn temperature_for(&self, attempt: u32) -> f32 {
        let temps = &self.config.temperatures;
        temps
            .get(attempt as usize)
            .or_else(|| temps.last())
            .copied()
            .unwrap_or(0.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Scripted task over `Vec<u32>` payloads: fails a configured number of
    /// times per payload size before succeeding, or fails forever.
    struct ScriptedTask {
        failures_before_success: Option<u32>,
        attempts: AtomicU32,
        temperatures: Mutex<Vec<f32>>,
        fallback_enabled: bool,
        max_seen_depth_items: AtomicUsize,
        rate_limit_on_attempt: Option<u32>,
    }

    impl ScriptedTask {
        fn failing_forever() -> Self {
            Self {
                failures_before_success: None,
                attempts: AtomicU32::new(0),
                temperatures: Mutex::new(Vec::new()),
                fallback_enabled: true,
                max_seen_depth_items: AtomicUsize::new(usize::MAX),
                rate_limit_on_attempt: None,
            }
        }

        fn succeeding_after(failures: u32) -> Self {
            Self {
                failures_before_success: Some(failures),
                ..Self::failing_forever()
            }
        }

        fn without_fallback(mut self) -> Self {
            self.fallback_enabled = false;
            self
        }

        /// Succeed only for payloads at or below this size (exercises the
        /// split path: full payload fails, halves succeed).
        fn succeeding_below(mut self, items: usize) -> Self {
            self.max_seen_depth_items = AtomicUsize::new(items);
            self.failures_before_success = None;
            self
        }

        fn rate_limiting_on(mut self, attempt: u32) -> Self {
            self.rate_limit_on_attempt = Some(attempt);
            self
        }
    }

    #[async_trait]
    impl TransformTask for ScriptedTask {
        type Payload = Vec<u32>;
        type Output = Vec<u32>;

        async fn attempt(&self, payload: &Vec<u32>, temperature: f32) -> Result<Vec<u32>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            self.temperatures.lock().unwrap().push(temperature);

            if self.rate_limit_on_attempt == Some(n) {
                return Err(LongformError::RateLimited {
                    model_id: "m".to_string(),
                });
            }
            if payload.len() <= self.max_seen_depth_items.load(Ordering::SeqCst) {
                if let Some(failures) = self.failures_before_success {
                    if n >= failures {
                        return Ok(payload.clone());
                    }
                } else if self.max_seen_depth_items.load(Ordering::SeqCst) != usize::MAX {
                    return Ok(payload.clone());
                }
            }
            Err(LongformError::SchemaMismatch {
                message: "scripted failure".to_string(),
            })
        }

        fn item_count(&self, payload: &Vec<u32>) -> usize {
            payload.len()
        }

        fn split(&self, payload: &Vec<u32>) -> Option<(Vec<u32>, Vec<u32>)> {
            if payload.len() < 2 {
                return None;
            }
            let mid = payload.len() / 2;
            Some((payload[..mid].to_vec(), payload[mid..].to_vec()))
        }

        fn merge(&self, mut left: Vec<u32>, right: Vec<u32>) -> Vec<u32> {
            left.extend(right);
            left
        }

        fn fallback(&self, payload: &Vec<u32>) -> Option<Vec<u32>> {
            if self.fallback_enabled {
                // Mark fallback items so tests can tell them apart.
                Some(payload.iter().map(|v| v + 1000).collect())
            } else {
                None
            }
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            timeout_secs: 5,
            backoff_base_ms: 1,
            ..Default::default()
        }
    }

    fn payload(n: usize) -> Vec<u32> {
        (0..n as u32).collect()
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_retry() {
        let task = ScriptedTask::succeeding_after(0);
        let invoker = RobustInvoker::new(fast_config());
        let out = invoker.invoke(&task, payload(10)).await.unwrap();
        assert_eq!(out, payload(10));
        assert_eq!(task.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_with_escalating_temperature() {
        let task = ScriptedTask::succeeding_after(2);
        let invoker = RobustInvoker::new(fast_config());
        invoker.invoke(&task, payload(10)).await.unwrap();
        assert_eq!(task.attempts.load(Ordering::SeqCst), 3);
        let temps = task.temperatures.lock().unwrap().clone();
        assert_eq!(temps, vec![0.2, 0.5, 0.9]);
    }

    #[tokio::test]
    async fn rate_limit_propagates_without_retry() {
        let task = ScriptedTask::failing_forever().rate_limiting_on(0);
        let invoker = RobustInvoker::new(fast_config());
        let err = invoker.invoke(&task, payload(100)).await.unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(
            task.attempts.load(Ordering::SeqCst),
            1,
            "rate limit must not be retried locally"
        );
    }

    #[tokio::test]
    async fn small_payload_skips_split_and_falls_back() {
        let task = ScriptedTask::failing_forever();
        let invoker = RobustInvoker::new(fast_config());
        // 40 items is at the threshold, not above it: no split.
        let out = invoker.invoke(&task, payload(40)).await.unwrap();
        assert!(out.iter().all(|v| *v >= 1000), "expected fallback output");
        assert_eq!(task.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn large_payload_splits_and_merges_halves() {
        // 120 items fail as a whole; halves of 60 succeed. The merged result
        // is the ordered concatenation of both halves.
        let task = ScriptedTask::failing_forever().succeeding_below(60);
        let invoker = RobustInvoker::new(fast_config());
        let out = invoker.invoke(&task, payload(120)).await.unwrap();
        assert_eq!(out, payload(120));
    }

    #[tokio::test]
    async fn split_recursion_terminates_at_max_depth() {
        let config = RetryConfig {
            min_split_items: 1,
            max_split_depth: 3,
            ..fast_config()
        };
        let task = ScriptedTask::failing_forever();
        let invoker = RobustInvoker::new(config);
        // Everything fails, so the engine recurses to depth 3 and then
        // falls back. Attempts bound: 3 per node, tree of depth 3 over 16
        // items → at most 3 × (1+2+4+8) = 45 attempts.
        let out = invoker.invoke(&task, payload(16)).await.unwrap();
        assert_eq!(out.len(), 16, "fallback preserves every item");
        assert!(task.attempts.load(Ordering::SeqCst) <= 45);
    }

    #[tokio::test]
    async fn exhaustion_without_fallback_is_an_explicit_error() {
        let task = ScriptedTask::failing_forever().without_fallback();
        let invoker = RobustInvoker::new(fast_config());
        let err = invoker.invoke(&task, payload(5)).await.unwrap_err();
        assert!(err.is_retryable(), "last attempt error surfaces: {err}");
    }

    #[tokio::test]
    async fn rate_limit_inside_split_half_propagates() {
        // Full payload fails twice ×3 attempts, then one half rate-limits.
        let task = ScriptedTask::failing_forever().rate_limiting_on(4);
        let invoker = RobustInvoker::new(fast_config());
        let err = invoker.invoke(&task, payload(100)).await.unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_a_retryable_attempt() {
        struct HangingTask;

        #[async_trait]
        impl TransformTask for HangingTask {
            type Payload = Vec<u32>;
            type Output = Vec<u32>;

            async fn attempt(&self, _payload: &Vec<u32>, _temperature: f32) -> Result<Vec<u32>> {
                // Far beyond the invocation budget.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }

            fn item_count(&self, payload: &Vec<u32>) -> usize {
                payload.len()
            }
            fn split(&self, _payload: &Vec<u32>) -> Option<(Vec<u32>, Vec<u32>)> {
                None
            }
            fn merge(&self, left: Vec<u32>, _right: Vec<u32>) -> Vec<u32> {
                left
            }
            fn fallback(&self, _payload: &Vec<u32>) -> Option<Vec<u32>> {
                Some(vec![42])
            }
        }

        let config = RetryConfig {
            timeout_secs: 300,
            ..Default::default()
        };
        let invoker = RobustInvoker::new(config);
        // Paused clock: sleeps auto-advance, so three 300s timeouts plus
        // backoff complete instantly and degrade to the fallback.
        let out = invoker.invoke(&HangingTask, payload(3)).await.unwrap();
        assert_eq!(out, vec![42]);
    }

    #[tokio::test]
    async fn temperature_repeats_last_entry_when_attempts_exceed_list() {
        let config = RetryConfig {
            max_attempts: 5,
            temperatures: vec![0.1, 0.4],
            backoff_base_ms: 1,
            ..fast_config()
        };
        let task = ScriptedTask::succeeding_after(4);
        let invoker = RobustInvoker::new(config);
        invoker.invoke(&task, payload(3)).await.unwrap();
        let temps = task.temperatures.lock().unwrap().clone();
        assert_eq!(temps, vec![0.1, 0.4, 0.4, 0.4, 0.4]);
    }
}
