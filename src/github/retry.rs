//! Exponential backoff retry logic for host API calls.
//!
//! One loop serves the fetcher, the publisher and the orchestrator. What to do
//! after a failure is decided by the error itself through [`Classify`]:
//!
//! - `Retry`: back off exponentially (with jitter) and try again, up to
//!   `max_retries` times
//! - `RetryAfter(d)`: the upstream asked us to wait. The wait is shared with
//!   every other caller through a [`RateLimitGate`] and does not consume a retry,
//!   though the number of such waits is bounded by `max_rate_limit_waits`
//! - `Terminal`: return immediately

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::gate::RateLimitGate;

/// What the retry loop should do after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Retry after the configured backoff.
    Retry,
    /// Retry once the given wait has elapsed, without consuming a retry.
    RetryAfter(Duration),
    /// Give up.
    Terminal,
}

/// Errors that know whether they are worth retrying.
pub trait Classify {
    fn disposition(&self) -> Disposition;
}

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (cap for exponential growth).
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (typically 2.0).
    pub backoff_multiplier: f64,

    /// Random extra delay added to each backoff, as a percentage (0-100).
    pub jitter_percent: u8,

    /// Maximum number of rate-limit waits before giving up.
    pub max_rate_limit_waits: u32,
}

impl RetryConfig {
    /// Default retry configuration for host API calls.
    ///
    /// - 3 retries with 2s, 4s, 8s delays plus up to 20% jitter
    /// - Up to 5 rate-limit suspensions
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
        backoff_multiplier: 2.0,
        jitter_percent: 20,
        max_rate_limit_waits: 5,
    };

    /// Creates a retry configuration without jitter.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
            jitter_percent: 0,
            max_rate_limit_waits: Self::DEFAULT.max_rate_limit_waits,
        }
    }

    pub fn with_jitter_percent(mut self, jitter_percent: u8) -> Self {
        self.jitter_percent = jitter_percent.min(100);
        self
    }

    pub fn with_max_rate_limit_waits(mut self, waits: u32) -> Self {
        self.max_rate_limit_waits = waits;
        self
    }

    /// Computes the delay for the given retry attempt (0-indexed).
    ///
    /// The delay grows exponentially: `initial_delay * backoff_multiplier^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }

    /// The delay for `attempt` with jitter applied.
    ///
    /// Returns a value between the base delay and base + `jitter_percent`%.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter_percent == 0 {
            return base;
        }
        let jitter = rand::rng().random_range(0..=self.jitter_percent) as f64 / 100.0;
        Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter))
    }

    /// Returns an iterator over all retry delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }

    /// Computes the total maximum wait time for all retries, excluding jitter.
    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Retry policy for controlling retry behavior at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry retriable errors with exponential backoff.
    #[default]
    RetryTransient,

    /// Do not retry - return errors immediately.
    NoRetry,
}

/// Result of a retry loop.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// The operation succeeded.
    Success(T),

    /// Retriable errors kept occurring until the budget ran out.
    ExhaustedRetries {
        /// The last error encountered.
        last_error: E,
        /// Number of calls made (including the initial attempt).
        attempts: u32,
    },

    /// A terminal error occurred.
    PermanentError(E),
}

impl<T, E> RetryResult<T, E> {
    /// Converts to a Result, treating exhausted retries and permanent errors as Err.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::ExhaustedRetries { last_error, .. } => Err(last_error),
            RetryResult::PermanentError(e) => Err(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }
}

/// Executes an async operation with retry logic.
///
/// Rate-limit waits sleep locally; use [`retry_with_gate`] to share them.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: RetryConfig,
    policy: RetryPolicy,
    operation: F,
) -> RetryResult<T, E>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run(config, policy, None, operation).await
}

/// Executes an async operation with retry logic, honoring a shared rate-limit gate.
///
/// Before every call the loop waits for the gate to open. A rate-limited error
/// closes the gate for every caller sharing it.
pub async fn retry_with_gate<T, E, F, Fut>(
    config: RetryConfig,
    policy: RetryPolicy,
    gate: &RateLimitGate,
    operation: F,
) -> RetryResult<T, E>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run(config, policy, Some(gate), operation).await
}

async fn run<T, E, F, Fut>(
    config: RetryConfig,
    policy: RetryPolicy,
    gate: Option<&RateLimitGate>,
    mut operation: F,
) -> RetryResult<T, E>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_failures = if policy == RetryPolicy::NoRetry {
        1
    } else {
        config.max_retries + 1 // Include initial attempt
    };
    let mut calls = 0;
    let mut failures = 0;
    let mut rate_limit_waits = 0;

    loop {
        if let Some(gate) = gate {
            gate.wait().await;
        }
        calls += 1;

        let err = match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => e,
        };

        match err.disposition() {
            Disposition::Terminal => return RetryResult::PermanentError(err),
            Disposition::RetryAfter(wait) => {
                rate_limit_waits += 1;
                if policy == RetryPolicy::NoRetry || rate_limit_waits > config.max_rate_limit_waits
                {
                    return RetryResult::ExhaustedRetries {
                        last_error: err,
                        attempts: calls,
                    };
                }
                tracing::warn!(wait_secs = wait.as_secs_f64(), "rate limited, suspending requests");
                match gate {
                    Some(gate) => gate.suspend_for(wait),
                    None => tokio::time::sleep(wait).await,
                }
            }
            Disposition::Retry => {
                failures += 1;
                if failures >= max_failures {
                    return RetryResult::ExhaustedRetries {
                        last_error: err,
                        attempts: calls,
                    };
                }
                let delay = config.jittered_delay(failures - 1);
                tracing::debug!(attempt = calls, delay_ms = delay.as_millis() as u64, "retrying after transient error");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
