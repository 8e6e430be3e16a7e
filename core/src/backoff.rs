use crate::config::RetryConfig;
use crate::error::Error;
use async_trait::async_trait;
use metrics::counter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Classification of one upstream response, as seen by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    RateLimited { retry_after: Option<Duration> },
    ClientError { status: u16 },
    ServerError { status: u16 },
    NetworkError,
}

impl ResponseClass {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResponseClass::RateLimited { .. }
                | ResponseClass::ServerError { .. }
                | ResponseClass::NetworkError
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResponseClass::Success => "success",
            ResponseClass::RateLimited { .. } => "rate_limited",
            ResponseClass::ClientError { .. } => "client_error",
            ResponseClass::ServerError { .. } => "server_error",
            ResponseClass::NetworkError => "network_error",
        }
    }
}

impl fmt::Display for ResponseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseClass::ClientError { status } | ResponseClass::ServerError { status } => {
                write!(f, "{} ({})", self.label(), status)
            }
            _ => write!(f, "{}", self.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Exponential delay before jitter for the given 1-based failed attempt,
    /// capped at `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Decide whether the `attempt`-th failure should be retried and after how long.
    ///
    /// `jitter_fraction` is a sample from `[0, 1)`; the caller owns the randomness
    /// so the decision itself stays deterministic.
    pub fn should_retry(
        &self,
        attempt: u32,
        class: &ResponseClass,
        jitter_fraction: f64,
    ) -> RetryDecision {
        if !class.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let mut delay = self.base_delay_for(attempt);
        if let ResponseClass::RateLimited {
            retry_after: Some(hint),
        } = class
        {
            delay = delay.max(*hint).min(self.max_delay);
        }

        let fraction = if jitter_fraction.is_finite() {
            jitter_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };

        RetryDecision::Retry {
            delay: delay + self.jitter.mul_f64(fraction),
        }
    }
}

/// Per-batch retry bookkeeping. Never outlives the batch it was created for.
#[derive(Debug)]
pub struct RetryState {
    attempts: u32,
    total_backoff: Duration,
    last: Option<ResponseClass>,
    rng: StdRng,
}

impl RetryState {
    pub fn new(seed: u64) -> Self {
        Self {
            attempts: 0,
            total_backoff: Duration::ZERO,
            last: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn total_backoff(&self) -> Duration {
        self.total_backoff
    }

    pub fn last(&self) -> Option<ResponseClass> {
        self.last
    }

    /// Record a failed attempt and ask the policy what to do next.
    pub fn on_failure(&mut self, policy: &RetryPolicy, class: ResponseClass) -> RetryDecision {
        self.attempts += 1;
        self.last = Some(class);

        let fraction: f64 = self.rng.random();
        let decision = policy.should_retry(self.attempts, &class, fraction);
        if let RetryDecision::Retry { delay } = decision {
            self.total_backoff += delay;
        }
        decision
    }
}

/// Terminal outcome of a retried operation that never succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub attempts: u32,
    pub last: ResponseClass,
    pub total_backoff: Duration,
}

impl RetryFailure {
    pub fn into_error(self, batch: impl Into<String>) -> Error {
        let batch = batch.into();
        match self.last {
            ResponseClass::ClientError { status } => Error::ClientError { batch, status },
            ResponseClass::RateLimited { .. } => Error::RateLimitExhausted {
                batch,
                attempts: self.attempts,
            },
            last => Error::TransientFailure {
                batch,
                attempts: self.attempts,
                last: last.to_string(),
            },
        }
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Drive `operation` until it succeeds or the policy gives up.
///
/// The operation reports failures as a [`ResponseClass`]; the delay between
/// attempts is applied through `sleeper` and only affects this operation.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    policy: &RetryPolicy,
    state: &mut RetryState,
    sleeper: &dyn Sleeper,
    operation_name: &str,
) -> std::result::Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ResponseClass>>,
{
    loop {
        match operation().await {
            Ok(result) => {
                if state.attempts() > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = state.attempts() + 1,
                        backoff_ms = state.total_backoff().as_millis() as u64,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(class) => match state.on_failure(policy, class) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        operation = operation_name,
                        attempt = state.attempts(),
                        class = %class,
                        retry_after_ms = delay.as_millis() as u64,
                        "Operation failed, retrying"
                    );
                    counter!("tfl_collector_retries_total", "class" => class.label())
                        .increment(1);
                    sleeper.sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    warn!(
                        operation = operation_name,
                        attempts = state.attempts(),
                        class = %class,
                        "Operation failed, giving up"
                    );
                    return Err(RetryFailure {
                        attempts: state.attempts(),
                        last: class,
                        total_backoff: state.total_backoff(),
                    });
                }
            },
        }
    }
}
