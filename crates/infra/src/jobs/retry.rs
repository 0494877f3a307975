//! Bounded exponential backoff around a single mutating remote call.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use ebssnap_core::RemoteError;

use super::types::RunControl;

/// Default attempt ceiling for remote mutations.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Longest uninterrupted sleep during a backoff; cancellation is checked
/// between slices.
pub const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first call (minimum one).
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: 0.1,
        }
    }

    /// Retries without sleeping (tests, dry runs).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay after the given failed attempt (1-indexed): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = 2_f64.powi((attempt - 1).min(30) as i32);
        let delay_ms = (base_ms * exp).min(max_ms);

        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            // Deterministic spread so concurrent workers don't retry in lockstep.
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Decides whether a remote error is worth another attempt.
pub trait RetryClassifier: Send + Sync {
    fn classify(&self, error: &RemoteError) -> RetryDecision;
}

/// Retries rate-limit errors only; everything else gives up immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThrottlingClassifier;

impl RetryClassifier for ThrottlingClassifier {
    fn classify(&self, error: &RemoteError) -> RetryDecision {
        if error.is_throttling() {
            RetryDecision::Retry
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl<F> RetryClassifier for F
where
    F: Fn(&RemoteError) -> RetryDecision + Send + Sync,
{
    fn classify(&self, error: &RemoteError) -> RetryDecision {
        self(error)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    /// The classifier refused to retry; `source` is the terminal remote error.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    GaveUp {
        operation: &'static str,
        attempts: u32,
        source: RemoteError,
    },

    /// Every attempt hit a retryable error.
    #[error("{operation} still failing after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        source: RemoteError,
    },

    /// The run was cancelled while backing off; `source` is the last error seen.
    #[error("{operation} abandoned after {attempts} attempt(s), run cancelled: {source}")]
    Cancelled {
        operation: &'static str,
        attempts: u32,
        source: RemoteError,
    },
}

impl RetryError {
    pub fn remote(&self) -> &RemoteError {
        match self {
            RetryError::GaveUp { source, .. }
            | RetryError::Exhausted { source, .. }
            | RetryError::Cancelled { source, .. } => source,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::GaveUp { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Run `call` until it succeeds, the classifier gives up, the policy's
/// attempt ceiling is reached or `control` is cancelled.
///
/// Sleeps only the calling thread between attempts, in [`BACKOFF_SLICE`]
/// steps, marking progress on `control` as it goes. No further call is made
/// once the run is cancelled.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    classifier: &dyn RetryClassifier,
    control: &RunControl,
    operation: &'static str,
    mut call: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Result<T, RemoteError>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match call() {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if classifier.classify(&error) == RetryDecision::GiveUp {
            return Err(RetryError::GaveUp {
                operation,
                attempts: attempt,
                source: error,
            });
        }

        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                operation,
                attempts: attempt,
                source: error,
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            code = %error.code,
            "retryable remote error, backing off"
        );
        if !back_off(delay, control) {
            warn!(operation, attempt, "run cancelled during backoff, giving up");
            return Err(RetryError::Cancelled {
                operation,
                attempts: attempt,
                source: error,
            });
        }
    }
}

/// Sleep for `delay`, returning `false` as soon as the run is cancelled.
fn back_off(delay: Duration, control: &RunControl) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        control.mark_progress();
        if control.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(BACKOFF_SLICE));
    }
}
