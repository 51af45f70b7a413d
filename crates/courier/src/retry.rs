use std::time::Duration;

use crate::error::RequestError;

/// Per-request retry decision state.
///
/// The transport consults the policy on every failure that is eligible for a
/// retry. One policy instance belongs to exactly one request; it is never
/// shared.
pub trait RetryPolicy: Send {
    /// The timeout to apply to the upcoming attempt.
    fn current_timeout(&self) -> Duration;

    /// The number of retries performed so far.
    fn current_retry_count(&self) -> u32;

    /// Prepares for the next attempt, applying backoff to the timeout.
    ///
    /// Returns `error` back when no attempts remain; that error is the
    /// terminal error surfaced to the caller.
    fn retry(&mut self, error: RequestError) -> Result<(), RequestError>;
}

/// The default retry policy: one retry with a constant backoff multiplier.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    current_timeout: Duration,
    current_retry_count: u32,
    max_retries: u32,
    backoff_multiplier: f32,
}

/// The default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);

/// The default number of retries.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// The default backoff multiplier.
pub const DEFAULT_BACKOFF_MULT: f32 = 1.0;

impl DefaultRetryPolicy {
    pub fn new(initial_timeout: Duration, max_retries: u32, backoff_multiplier: f32) -> Self {
        DefaultRetryPolicy {
            current_timeout: initial_timeout,
            current_retry_count: 0,
            max_retries,
            backoff_multiplier,
        }
    }

    fn has_attempt_remaining(&self) -> bool {
        self.current_retry_count <= self.max_retries
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF_MULT)
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn current_timeout(&self) -> Duration {
        self.current_timeout
    }

    fn current_retry_count(&self) -> u32 {
        self.current_retry_count
    }

    fn retry(&mut self, error: RequestError) -> Result<(), RequestError> {
        self.current_retry_count += 1;
        self.current_timeout += self.current_timeout.mul_f32(self.backoff_multiplier);
        if self.has_attempt_remaining() {
            Ok(())
        } else {
            Err(error)
        }
    }
}
