//! Retry policy: backoff delays and failure dispositions

use rand::Rng;
use std::time::Duration;

/// Upper bound (exclusive) of the multiplicative jitter applied to backoff
pub const MAX_JITTER: f64 = 0.15;

/// Message fragments that mark a failure as retryable
const TRANSIENT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "http 502",
    "http 503",
    "http 504",
    "bad gateway",
    "gateway",
    "service unavailable",
    "server busy",
    "too many requests",
    "pgrst003",
];

/// Message fragments that mark an upstream "this order does not exist" answer
const NOT_FOUND_SIGNATURES: &[&str] = &[
    "does not exist",
    "não existe",
    "nao existe",
    "not found",
    "errorcode=404",
];

/// Caller-supplied classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

impl FailureClass {
    /// Classify an error message.
    ///
    /// Transient signatures win over not-found markers; anything unrecognised
    /// is transient.
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();

        if TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
            return FailureClass::Transient;
        }

        if NOT_FOUND_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
            return FailureClass::Permanent;
        }

        FailureClass::Transient
    }
}

/// Why a row was dead-lettered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadReason {
    Permanent,
    Exhausted,
}

/// What to do with a row after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Disposition {
    Retry { delay: Duration },
    Dead(DeadReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// `min(max, base * 2^(attempts-1)) * (1 + jitter)`
    Exponential { base: Duration, max: Duration },
    /// Same delay every time, no jitter
    Fixed(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    backoff: Backoff,
    /// Attempts at or beyond this count are dead-lettered on failure
    max_attempts: Option<u32>,
    dead_letters: bool,
}

impl RetryPolicy {
    pub fn exponential(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            backoff: Backoff::Exponential { base, max },
            max_attempts: Some(max_attempts),
            dead_letters: true,
        }
    }

    /// A policy that retries forever at a fixed delay and never dead-letters
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed(delay),
            max_attempts: None,
            dead_letters: false,
        }
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Delay before jitter. `attempts` is 1-based; 0 is treated as 1.
    pub fn base_delay(&self, attempts: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempts.saturating_sub(1).min(62) as i32;
                let scaled = base.as_millis() as f64 * 2f64.powi(exponent);
                let capped = scaled.min(max.as_millis() as f64);
                Duration::from_millis(capped as u64)
            }
        }
    }

    /// Delay before the next attempt, with jitter drawn from `[0, 0.15)`
    pub fn backoff(&self, attempts: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..MAX_JITTER);
        self.backoff_with_jitter(attempts, jitter)
    }

    pub fn backoff_with_jitter(&self, attempts: u32, jitter: f64) -> Duration {
        let delay = self.base_delay(attempts);
        match self.backoff {
            Backoff::Fixed(_) => delay,
            Backoff::Exponential { .. } => {
                let jitter = jitter.clamp(0.0, MAX_JITTER);
                delay.mul_f64(1.0 + jitter)
            }
        }
    }

    /// Decide the next state for a row that just failed its `attempts`-th try
    pub fn decide(&self, attempts: u32, class: FailureClass) -> Disposition {
        if self.dead_letters {
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    return Disposition::Dead(DeadReason::Exhausted);
                }
            }

            if class == FailureClass::Permanent {
                return Disposition::Dead(DeadReason::Permanent);
            }
        }

        Disposition::Retry {
            delay: self.backoff(attempts),
        }
    }
}
