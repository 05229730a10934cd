// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bounded exponential backoff for reconnect loops.
//!
//! A [`BackoffPolicy`] is pure configuration: it answers "how long should the
//! n-th retry wait, and is there an n-th retry at all". A [`Backoff`] tracks the
//! attempt counter for one retry sequence and is reset once the guarded
//! operation succeeds.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use uaql_core::retry::{Backoff, BackoffPolicy};
//!
//! let policy = BackoffPolicy::default()
//!     .with_max_retries(3)
//!     .with_initial_delay(Duration::from_millis(100));
//!
//! let mut backoff = Backoff::new(policy);
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
//! assert_eq!(backoff.next_delay(), None);
//! ```

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

// =============================================================================
// BackoffPolicy
// =============================================================================

/// Exponential backoff configuration.
///
/// `max_retries = None` means retry forever, which is what a long-running
/// service wants for its upstream connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Maximum number of retries after the first failure (`None` = unlimited).
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Delay before the first retry.
    #[serde(default = "default_initial_delay")]
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay")]
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Growth factor applied per retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) applied symmetrically around the delay.
    #[serde(default)]
    pub jitter: f64,
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Creates the default policy (unlimited retries).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy with a fixed delay and unlimited retries.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            ..Default::default()
        }
    }

    /// Limits the number of retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Removes the retry limit.
    pub fn unlimited(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter factor, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Returns `true` if this policy never gives up.
    #[inline]
    pub fn is_unlimited(&self) -> bool {
        self.max_retries.is_none()
    }

    /// Returns the delay for the given retry (1-based), before jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64;
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplied = base * self.multiplier.max(1.0).powi(exponent);
        let capped = multiplied.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped as u64)
    }

    /// Decides whether the given retry (1-based) may run and how long to wait.
    pub fn decide(&self, retry: u32) -> RetryDecision {
        match self.max_retries {
            Some(max) if retry > max => RetryDecision::GiveUp,
            _ => RetryDecision::Retry(apply_jitter(self.base_delay(retry), self.jitter)),
        }
    }

    /// Checks that the policy is usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("jitter must be within 0.0..=1.0, got {}", self.jitter));
        }
        if self.max_delay < self.initial_delay {
            return Err("max_delay must not be smaller than initial_delay".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_retries {
            Some(max) => write!(f, "max_retries={}", max)?,
            None => write!(f, "max_retries=unlimited")?,
        }
        write!(
            f,
            ", initial={:?}, max={:?}, x{}",
            self.initial_delay, self.max_delay, self.multiplier
        )
    }
}

// =============================================================================
// RetryDecision
// =============================================================================

/// Outcome of consulting a [`BackoffPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// Retries are exhausted.
    GiveUp,
}

impl RetryDecision {
    /// Returns the delay if a retry is allowed.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Retry(delay) => Some(*delay),
            Self::GiveUp => None,
        }
    }
}

// =============================================================================
// Backoff
// =============================================================================

/// Attempt counter for one retry sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    retries: u32,
}

impl Backoff {
    /// Creates a fresh sequence.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, retries: 0 }
    }

    /// Records a failure and returns the delay before the next attempt.
    ///
    /// Returns `None` once the policy's retry limit is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.retries = self.retries.saturating_add(1);
        self.policy.decide(self.retries).delay()
    }

    /// Number of failures recorded since the last reset.
    #[inline]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Starts a new sequence.
    pub fn reset(&mut self) {
        self.retries = 0;
    }

    /// Returns the underlying policy.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let millis = duration.as_millis() as f64;
    let spread = millis * jitter_factor;
    let offset = rand::thread_rng().gen_range(-1.0..=1.0) * spread;

    Duration::from_millis((millis + offset).max(0.0) as u64)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_unlimited() {
        let policy = BackoffPolicy::default();
        assert!(policy.is_unlimited());
        assert!(policy.validate().is_ok());
        assert!(matches!(policy.decide(10_000), RetryDecision::Retry(_)));
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let policy = BackoffPolicy::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000));

        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(4), Duration::from_millis(800));
        assert_eq!(policy.base_delay(5), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_max_retries_gives_up() {
        let mut backoff = Backoff::new(
            BackoffPolicy::fixed(Duration::from_millis(5)).with_max_retries(2),
        );

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.retries(), 3);

        backoff.reset();
        assert_eq!(backoff.retries(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(1000)).with_jitter(0.2);
        for retry in 1..50 {
            let delay = policy.decide(retry).delay().unwrap();
            assert!(delay >= Duration::from_millis(800), "{delay:?}");
            assert!(delay <= Duration::from_millis(1200), "{delay:?}");
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let policy = BackoffPolicy::default().with_multiplier(0.5);
        assert!(policy.validate().is_err());

        let policy = BackoffPolicy::default()
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(1));
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_serde_defaults() {
        let policy: BackoffPolicy = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(policy.max_retries, Some(5));
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));

        let policy: BackoffPolicy =
            serde_json::from_str(r#"{"initial_delay": 250, "max_delay": 4000}"#).unwrap();
        assert!(policy.is_unlimited());
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_display() {
        let text = BackoffPolicy::default().with_max_retries(3).to_string();
        assert!(text.starts_with("max_retries=3"));
        assert!(BackoffPolicy::default().to_string().contains("unlimited"));
    }
}
