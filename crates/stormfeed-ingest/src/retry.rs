//! Backoff schedules shared by the fetch and publish retry loops

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shape of the delay curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// `base × 2^retry_index`
    #[default]
    Exponential,
    /// `base` before every retry
    Fixed,
}

impl std::str::FromStr for BackoffKind {
    type Err = stormfeed_common::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exponential" | "exp" => Ok(BackoffKind::Exponential),
            "fixed" => Ok(BackoffKind::Fixed),
            _ => Err(stormfeed_common::Error::InvalidValue {
                key: "backoff kind".to_string(),
                value: s.to_string(),
                reason: "expected 'exponential' or 'fixed'".to_string(),
            }),
        }
    }
}

/// Bounded retry schedule.
///
/// `max_retries` counts retries after the first attempt, so a policy allows at
/// most `max_retries + 1` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    kind: BackoffKind,
    base: Duration,
    max_retries: u32,
}

impl BackoffPolicy {
    pub fn new(kind: BackoffKind, base: Duration, max_retries: u32) -> Self {
        Self {
            kind,
            base,
            max_retries,
        }
    }

    pub fn exponential(base: Duration, max_retries: u32) -> Self {
        Self::new(BackoffKind::Exponential, base, max_retries)
    }

    pub fn fixed(base: Duration, max_retries: u32) -> Self {
        Self::new(BackoffKind::Fixed, base, max_retries)
    }

    pub fn kind(&self) -> BackoffKind {
        self.kind
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts allowed, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `retries_used` retries
    pub fn allows_retry(&self, retries_used: u32) -> bool {
        retries_used < self.max_retries
    }

    /// Delay before retry number `retry_index` (zero-based)
    pub fn delay(&self, retry_index: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.base,
            BackoffKind::Exponential => {
                let factor = 1u32.checked_shl(retry_index).unwrap_or(u32::MAX);
                self.base.saturating_mul(factor)
            },
        }
    }

    /// Sum of every delay the policy can insert
    pub fn total_delay(&self) -> Duration {
        (0..self.max_retries).fold(Duration::ZERO, |acc, i| acc.saturating_add(self.delay(i)))
    }
}
