//! Poll backoff used while waiting on external convergence (health gates).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the poll interval grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Randomization applied on top of the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    #[default]
    Equal,
}

/// Backoff settings for a polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the second poll, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth strategy.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl BackoffConfig {
    /// A fixed interval with no jitter.
    #[must_use]
    pub fn constant(delay: Duration) -> Self {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Self {
            base_delay_ms: ms,
            max_delay_ms: ms,
            strategy: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay to wait after poll number `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let delay = match self.strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(attempt)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt) + 1),
            BackoffStrategy::Constant => base,
        }
        .min(self.max_delay_ms);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full if delay == 0 => 0,
            JitterStrategy::Full => rand::thread_rng().gen_range(0..=delay),
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(strategy: BackoffStrategy) -> BackoffConfig {
        BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            strategy,
            jitter: JitterStrategy::None,
        }
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let config = no_jitter(BackoffStrategy::Exponential);
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
        assert_eq!(config.delay_for(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_linear_and_constant() {
        assert_eq!(no_jitter(BackoffStrategy::Linear).delay_for(2), Duration::from_millis(300));
        assert_eq!(no_jitter(BackoffStrategy::Constant).delay_for(7), Duration::from_millis(100));
        assert_eq!(
            BackoffConfig::constant(Duration::from_millis(3)).delay_for(5),
            Duration::from_millis(3)
        );
    }

    #[test]
    fn test_equal_jitter_stays_in_upper_half() {
        let config = no_jitter(BackoffStrategy::Constant).with_jitter(JitterStrategy::Equal);
        for _ in 0..20 {
            let delay = config.delay_for(0).as_millis();
            assert!((50..=100).contains(&delay));
        }
    }

    #[test]
    fn test_full_jitter_never_exceeds_delay() {
        let config = no_jitter(BackoffStrategy::Constant).with_jitter(JitterStrategy::Full);
        assert!((0..20).all(|_| config.delay_for(0) <= Duration::from_millis(100)));
    }
}
