use std::time::Duration;

use billing_core::config::RetryConfig;
use chrono::{DateTime, Utc};

/// 指数退避: `min(base * multiplier^attempts, max)`，可选对称抖动
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    /// `attempts` 为本次失败计入后的尝试次数
    pub fn delay_for_attempt(&self, attempts: i32) -> Duration {
        let base = self.base_delay_ms as f64;
        let max = self.max_delay_ms as f64;

        let exponential = base * self.backoff_multiplier.powi(attempts.max(0));
        let capped = exponential.min(max);

        let jitter = if self.jitter_factor > 0.0 {
            capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0
        } else {
            0.0
        };
        let final_ms = (capped + jitter).clamp(0.0, max);

        Duration::from_millis(final_ms as u64)
    }

    pub fn next_retry_time(&self, attempts: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempts);
        now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::milliseconds(
            self.max_delay_ms as i64,
        ))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
