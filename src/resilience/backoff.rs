//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Un-jittered delay before `attempt` (the attempt about to run, 2 or later).
pub fn base_delay_ms(config: &RetryConfig, attempt: u32) -> f64 {
    let exponent = attempt.saturating_sub(1) as i32;
    let delay = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    delay.min(config.max_delay_ms as f64)
}

/// Delay before `attempt`, with symmetric jitter of `± jitter_factor`.
pub fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let delay = base_delay_ms(config, attempt);
    let jitter = if config.jitter_factor > 0.0 {
        delay * config.jitter_factor * rand::thread_rng().gen_range(-1.0f64..=1.0)
    } else {
        0.0
    };
    Duration::from_millis((delay + jitter).max(0.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    #[test]
    fn test_backoff_bounds() {
        let config = config();
        for _ in 0..500 {
            let second = calculate_backoff(&config, 2).as_millis();
            assert!((1800..=2200).contains(&second), "attempt 2 delay {}", second);

            let third = calculate_backoff(&config, 3).as_millis();
            assert!((3600..=4400).contains(&third), "attempt 3 delay {}", third);
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut config = config();
        config.max_delay_ms = 5000;
        config.jitter_factor = 0.0;
        assert_eq!(calculate_backoff(&config, 10), Duration::from_millis(5000));
    }
}
