//! Fetcher configuration and retry backoff

use std::time::Duration;

/// Tuning for [`crate::HttpTransferFetcher`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Transparent reconnect attempts before the transfer fails.
    pub max_retries: u32,
    /// Backoff before the first reconnect.
    pub initial_retry_delay: Duration,
    /// Upper bound on the backoff.
    pub max_retry_delay: Duration,
    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,
    /// Relative jitter applied to each delay, `0.0..=1.0`.
    pub jitter_factor: f64,
    /// Cut the transfer off when no bytes arrive for this long.
    /// `None` disables stall detection.
    pub low_speed_timeout: Option<Duration>,
    /// User-agent header on every request.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.25,
            low_speed_timeout: None,
            user_agent: format!("otad/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Exponential backoff delay with jitter for reconnect `attempt` (1-based).
pub(crate) fn backoff_delay(config: &FetchConfig, attempt: u32) -> Duration {
    // Cap the exponent; 2^30 already exceeds any sane max_retry_delay.
    let attempt = attempt.saturating_sub(1).min(30);

    #[allow(clippy::cast_precision_loss)]
    let base_ms = config.initial_retry_delay.as_millis() as f64;
    #[allow(clippy::cast_precision_loss)]
    let max_ms = config.max_retry_delay.as_millis() as f64;

    #[allow(clippy::cast_possible_wrap)]
    let delay_ms = (base_ms * config.backoff_multiplier.powi(attempt as i32))
        .min(max_ms)
        .max(0.0);

    // Jitter spreads simultaneous retries from a fleet of devices apart.
    let jitter_factor = config.jitter_factor.clamp(0.0, 1.0);
    let jitter_ms = delay_ms * jitter_factor * (rand::random::<f64>() - 0.5);
    let final_delay_ms = (delay_ms + jitter_ms).max(0.0);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Duration::from_millis(final_delay_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> FetchConfig {
        FetchConfig {
            jitter_factor: 0.0,
            ..FetchConfig::default()
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let config = no_jitter();
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(4));
        // Capped at max_retry_delay.
        assert_eq!(backoff_delay(&config, 20), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_half_factor() {
        let config = FetchConfig {
            jitter_factor: 0.5,
            ..FetchConfig::default()
        };
        for _ in 0..100 {
            let delay = backoff_delay(&config, 2);
            assert!(delay >= Duration::from_millis(1500));
            assert!(delay <= Duration::from_millis(2500));
        }
    }
}
