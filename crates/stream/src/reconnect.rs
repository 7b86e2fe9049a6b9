//! Exponential-backoff reconnection timing for push channels.
//!
//! When a connection attempt fails or an open stream drops, the session
//! loop asks its [`Backoff`] for the next delay. Delays grow by
//! [`ReconnectConfig::multiplier`], receive additive random jitter, and
//! never exceed [`ReconnectConfig::max_delay`].

use std::time::Duration;

use rand::Rng;

/// Upper bound for the jitter ratio. Keeping it below 1.0 guarantees that
/// uncapped delays are strictly increasing from one attempt to the next.
const MAX_JITTER_RATIO: f64 = 0.95;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Maximum additive jitter, as a fraction of the current base delay.
    pub jitter_ratio: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_ratio: 0.25,
        }
    }
}

/// Calculate the next base delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Add up to `jitter_ratio * base` of random delay, clamped to the max.
pub fn with_jitter(base: Duration, config: &ReconnectConfig) -> Duration {
    let ratio = config.jitter_ratio.clamp(0.0, MAX_JITTER_RATIO);
    let max_jitter_ms = (base.as_millis() as f64 * ratio) as u64;
    if max_jitter_ms == 0 {
        return base.min(config.max_delay);
    }
    let jitter_ms = rand::rng().random_range(0..=max_jitter_ms);
    (base + Duration::from_millis(jitter_ms)).min(config.max_delay)
}

/// Backoff state for one session.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            current,
            attempt: 0,
        }
    }

    /// Advance to the next attempt, returning its number and delay.
    pub fn next_attempt(&mut self) -> (u32, Duration) {
        self.attempt += 1;
        let delay = with_jitter(self.current, &self.config);
        self.current = next_delay(self.current, &self.config);
        (self.attempt, delay)
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            jitter_ratio: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn next_delay_doubles() {
        let config = ReconnectConfig::default();
        let d = next_delay(Duration::from_secs(1), &config);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(8), &config);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn full_backoff_sequence_without_jitter() {
        let mut backoff = Backoff::new(no_jitter());
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];

        for (i, &expected_secs) in expected.iter().enumerate() {
            let (attempt, delay) = backoff.next_attempt();
            assert_eq!(attempt as usize, i + 1);
            assert_eq!(delay.as_secs(), expected_secs);
        }
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let config = ReconnectConfig::default();
        for _ in 0..200 {
            let d = with_jitter(Duration::from_secs(4), &config);
            assert!(d >= Duration::from_secs(4));
            assert!(d <= Duration::from_secs(5));
        }
    }

    #[test]
    fn jitter_never_exceeds_max_delay() {
        let config = ReconnectConfig::default();
        for _ in 0..200 {
            assert!(with_jitter(Duration::from_secs(30), &config) <= config.max_delay);
        }
    }

    #[test]
    fn jittered_delays_strictly_increase_below_cap() {
        let config = ReconnectConfig {
            jitter_ratio: 5.0, // clamped below 1.0
            max_delay: Duration::from_secs(3600),
            ..Default::default()
        };
        for _ in 0..50 {
            let mut backoff = Backoff::new(config.clone());
            let mut previous = Duration::ZERO;
            for _ in 0..8 {
                let (_, delay) = backoff.next_attempt();
                assert!(delay > previous, "{delay:?} <= {previous:?}");
                previous = delay;
            }
        }
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.next_attempt();
        backoff.next_attempt();
        backoff.reset();
        assert_eq!(backoff.next_attempt(), (1, Duration::from_secs(1)));
    }
}
