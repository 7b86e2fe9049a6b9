use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ispitch_stream::{ReconnectConfig, StreamConfig};

/// Tracker configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Analysis Service base URL (default: `http://localhost:8000`).
    pub api_url: String,
    /// Bearer credential for REST and push calls (default: none).
    pub token: Option<String>,
    /// Location of the persisted active-job pointer.
    pub state_file: PathBuf,
    /// Push session tuning (backoff and idle timeout).
    pub stream: StreamConfig,
    /// Whether a `Failed` job also clears the persisted pointer.
    pub clear_pointer_on_failure: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            token: None,
            state_file: PathBuf::from("./.ispitch/state.json"),
            stream: StreamConfig::default(),
            clear_pointer_on_failure: true,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                  |
    /// |-----------------------------|--------------------------|
    /// | `ISPITCH_API_URL`           | `http://localhost:8000`  |
    /// | `ISPITCH_TOKEN`             | unset                    |
    /// | `ISPITCH_STATE_FILE`        | `./.ispitch/state.json`  |
    /// | `STREAM_INITIAL_BACKOFF_MS` | `1000`                   |
    /// | `STREAM_MAX_BACKOFF_MS`     | `30000`                  |
    /// | `STREAM_BACKOFF_MULTIPLIER` | `2.0`                    |
    /// | `STREAM_JITTER_RATIO`       | `0.25`                   |
    /// | `STREAM_IDLE_TIMEOUT_SECS`  | `60` (`0` disables)      |
    /// | `CLEAR_POINTER_ON_FAILURE`  | `true`                   |
    ///
    /// Values that fail to parse are logged and replaced by the default.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let reconnect_defaults = ReconnectConfig::default();

        let api_url = lookup("ISPITCH_API_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.api_url);

        let token = lookup("ISPITCH_TOKEN")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let state_file = lookup("ISPITCH_STATE_FILE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.state_file);

        let initial_ms: u64 = parse_or(
            &lookup,
            "STREAM_INITIAL_BACKOFF_MS",
            reconnect_defaults.initial_delay.as_millis() as u64,
            |v| *v > 0,
        );
        let max_ms: u64 = parse_or(
            &lookup,
            "STREAM_MAX_BACKOFF_MS",
            reconnect_defaults.max_delay.as_millis() as u64,
            |v| *v >= initial_ms,
        );
        let multiplier: f64 = parse_or(
            &lookup,
            "STREAM_BACKOFF_MULTIPLIER",
            reconnect_defaults.multiplier,
            |v| v.is_finite() && *v > 1.0,
        );
        let jitter_ratio: f64 = parse_or(
            &lookup,
            "STREAM_JITTER_RATIO",
            reconnect_defaults.jitter_ratio,
            |v| (0.0..1.0).contains(v),
        );
        let idle_secs: u64 = parse_or(&lookup, "STREAM_IDLE_TIMEOUT_SECS", 60, |_| true);

        let clear_pointer_on_failure = parse_or(
            &lookup,
            "CLEAR_POINTER_ON_FAILURE",
            defaults.clear_pointer_on_failure,
            |_| true,
        );

        Self {
            api_url,
            token,
            state_file,
            stream: StreamConfig {
                reconnect: ReconnectConfig {
                    initial_delay: Duration::from_millis(initial_ms),
                    max_delay: Duration::from_millis(max_ms),
                    multiplier,
                    jitter_ratio,
                },
                idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            },
            clear_pointer_on_failure,
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            tracing::warn!(key, value = %raw, default = %default, "Invalid config value, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> TrackerConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TrackerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg.api_url, "http://localhost:8000");
        assert_eq!(cfg.token, None);
        assert_eq!(cfg.state_file, PathBuf::from("./.ispitch/state.json"));
        assert_eq!(cfg.stream.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(cfg.stream.reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(cfg.stream.idle_timeout, Some(Duration::from_secs(60)));
        assert!(cfg.clear_pointer_on_failure);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = config(&[
            ("ISPITCH_API_URL", "https://api.example.com"),
            ("ISPITCH_TOKEN", "tok"),
            ("STREAM_INITIAL_BACKOFF_MS", "250"),
            ("STREAM_MAX_BACKOFF_MS", "5000"),
            ("STREAM_JITTER_RATIO", "0.5"),
            ("STREAM_IDLE_TIMEOUT_SECS", "0"),
            ("CLEAR_POINTER_ON_FAILURE", "false"),
        ]);
        assert_eq!(cfg.api_url, "https://api.example.com");
        assert_eq!(cfg.token.as_deref(), Some("tok"));
        assert_eq!(cfg.stream.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(cfg.stream.reconnect.max_delay, Duration::from_secs(5));
        assert_eq!(cfg.stream.reconnect.jitter_ratio, 0.5);
        assert_eq!(cfg.stream.idle_timeout, None);
        assert!(!cfg.clear_pointer_on_failure);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let cfg = config(&[
            ("STREAM_INITIAL_BACKOFF_MS", "soon"),
            ("STREAM_BACKOFF_MULTIPLIER", "0.5"),
            ("STREAM_JITTER_RATIO", "1.5"),
            ("CLEAR_POINTER_ON_FAILURE", "maybe"),
            ("ISPITCH_TOKEN", "  "),
        ]);
        assert_eq!(cfg.stream.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(cfg.stream.reconnect.multiplier, 2.0);
        assert_eq!(cfg.stream.reconnect.jitter_ratio, 0.25);
        assert!(cfg.clear_pointer_on_failure);
        assert_eq!(cfg.token, None);
    }
}
