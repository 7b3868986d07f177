//! Process-wide monitoring settings
//!
//! Defaults mirror what a cautious operator would pick for untrusted
//! customer replicas: a small query budget, a short timeout, and a couple
//! of consecutive failures before anyone gets paged.

use std::time::Duration;

use crate::guardrail::GuardrailLimits;

/// Monitoring defaults, overridable per deployment via `REPLIWATCH_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Consecutive failures required before an alert opens
    pub alert_threshold_failures: u32,
    /// Number of volume observations kept per table
    pub baseline_window_size: usize,
    /// Age after which a table's newest row counts as stale
    pub staleness_threshold: Duration,
    /// Relative deviation from the baseline average that counts as an anomaly
    pub anomaly_threshold: f64,
    /// Replica lag considered unhealthy
    pub replica_lag_threshold: Duration,
    /// Suppress alert creation while replica lag exceeds twice the threshold
    pub backpressure_enabled: bool,
    /// Guardrail limits applied to connections registered without their own
    pub default_guardrails: GuardrailLimits,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            alert_threshold_failures: 2,
            baseline_window_size: 10,
            staleness_threshold: Duration::from_secs(600),
            anomaly_threshold: 0.30,
            replica_lag_threshold: Duration::from_secs(30),
            backpressure_enabled: true,
            default_guardrails: GuardrailLimits::default(),
        }
    }
}

impl Settings {
    /// Build settings from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(v) = env_parse::<u32>("REPLIWATCH_ALERT_THRESHOLD") {
            settings.alert_threshold_failures = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("REPLIWATCH_BASELINE_WINDOW") {
            settings.baseline_window_size = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("REPLIWATCH_STALENESS_SECS") {
            settings.staleness_threshold = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<f64>("REPLIWATCH_ANOMALY_THRESHOLD") {
            settings.anomaly_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("REPLIWATCH_LAG_THRESHOLD_SECS") {
            settings.replica_lag_threshold = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<bool>("REPLIWATCH_BACKPRESSURE") {
            settings.backpressure_enabled = v;
        }
        if let Some(v) = env_parse::<usize>("REPLIWATCH_MAX_QUERIES_PER_MINUTE") {
            settings.default_guardrails.max_queries_per_minute = v;
        }
        if let Some(v) = env_parse::<usize>("REPLIWATCH_MAX_CONCURRENT_QUERIES") {
            settings.default_guardrails.max_concurrent_queries = v;
        }
        if let Some(v) = env_parse::<u64>("REPLIWATCH_QUERY_TIMEOUT_SECS") {
            settings.default_guardrails.query_timeout = Duration::from_secs(v);
        }

        settings
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.alert_threshold_failures, 2);
        assert_eq!(settings.baseline_window_size, 10);
        assert_eq!(settings.staleness_threshold, Duration::from_secs(600));
        assert!(settings.backpressure_enabled);
        assert_eq!(settings.default_guardrails.max_queries_per_minute, 60);
    }
}
