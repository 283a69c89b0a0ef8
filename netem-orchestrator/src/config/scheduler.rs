use impairment_core::scheduler::SchedulerConfig;
use serde::Deserialize;
use std::time::Duration;

/// Overrides for the scheduler defaults, every field is optional
#[derive(Deserialize, Clone, Default)]
pub struct SchedulerJson {
    workers: Option<usize>,
    event_buffer: Option<usize>,
    misfire_grace_secs: Option<u64>,
    max_idle_sleep_secs: Option<u64>,
    reconcile_interval_secs: Option<u64>,
    #[serde(default)]
    retry: RetryJson,
}

#[derive(Deserialize, Clone, Default)]
struct RetryJson {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    multiplier: Option<u32>,
    max_backoff_ms: Option<u64>,
}

impl From<SchedulerJson> for SchedulerConfig {
    fn from(json: SchedulerJson) -> Self {
        let mut config = SchedulerConfig::default();
        let secs = Duration::from_secs;
        let millis = Duration::from_millis;

        config.workers = json.workers.unwrap_or(config.workers).max(1);
        config.event_buffer = json.event_buffer.unwrap_or(config.event_buffer);
        config.misfire_grace = json.misfire_grace_secs.map_or(config.misfire_grace, secs);
        config.max_idle_sleep = json.max_idle_sleep_secs.map_or(config.max_idle_sleep, secs);
        config.reconcile_interval = json
            .reconcile_interval_secs
            .map_or(config.reconcile_interval, secs);

        let retry = &mut config.retry;
        retry.max_attempts = json.retry.max_attempts.unwrap_or(retry.max_attempts).max(1);
        retry.initial_backoff = json
            .retry
            .initial_backoff_ms
            .map_or(retry.initial_backoff, millis);
        retry.multiplier = json.retry.multiplier.unwrap_or(retry.multiplier);
        retry.max_backoff = json.retry.max_backoff_ms.map_or(retry.max_backoff, millis);

        config
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_overrides_keep_defaults() {
        let json: SchedulerJson = serde_json::from_str(
            r#"{"workers": 2, "misfire_grace_secs": 5, "retry": {"max_attempts": 0}}"#,
        )
        .unwrap();
        let config = SchedulerConfig::from(json);
        let defaults = SchedulerConfig::default();

        assert_eq!(config.workers, 2);
        assert_eq!(config.misfire_grace, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.initial_backoff, defaults.retry.initial_backoff);
        assert_eq!(config.reconcile_interval, defaults.reconcile_interval);
    }
}
