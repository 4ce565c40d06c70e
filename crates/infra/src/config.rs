//! Worker host settings.
//!
//! Every value has a default; environment variables override them. A value that
//! fails to parse is logged and ignored rather than aborting startup.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::processing::{ProcessingLoopConfig, parse_switch};

pub const WORKER_NAME_VAR: &str = "CATCHUP_WORKER_NAME";
pub const SAMPLE_INTERVAL_VAR: &str = "CATCHUP_SAMPLE_INTERVAL_MS";
pub const MAINTENANCE_REFRESH_VAR: &str = "CATCHUP_MAINTENANCE_REFRESH_MS";
pub const DRAIN_TIMEOUT_VAR: &str = "CATCHUP_DRAIN_TIMEOUT_MS";
pub const TELEMETRY_ENABLED_VAR: &str = "CATCHUP_TELEMETRY_ENABLED";
pub const MAINTENANCE_MODE_VAR: &str = "CATCHUP_MAINTENANCE_MODE";
pub const CHANNEL_CAPACITY_VAR: &str = "CATCHUP_CHANNEL_CAPACITY";
pub const WORKERS_VAR: &str = "CATCHUP_WORKERS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub name: String,
    pub sample_interval_ms: u64,
    pub maintenance_refresh_ms: u64,
    pub drain_timeout_ms: u64,
    pub telemetry_enabled: bool,
    pub maintenance_mode: bool,
    pub channel_capacity: usize,
    pub workers: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            name: "catchup-worker".to_string(),
            sample_interval_ms: 10_000,
            maintenance_refresh_ms: 10_000,
            drain_timeout_ms: 30_000,
            telemetry_enabled: false,
            maintenance_mode: false,
            channel_capacity: 1024,
            workers: 4,
        }
    }
}

impl WorkerSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (environment, test map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(name) = lookup(WORKER_NAME_VAR).filter(|n| !n.trim().is_empty()) {
            settings.name = name;
        }
        override_parsed(&lookup, SAMPLE_INTERVAL_VAR, &mut settings.sample_interval_ms);
        override_parsed(
            &lookup,
            MAINTENANCE_REFRESH_VAR,
            &mut settings.maintenance_refresh_ms,
        );
        override_parsed(&lookup, DRAIN_TIMEOUT_VAR, &mut settings.drain_timeout_ms);
        override_parsed(&lookup, CHANNEL_CAPACITY_VAR, &mut settings.channel_capacity);
        override_parsed(&lookup, WORKERS_VAR, &mut settings.workers);
        override_switch(&lookup, TELEMETRY_ENABLED_VAR, &mut settings.telemetry_enabled);
        override_switch(&lookup, MAINTENANCE_MODE_VAR, &mut settings.maintenance_mode);

        settings
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn maintenance_refresh(&self) -> Duration {
        Duration::from_millis(self.maintenance_refresh_ms.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn loop_config(&self) -> ProcessingLoopConfig {
        ProcessingLoopConfig::default()
            .with_name(self.name.clone())
            .with_sample_interval(self.sample_interval())
            .with_maintenance_refresh(self.maintenance_refresh())
            .with_drain_timeout(self.drain_timeout())
    }
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparsable setting; keeping default"),
    }
}

fn override_switch(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut bool) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match parse_switch(&raw) {
        Some(value) => *target = value,
        None => warn!(key, value = %raw, "ignoring unparsable switch; keeping default"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_cadence() {
        let settings = WorkerSettings::from_lookup(lookup(&[]));

        assert_eq!(settings, WorkerSettings::default());
        assert_eq!(settings.sample_interval(), Duration::from_secs(10));
        assert!(!settings.telemetry_enabled);
    }

    #[test]
    fn env_overrides_apply() {
        let settings = WorkerSettings::from_lookup(lookup(&[
            (WORKER_NAME_VAR, "registrations"),
            (SAMPLE_INTERVAL_VAR, "2500"),
            (TELEMETRY_ENABLED_VAR, "true"),
            (WORKERS_VAR, "8"),
        ]));

        assert_eq!(settings.name, "registrations");
        assert_eq!(settings.sample_interval(), Duration::from_millis(2500));
        assert!(settings.telemetry_enabled);
        assert_eq!(settings.workers, 8);

        let cfg = settings.loop_config();
        assert_eq!(cfg.name, "registrations");
        assert_eq!(cfg.sample_interval, Duration::from_millis(2500));
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let settings = WorkerSettings::from_lookup(lookup(&[
            (TELEMETRY_ENABLED_VAR, "sometimes"),
            (DRAIN_TIMEOUT_VAR, "soon"),
        ]));

        assert!(!settings.telemetry_enabled);
        assert_eq!(settings.drain_timeout_ms, 30_000);
    }

    #[test]
    fn deserializes_partial_json() {
        let settings: WorkerSettings =
            serde_json::from_str(r#"{ "maintenance_mode": true, "workers": 2 }"#).unwrap();

        assert!(settings.maintenance_mode);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.channel_capacity, 1024);
    }
}
