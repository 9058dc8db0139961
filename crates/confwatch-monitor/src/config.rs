//! Configuration for the confwatch monitor.

use serde::Deserialize;

use confwatch_core::{CounterSet, TrackedCounter};

use crate::error::{MonitorError, Result};

/// Top-level monitor configuration.
///
/// Loaded from `confwatch.toml` `[monitor]` section or
/// `CONFWATCH_MONITOR__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between polling rounds in continuous mode.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum devices polled concurrently within a round.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_polls: usize,

    /// Per-call timeout in seconds for each counter query.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Path to the snmpget-compatible binary.
    #[serde(default = "default_snmpget_path")]
    pub snmpget_path: String,

    /// Sendmail-style command alerts are piped to. When unset, alerts go
    /// to the log only.
    #[serde(default)]
    pub notify_command: Option<String>,

    /// What to do with a device after an authentication failure.
    #[serde(default)]
    pub on_auth_failure: AuthFailurePolicy,

    /// What to do when every device in a round failed.
    #[serde(default)]
    pub on_total_failure: TotalFailurePolicy,

    /// Counter-set override; defaults to the Cisco change-history group.
    #[serde(default)]
    pub counters: Option<CounterSpec>,
}

/// Policy for devices whose credentials are rejected.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthFailurePolicy {
    /// Keep retrying the device on every round.
    Retry,
    /// Exclude the device for the remainder of the process.
    #[default]
    Exclude,
}

/// Policy for rounds in which no device could be polled.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TotalFailurePolicy {
    #[default]
    Continue,
    Abort,
}

/// Declarative counter-set override.
#[derive(Debug, Clone, Deserialize)]
pub struct CounterSpec {
    /// Name of the reference counter; must appear in `counters`.
    pub reference: String,
    pub counters: Vec<CounterEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterEntry {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub trackable: bool,
}

impl MonitorConfig {
    /// Resolve the effective counter set.
    pub fn counter_set(&self) -> Result<CounterSet> {
        match &self.counters {
            None => Ok(CounterSet::cisco_default()),
            Some(spec) => {
                let counters = spec
                    .counters
                    .iter()
                    .map(|c| TrackedCounter::new(&c.name, &c.key, c.trackable))
                    .collect();
                CounterSet::new(counters, &spec.reference).map_err(MonitorError::from)
            }
        }
    }
}

fn default_poll_interval() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    4
}

fn default_query_timeout() -> u64 {
    10
}

fn default_snmpget_path() -> String {
    "snmpget".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_concurrent_polls: default_max_concurrent(),
            query_timeout_secs: default_query_timeout(),
            snmpget_path: default_snmpget_path(),
            notify_command: None,
            on_auth_failure: AuthFailurePolicy::default(),
            on_total_failure: TotalFailurePolicy::default(),
            counters: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_interval_secs, 300);
        assert_eq!(config.max_concurrent_polls, 4);
        assert_eq!(config.snmpget_path, "snmpget");
        assert_eq!(config.on_auth_failure, AuthFailurePolicy::Exclude);
        assert_eq!(config.on_total_failure, TotalFailurePolicy::Continue);
    }

    #[test]
    fn default_counter_set_is_cisco() {
        let config = MonitorConfig::default();
        let set = config.counter_set().unwrap();
        assert_eq!(set.reference(), "sysUptime");
    }

    #[test]
    fn counter_override_is_validated() {
        let config = MonitorConfig {
            counters: Some(CounterSpec {
                reference: "uptime".to_string(),
                counters: vec![CounterEntry {
                    name: "confChanged".to_string(),
                    key: "1.2.3.4".to_string(),
                    trackable: true,
                }],
            }),
            ..MonitorConfig::default()
        };
        // Reference is not in the set.
        assert!(config.counter_set().is_err());
    }
}
