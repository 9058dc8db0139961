//! Core domain types for the confwatch fleet monitor.
//!
//! Per-device data splits into a config-owned, immutable `Device` and a
//! core-owned, mutable `DeviceState`, joined by device name.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── Device identity ───────────────────────────────────────────────

/// Name of a monitored device, the key for all per-device state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceName(pub String);

impl DeviceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Inventory (config-owned, read-only to the core) ───────────────

/// Credentials used to authenticate counter queries against a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Security/user name presented to the device.
    pub security_name: String,
    /// Authentication passphrase.
    pub auth_passphrase: String,
    /// Privacy (encryption) passphrase; may be empty for auth-only profiles.
    #[serde(default)]
    pub priv_passphrase: String,
}

/// Transport profile used to reach a device.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Community-string v2c profile; `security_name` carries the community.
    V2c,
    /// USM v3 profile with authentication and privacy.
    #[default]
    V3,
}

/// A monitored network device.
///
/// Loaded once per process from the inventory file and never mutated by
/// the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub name: DeviceName,
    pub address: String,
    #[serde(default = "default_query_port")]
    pub port: u16,
    pub credentials: Credentials,
    #[serde(default)]
    pub transport: Transport,
}

fn default_query_port() -> u16 {
    161
}

// ── Counters ──────────────────────────────────────────────────────

/// A named counter with the device-side key it is queried by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedCounter {
    pub name: String,
    /// Opaque query key understood by the device querier (an OID).
    pub key: String,
    /// Whether an increase in this counter is a reportable change.
    /// Non-trackable counters are stored for reference bookkeeping only.
    #[serde(default)]
    pub trackable: bool,
}

impl TrackedCounter {
    pub fn new(name: impl Into<String>, key: impl Into<String>, trackable: bool) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            trackable,
        }
    }
}

/// The ordered set of counters polled each round.
///
/// One counter is designated the reference counter: a monotonically
/// increasing tick source used purely to convert other counters' deltas
/// into elapsed time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterSet {
    counters: Vec<TrackedCounter>,
    reference: String,
}

impl CounterSet {
    /// Build a validated counter set.
    ///
    /// The reference counter must be a member of the set, counter names
    /// must be unique, and at least one counter must be trackable.
    pub fn new(
        counters: Vec<TrackedCounter>,
        reference: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let reference = reference.into();

        let mut seen = std::collections::HashSet::new();
        for counter in &counters {
            if !seen.insert(counter.name.as_str()) {
                return Err(CoreError::CounterSet(format!(
                    "duplicate counter name: {}",
                    counter.name
                )));
            }
        }
        if !counters.iter().any(|c| c.name == reference) {
            return Err(CoreError::CounterSet(format!(
                "reference counter {reference} is not in the set"
            )));
        }
        if !counters.iter().any(|c| c.trackable) {
            return Err(CoreError::CounterSet(
                "counter set has no trackable counters".to_string(),
            ));
        }

        Ok(Self {
            counters,
            reference,
        })
    }

    /// The default Cisco change-history group anchored on sysUptime.
    pub fn cisco_default() -> Self {
        Self {
            counters: vec![
                TrackedCounter::new("sysUptime", "1.3.6.1.2.1.1.3.0", false),
                TrackedCounter::new(
                    "ccmHistoryRunningLastChanged",
                    "1.3.6.1.4.1.9.9.43.1.1.1.0",
                    true,
                ),
                TrackedCounter::new(
                    "ccmHistoryRunningLastSaved",
                    "1.3.6.1.4.1.9.9.43.1.1.2.0",
                    true,
                ),
                TrackedCounter::new(
                    "ccmHistoryStartupLastChanged",
                    "1.3.6.1.4.1.9.9.43.1.1.3.0",
                    true,
                ),
            ],
            reference: "sysUptime".to_string(),
        }
    }

    /// All counters in configured polling order.
    pub fn counters(&self) -> &[TrackedCounter] {
        &self.counters
    }

    /// Name of the reference counter.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Counters whose increase constitutes a reportable change.
    pub fn trackable(&self) -> impl Iterator<Item = &TrackedCounter> {
        self.counters.iter().filter(|c| c.trackable)
    }
}

// ── Fleet state (core-owned, mutable) ─────────────────────────────

/// Per-device comparison state, updated every successful round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceState {
    /// Timestamp of the most recent round for this device.
    pub last_poll: DateTime<Utc>,
    /// False only before the device's first successful round.
    pub has_baseline: bool,
    /// Last observed raw value per counter name.
    pub values: BTreeMap<String, u64>,
    /// Change flag per trackable counter, set on the most recent round.
    pub changed: BTreeMap<String, bool>,
}

impl DeviceState {
    /// Entry for a device that has not completed a round yet.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            last_poll: now,
            has_baseline: false,
            values: BTreeMap::new(),
            changed: BTreeMap::new(),
        }
    }
}

/// Comparison state for the whole fleet, keyed by device name.
///
/// Entries are created on a device's first successful poll (or restored
/// from a persisted snapshot) and never deleted during a process's life.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FleetState {
    pub devices: BTreeMap<DeviceName, DeviceState>,
}

impl FleetState {
    pub fn get(&self, name: &DeviceName) -> Option<&DeviceState> {
        self.devices.get(name)
    }

    pub fn insert(&mut self, name: DeviceName, state: DeviceState) {
        self.devices.insert(name, state);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_set_rejects_unknown_reference() {
        let result = CounterSet::new(
            vec![TrackedCounter::new("a", "1.2.3", true)],
            "missing",
        );
        assert!(matches!(result, Err(CoreError::CounterSet(_))));
    }

    #[test]
    fn counter_set_rejects_duplicate_names() {
        let result = CounterSet::new(
            vec![
                TrackedCounter::new("a", "1.2.3", true),
                TrackedCounter::new("a", "1.2.4", false),
            ],
            "a",
        );
        assert!(matches!(result, Err(CoreError::CounterSet(_))));
    }

    #[test]
    fn counter_set_requires_a_trackable_counter() {
        let result = CounterSet::new(
            vec![TrackedCounter::new("uptime", "1.2.3", false)],
            "uptime",
        );
        assert!(matches!(result, Err(CoreError::CounterSet(_))));
    }

    #[test]
    fn cisco_default_shape() {
        let set = CounterSet::cisco_default();
        assert_eq!(set.reference(), "sysUptime");
        assert_eq!(set.counters().len(), 4);
        assert_eq!(set.trackable().count(), 3);
        // The reference itself is bookkeeping only.
        assert!(!set.counters()[0].trackable);
    }

    #[test]
    fn device_deserializes_with_defaults() {
        let yaml = r#"
name: pynet-rtr1
address: 198.51.100.11
credentials:
  security_name: monitor
  auth_passphrase: authsecret
"#;
        let device: Device = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(device.name.as_str(), "pynet-rtr1");
        assert_eq!(device.port, 161);
        assert_eq!(device.transport, Transport::V3);
        assert!(device.credentials.priv_passphrase.is_empty());
    }

    #[test]
    fn fleet_state_roundtrips_through_json() {
        let mut fleet = FleetState::default();
        let mut state = DeviceState::empty(Utc::now());
        state.has_baseline = true;
        state.values.insert("sysUptime".to_string(), 123_456);
        state.changed.insert("ccmHistoryRunningLastChanged".to_string(), false);
        fleet.insert(DeviceName::new("rtr1"), state);

        let json = serde_json::to_string(&fleet).unwrap();
        let back: FleetState = serde_json::from_str(&json).unwrap();
        assert_eq!(fleet, back);
    }
}
