//! Per-round report types surfaced by the poller.
//!
//! Each device produces exactly one outcome per round. Outcomes are
//! serde-tagged so a round's results can be emitted as a machine-readable
//! stream alongside the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DeviceName;

/// A single trackable counter that increased this round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CounterChange {
    pub counter: String,
    pub previous: u64,
    pub observed: u64,
    /// Reference-counter ticks elapsed since the prior round.
    pub elapsed_ticks: u64,
    /// Estimated instant the change occurred.
    pub changed_at: DateTime<Utc>,
}

/// Change report for one device that had a baseline entering the round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundReport {
    pub device: DeviceName,
    pub changed: bool,
    /// Human-readable account of every change, one line per counter.
    pub narrative: String,
    pub changes: Vec<CounterChange>,
}

/// Outcome of one device's poll within a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeviceOutcome {
    /// Compared against an existing baseline.
    Report(RoundReport),
    /// First successful poll; baseline established, nothing to compare.
    BaselineEstablished { device: DeviceName },
    /// Transient failure; device skipped this round, state untouched.
    Skipped { device: DeviceName, reason: String },
    /// Authentication rejected; fatal for the device per policy.
    AuthFailed { device: DeviceName, detail: String },
    /// A counter expected to be monotonic decreased. Monitoring-integrity
    /// violation; state untouched.
    Rollback {
        device: DeviceName,
        counter: String,
        stored: u64,
        observed: u64,
    },
}

impl DeviceOutcome {
    /// The device this outcome belongs to.
    pub fn device(&self) -> &DeviceName {
        match self {
            Self::Report(report) => &report.device,
            Self::BaselineEstablished { device }
            | Self::Skipped { device, .. }
            | Self::AuthFailed { device, .. }
            | Self::Rollback { device, .. } => device,
        }
    }

    /// True for classifications that are fatal for the device.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthFailed { .. } | Self::Rollback { .. })
    }
}

/// Aggregate counts for a completed round.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundSummary {
    /// Devices dispatched this round.
    pub polled: u32,
    /// Devices that reported at least one changed counter.
    pub changed: u32,
    /// Devices that established their baseline this round.
    pub baselined: u32,
    /// Devices skipped on a transient failure.
    pub skipped: u32,
    /// Devices with a fatal classification (auth or rollback).
    pub failed: u32,
}
