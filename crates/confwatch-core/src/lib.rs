//! confwatch-core: Shared types and error handling for the confwatch fleet monitor.
//!
//! This crate provides the foundational types used across all confwatch components:
//! - Inventory types (Device, Credentials, Transport) — config-owned, immutable
//! - Counter definitions (TrackedCounter, CounterSet)
//! - Comparison state (DeviceState, FleetState) — core-owned, mutable
//! - Per-round report and outcome types

pub mod error;
pub mod report;
pub mod types;

pub use error::CoreError;
pub use report::{CounterChange, DeviceOutcome, RoundReport, RoundSummary};
pub use types::{
    CounterSet, Credentials, Device, DeviceName, DeviceState, FleetState, TrackedCounter,
    Transport,
};
