//! Round scheduling: one-shot and continuous modes.
//!
//! The scheduler is the single point absorbing isolated device faults: a
//! fatal classification for one device never stops it. It owns the
//! auth-exclusion set, the total-failure policy, and persistence after
//! each round. The inter-round sleep is interruptible; an in-flight round
//! always runs to completion so persisted state is never partial.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::watch;

use confwatch_core::{Device, DeviceName, DeviceOutcome, FleetState};
use confwatch_store::StateStore;

use crate::config::{AuthFailurePolicy, TotalFailurePolicy};
use crate::error::{MonitorError, Result};
use crate::poller::{Poller, RoundResult};

/// Totals for a bounded or signal-terminated run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub rounds: u64,
    /// Fatal device classifications observed across all rounds.
    pub fatal_devices: u64,
}

/// Drives repeated polling rounds until stopped.
pub struct Scheduler {
    poller: Poller,
    devices: Vec<Device>,
    state: FleetState,
    interval: Duration,
    auth_policy: AuthFailurePolicy,
    total_policy: TotalFailurePolicy,
    store_out: Option<Box<dyn StateStore>>,
    excluded: HashSet<DeviceName>,
}

impl Scheduler {
    pub fn new(
        poller: Poller,
        devices: Vec<Device>,
        state: FleetState,
        interval: Duration,
        auth_policy: AuthFailurePolicy,
        total_policy: TotalFailurePolicy,
        store_out: Option<Box<dyn StateStore>>,
    ) -> Self {
        Self {
            poller,
            devices,
            state,
            interval,
            auth_policy,
            total_policy,
            store_out,
            excluded: HashSet::new(),
        }
    }

    /// Fleet state after the most recent round.
    pub fn state(&self) -> &FleetState {
        &self.state
    }

    /// Run a single round and persist the result.
    ///
    /// Errors only when the total-failure policy says a fully failed round
    /// must abort; per-device fatals are reported through the result.
    pub async fn run_once(&mut self) -> Result<RoundResult> {
        let result = self.run_round().await;
        self.check_total_failure(&result)?;
        Ok(result)
    }

    /// Continuous mode: poll, sleep, repeat until `shutdown` flips or the
    /// optional round budget is spent.
    pub async fn run_continuous(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
        max_rounds: Option<u64>,
    ) -> Result<RunStats> {
        let mut stats = RunStats::default();

        loop {
            let result = self.run_round().await;
            stats.rounds += 1;
            stats.fatal_devices += result
                .outcomes
                .iter()
                .filter(|o| o.is_fatal())
                .count() as u64;
            self.check_total_failure(&result)?;

            if let Some(budget) = max_rounds {
                if stats.rounds >= budget {
                    tracing::info!(rounds = stats.rounds, "Round budget spent, stopping");
                    return Ok(stats);
                }
            }
            if *shutdown.borrow() {
                tracing::info!("Shutdown requested, stopping");
                return Ok(stats);
            }

            // Interruptible inter-round sleep; the round above always ran
            // to completion before shutdown is honored.
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Shutdown requested, stopping");
                        return Ok(stats);
                    }
                }
            }
        }
    }

    async fn run_round(&mut self) -> RoundResult {
        let targets: Vec<Device> = self
            .devices
            .iter()
            .filter(|d| !self.excluded.contains(&d.name))
            .cloned()
            .collect();
        for name in &self.excluded {
            tracing::warn!(device = %name, "Device excluded after authentication failure");
        }

        let result = self.poller.poll_round(&targets, &self.state).await;
        self.state = result.state.clone();

        if self.auth_policy == AuthFailurePolicy::Exclude {
            for outcome in &result.outcomes {
                if let DeviceOutcome::AuthFailed { device, .. } = outcome {
                    if self.excluded.insert(device.clone()) {
                        tracing::warn!(
                            device = %device,
                            "Excluding device for the remainder of the process"
                        );
                    }
                }
            }
        }

        // Persist strictly after the round has fully completed. A write
        // failure is reported but never rolls back in-memory state.
        if let Some(store) = &self.store_out {
            if let Err(e) = store.save(&self.state) {
                tracing::error!(error = %e, "State save failed");
            }
        }

        tracing::info!(
            round_id = %result.round_id,
            polled = result.summary.polled,
            changed = result.summary.changed,
            baselined = result.summary.baselined,
            skipped = result.summary.skipped,
            failed = result.summary.failed,
            "Round complete"
        );

        result
    }

    fn check_total_failure(&self, result: &RoundResult) -> Result<()> {
        if self.devices.is_empty() {
            return Ok(());
        }

        let all_excluded = result.summary.polled == 0;
        let none_succeeded = result.summary.polled > 0
            && result
                .outcomes
                .iter()
                .all(|o| matches!(o, DeviceOutcome::Skipped { .. } | DeviceOutcome::AuthFailed { .. }));

        if all_excluded || none_succeeded {
            let detail = if all_excluded {
                "every configured device is excluded".to_string()
            } else {
                format!("{} devices, zero successful polls", result.summary.polled)
            };
            match self.total_policy {
                TotalFailurePolicy::Continue => {
                    tracing::warn!(detail = %detail, "Round failed for the entire fleet");
                }
                TotalFailurePolicy::Abort => {
                    return Err(MonitorError::TotalFailure(detail));
                }
            }
        }
        Ok(())
    }
}
