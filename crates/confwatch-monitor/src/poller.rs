//! Round execution: fan one worker out per device, aggregate outcomes.
//!
//! Workers never share mutable state. Each receives a clone of its own
//! device's prior entry and sends exactly one outcome back through the
//! round's channel; the single aggregation loop merges state, logs results
//! as they arrive, and invokes the notifier at most once per changed
//! device. A round is complete only after every dispatched worker has
//! reported.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use confwatch_core::{
    CounterChange, CounterSet, Device, DeviceName, DeviceOutcome, DeviceState, FleetState,
    RoundReport, RoundSummary,
};

use crate::arith;
use crate::notify::Notifier;
use crate::querier::{DeviceQuerier, QueryError};

/// Result of a full polling round.
#[derive(Debug)]
pub struct RoundResult {
    pub round_id: Uuid,
    /// Fleet state after the round; untouched entries are carried over.
    pub state: FleetState,
    /// One outcome per dispatched device, in arrival order.
    pub outcomes: Vec<DeviceOutcome>,
    pub summary: RoundSummary,
}

impl RoundResult {
    /// True when any device hit a fatal classification (auth or rollback).
    pub fn has_fatal(&self) -> bool {
        self.outcomes.iter().any(DeviceOutcome::is_fatal)
    }
}

/// Executes polling rounds across the configured fleet.
pub struct Poller {
    counters: CounterSet,
    querier: Arc<dyn DeviceQuerier>,
    notifier: Arc<dyn Notifier>,
    concurrency: Arc<Semaphore>,
}

impl Poller {
    pub fn new(
        counters: CounterSet,
        querier: Arc<dyn DeviceQuerier>,
        notifier: Arc<dyn Notifier>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            counters,
            querier,
            notifier,
            concurrency: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Execute one round across `devices`, starting from `prior`.
    pub async fn poll_round(&self, devices: &[Device], prior: &FleetState) -> RoundResult {
        let round_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(devices.len().max(1));

        let mut dispatched = 0usize;
        for device in devices {
            let tx = tx.clone();
            let device = device.clone();
            let prior_entry = prior.get(&device.name).cloned();
            let counters = self.counters.clone();
            let querier = Arc::clone(&self.querier);
            let semaphore = Arc::clone(&self.concurrency);

            dispatched += 1;
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("Semaphore closed");
                let result = poll_device(querier.as_ref(), &counters, &device, prior_entry).await;
                // The receiver outlives the round; a send failure means the
                // aggregator is gone and there is nothing left to report to.
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        tracing::debug!(round_id = %round_id, devices = dispatched, "Round dispatched");

        let mut state = prior.clone();
        let mut outcomes = Vec::with_capacity(dispatched);
        let mut summary = RoundSummary {
            polled: dispatched as u32,
            ..RoundSummary::default()
        };

        // Stream outcomes as workers finish; the channel closes once every
        // worker has sent its single result.
        while let Some((outcome, new_state)) = rx.recv().await {
            let name = outcome.device().clone();
            if let Some(entry) = new_state {
                state.insert(name.clone(), entry);
            }

            match &outcome {
                DeviceOutcome::Report(report) => {
                    if report.changed {
                        summary.changed += 1;
                        tracing::info!(
                            round_id = %round_id,
                            device = %name,
                            counters = report.changes.len(),
                            "Configuration change detected"
                        );
                        let subject = format!("Configuration change on {name}");
                        if let Err(e) =
                            self.notifier.notify(&name, &subject, &report.narrative).await
                        {
                            tracing::error!(
                                device = %name,
                                error = %e,
                                "Notification delivery failed"
                            );
                        }
                    } else {
                        tracing::debug!(round_id = %round_id, device = %name, "No change");
                    }
                }
                DeviceOutcome::BaselineEstablished { .. } => {
                    summary.baselined += 1;
                    tracing::info!(round_id = %round_id, device = %name, "Baseline established");
                }
                DeviceOutcome::Skipped { reason, .. } => {
                    summary.skipped += 1;
                    tracing::warn!(
                        round_id = %round_id,
                        device = %name,
                        reason = %reason,
                        "Device skipped this round"
                    );
                }
                DeviceOutcome::AuthFailed { detail, .. } => {
                    summary.failed += 1;
                    tracing::error!(
                        round_id = %round_id,
                        device = %name,
                        detail = %detail,
                        "Authentication failed"
                    );
                }
                DeviceOutcome::Rollback {
                    counter,
                    stored,
                    observed,
                    ..
                } => {
                    summary.failed += 1;
                    tracing::error!(
                        round_id = %round_id,
                        device = %name,
                        counter = %counter,
                        stored,
                        observed,
                        "Counter rollback: monitoring-integrity violation"
                    );
                }
            }
            outcomes.push(outcome);
        }

        if outcomes.len() != dispatched {
            tracing::error!(
                round_id = %round_id,
                expected = dispatched,
                received = outcomes.len(),
                "Round lost worker results"
            );
        }

        RoundResult {
            round_id,
            state,
            outcomes,
            summary,
        }
    }
}

/// Poll all counters for one device and classify the outcome.
///
/// Returns the outcome plus the device's new state; the state is `None`
/// whenever the round must leave the device untouched.
async fn poll_device(
    querier: &dyn DeviceQuerier,
    counters: &CounterSet,
    device: &Device,
    prior: Option<DeviceState>,
) -> (DeviceOutcome, Option<DeviceState>) {
    let now = Utc::now();

    // Fetch every counter in configured order; the first failure skips the
    // rest of this device for the round.
    let mut observed = BTreeMap::new();
    for counter in counters.counters() {
        match querier.query(device, &counter.key).await {
            Ok(value) => {
                observed.insert(counter.name.clone(), value);
            }
            Err(QueryError::AuthFailed(detail)) => {
                return (
                    DeviceOutcome::AuthFailed {
                        device: device.name.clone(),
                        detail,
                    },
                    None,
                );
            }
            Err(err) => {
                return (
                    DeviceOutcome::Skipped {
                        device: device.name.clone(),
                        reason: err.to_string(),
                    },
                    None,
                );
            }
        }
    }

    let prior = prior.filter(|p| p.has_baseline);

    // Monotonicity check before any mutation: a decrease in the reference
    // or a trackable counter aborts the device's round.
    if let Some(ref prev) = prior {
        for counter in counters.counters() {
            if !counter.trackable && counter.name != counters.reference() {
                continue;
            }
            if let (Some(&new), Some(&old)) = (
                observed.get(&counter.name),
                prev.values.get(&counter.name),
            ) {
                if new < old {
                    return (
                        DeviceOutcome::Rollback {
                            device: device.name.clone(),
                            counter: counter.name.clone(),
                            stored: old,
                            observed: new,
                        },
                        None,
                    );
                }
            }
        }
    }

    let mut changed_flags = BTreeMap::new();
    let mut changes = Vec::new();

    if let Some(ref prev) = prior {
        let new_ref = observed.get(counters.reference()).copied();
        let old_ref = prev.values.get(counters.reference()).copied();

        for counter in counters.trackable() {
            let Some(&new) = observed.get(&counter.name) else {
                continue;
            };
            match prev.values.get(&counter.name).copied() {
                Some(old) if new > old => {
                    changed_flags.insert(counter.name.clone(), true);
                    // Elapsed time is anchored on this round's reference
                    // delta; the change happened between the two polls.
                    let elapsed_ticks = match (new_ref, old_ref) {
                        (Some(n), Some(o)) => n.saturating_sub(o),
                        _ => 0,
                    };
                    changes.push(CounterChange {
                        counter: counter.name.clone(),
                        previous: old,
                        observed: new,
                        elapsed_ticks,
                        changed_at: arith::estimate_change_time(now, elapsed_ticks),
                    });
                }
                Some(_) => {
                    changed_flags.insert(counter.name.clone(), false);
                }
                None => {
                    // Counter newly added to the set: nothing to compare
                    // against, baseline it this round.
                    changed_flags.insert(counter.name.clone(), false);
                }
            }
        }
    }

    let new_state = DeviceState {
        last_poll: now,
        has_baseline: true,
        values: observed,
        changed: changed_flags,
    };

    let outcome = match prior {
        None => DeviceOutcome::BaselineEstablished {
            device: device.name.clone(),
        },
        Some(_) => {
            let changed = !changes.is_empty();
            let narrative = build_narrative(&device.name, &changes);
            DeviceOutcome::Report(RoundReport {
                device: device.name.clone(),
                changed,
                narrative,
                changes,
            })
        }
    };

    (outcome, Some(new_state))
}

/// One line per changed counter: what moved, how long ago, and the
/// estimated instant.
fn build_narrative(device: &DeviceName, changes: &[CounterChange]) -> String {
    changes
        .iter()
        .map(|c| {
            let ago = arith::format_duration(arith::ticks_to_duration(c.elapsed_ticks));
            format!(
                "{device}: {} {} -> {} (changed {ago} ago, at approximately {})",
                c.counter,
                c.previous,
                c.observed,
                c.changed_at.format("%Y-%m-%d %H:%M:%S UTC"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{RecordingNotifier, ScriptedQuerier};

    const UPTIME: &str = "sysUptime";
    const RUNNING: &str = "ccmHistoryRunningLastChanged";
    const SAVED: &str = "ccmHistoryRunningLastSaved";
    const STARTUP: &str = "ccmHistoryStartupLastChanged";

    fn device(name: &str) -> Device {
        use confwatch_core::{Credentials, Transport};
        Device {
            name: DeviceName::new(name),
            address: format!("198.51.100.{}", name.len()),
            port: 161,
            credentials: Credentials {
                security_name: "monitor".to_string(),
                auth_passphrase: "authsecret".to_string(),
                priv_passphrase: "privsecret".to_string(),
            },
            transport: Transport::V3,
        }
    }

    fn poller(querier: &Arc<ScriptedQuerier>, notifier: &Arc<RecordingNotifier>) -> Poller {
        Poller::new(
            CounterSet::cisco_default(),
            Arc::clone(querier) as Arc<dyn DeviceQuerier>,
            Arc::clone(notifier) as Arc<dyn Notifier>,
            4,
        )
    }

    fn seed_baseline(querier: &ScriptedQuerier, name: &str, uptime: u64, running: u64) {
        let set = CounterSet::cisco_default();
        let key = |n: &str| {
            set.counters()
                .iter()
                .find(|c| c.name == n)
                .unwrap()
                .key
                .clone()
        };
        querier.set(name, &key(UPTIME), Ok(uptime));
        querier.set(name, &key(RUNNING), Ok(running));
        querier.set(name, &key(SAVED), Ok(running / 2));
        querier.set(name, &key(STARTUP), Ok(running / 3));
    }

    #[tokio::test]
    async fn baseline_round_is_silent() {
        let querier = Arc::new(ScriptedQuerier::default());
        let notifier = Arc::new(RecordingNotifier::default());
        seed_baseline(&querier, "rtr1", 1000, 5);

        let poller = poller(&querier, &notifier);
        let result = poller
            .poll_round(&[device("rtr1")], &FleetState::default())
            .await;

        assert_eq!(result.summary.baselined, 1);
        assert_eq!(result.summary.changed, 0);
        assert!(matches!(
            result.outcomes[0],
            DeviceOutcome::BaselineEstablished { .. }
        ));
        let state = result.state.get(&DeviceName::new("rtr1")).unwrap();
        assert!(state.has_baseline);
        assert_eq!(state.values[UPTIME], 1000);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn scenario_a_change_reports_reference_delta() {
        let querier = Arc::new(ScriptedQuerier::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(&querier, &notifier);
        let d1 = device("rtr1");

        // Round 1: establish baseline at uptime 1000, counter 5.
        seed_baseline(&querier, "rtr1", 1000, 5);
        let round1 = poller.poll_round(&[d1.clone()], &FleetState::default()).await;

        // Round 2: uptime 1000 -> 1500, counter 5 -> 6.
        seed_baseline(&querier, "rtr1", 1500, 6);
        let round2 = poller.poll_round(&[d1], &round1.state).await;

        assert_eq!(round2.summary.changed, 1);
        let DeviceOutcome::Report(report) = &round2.outcomes[0] else {
            panic!("expected a report, got {:?}", round2.outcomes[0]);
        };
        assert!(report.changed);

        let change = report
            .changes
            .iter()
            .find(|c| c.counter == RUNNING)
            .unwrap();
        assert_eq!(change.elapsed_ticks, 500);
        assert_eq!(change.previous, 5);
        assert_eq!(change.observed, 6);

        // 500 ticks == 5 seconds ago.
        assert!(report.narrative.contains("00:00:05 ago"));

        // Exactly one notification carrying the narrative.
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_str(), "rtr1");
        assert_eq!(sent[0].2, report.narrative);
    }

    #[tokio::test]
    async fn unchanged_counters_are_not_reported() {
        let querier = Arc::new(ScriptedQuerier::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(&querier, &notifier);
        let d1 = device("rtr1");

        seed_baseline(&querier, "rtr1", 1000, 5);
        let round1 = poller.poll_round(&[d1.clone()], &FleetState::default()).await;

        // Uptime advances, trackable counters stay flat.
        let set = CounterSet::cisco_default();
        let uptime_key = &set.counters()[0].key;
        querier.set("rtr1", uptime_key, Ok(2000));
        let round2 = poller.poll_round(&[d1], &round1.state).await;

        let DeviceOutcome::Report(report) = &round2.outcomes[0] else {
            panic!("expected a report");
        };
        assert!(!report.changed);
        assert!(report.changes.is_empty());
        assert!(notifier.sent().is_empty());

        let state = round2.state.get(&DeviceName::new("rtr1")).unwrap();
        assert!(!state.changed[RUNNING]);
    }

    #[tokio::test]
    async fn idempotent_rounds_stay_baseline_consistent() {
        let querier = Arc::new(ScriptedQuerier::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(&querier, &notifier);
        let d1 = device("rtr1");

        seed_baseline(&querier, "rtr1", 1000, 5);
        let round1 = poller.poll_round(&[d1.clone()], &FleetState::default()).await;
        let round2 = poller.poll_round(&[d1], &round1.state).await;

        let s1 = round1.state.get(&DeviceName::new("rtr1")).unwrap();
        let s2 = round2.state.get(&DeviceName::new("rtr1")).unwrap();
        assert_eq!(s1.values, s2.values);
        assert_eq!(round2.summary.changed, 0);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn scenario_b_timeout_leaves_state_and_peers_untouched() {
        let querier = Arc::new(ScriptedQuerier::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(&querier, &notifier);
        let devices = [device("rtr1"), device("rtr2")];

        seed_baseline(&querier, "rtr1", 1000, 5);
        seed_baseline(&querier, "rtr2", 9000, 7);
        let round1 = poller.poll_round(&devices, &FleetState::default()).await;

        // Round 2: rtr2 times out; rtr1 changes.
        seed_baseline(&querier, "rtr1", 1500, 6);
        querier.fail_all(
            "rtr2",
            QueryError::Timeout(std::time::Duration::from_secs(10)),
        );
        let round2 = poller.poll_round(&devices, &round1.state).await;

        assert_eq!(round2.summary.skipped, 1);
        assert_eq!(round2.summary.changed, 1);

        // rtr2's state is exactly its round-1 state.
        assert_eq!(
            round2.state.get(&DeviceName::new("rtr2")),
            round1.state.get(&DeviceName::new("rtr2"))
        );
        // rtr1 was unaffected by rtr2's failure.
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_str(), "rtr1");
    }

    #[tokio::test]
    async fn scenario_c_fresh_start_baselines_every_device() {
        let querier = Arc::new(ScriptedQuerier::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(&querier, &notifier);
        let devices = [device("rtr1"), device("rtr2")];

        seed_baseline(&querier, "rtr1", 1000, 5);
        seed_baseline(&querier, "rtr2", 9000, 7);
        let result = poller.poll_round(&devices, &FleetState::default()).await;

        assert_eq!(result.summary.baselined, 2);
        assert_eq!(result.summary.changed, 0);
        for name in ["rtr1", "rtr2"] {
            assert!(result.state.get(&DeviceName::new(name)).unwrap().has_baseline);
        }
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn scenario_d_rollback_is_fatal_for_that_device_only() {
        let querier = Arc::new(ScriptedQuerier::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(&querier, &notifier);
        let devices = [device("rtr1"), device("rtr2")];

        seed_baseline(&querier, "rtr1", 1000, 5);
        seed_baseline(&querier, "rtr2", 9000, 7);
        let round1 = poller.poll_round(&devices, &FleetState::default()).await;

        // rtr1's trackable counter decreases; rtr2 is healthy and flat.
        seed_baseline(&querier, "rtr1", 1500, 3);
        seed_baseline(&querier, "rtr2", 9500, 7);
        let round2 = poller.poll_round(&devices, &round1.state).await;

        assert!(round2.has_fatal());
        let rollback = round2
            .outcomes
            .iter()
            .find(|o| matches!(o, DeviceOutcome::Rollback { .. }))
            .unwrap();
        let DeviceOutcome::Rollback {
            device: name,
            counter,
            stored,
            observed,
        } = rollback
        else {
            unreachable!();
        };
        assert_eq!(name.as_str(), "rtr1");
        assert_eq!(counter, RUNNING);
        assert_eq!((*stored, *observed), (5, 3));

        // No state mutation for rtr1; rtr2's round proceeded normally.
        assert_eq!(
            round2.state.get(&DeviceName::new("rtr1")),
            round1.state.get(&DeviceName::new("rtr1"))
        );
        let rtr2 = round2.state.get(&DeviceName::new("rtr2")).unwrap();
        assert_eq!(rtr2.values[UPTIME], 9500);
    }

    #[tokio::test]
    async fn reference_rollback_is_also_fatal() {
        let querier = Arc::new(ScriptedQuerier::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(&querier, &notifier);
        let d1 = device("rtr1");

        seed_baseline(&querier, "rtr1", 1000, 5);
        let round1 = poller.poll_round(&[d1.clone()], &FleetState::default()).await;

        // Device rebooted: uptime reset, trackable counters flat.
        seed_baseline(&querier, "rtr1", 50, 5);
        let round2 = poller.poll_round(&[d1], &round1.state).await;

        assert!(matches!(
            round2.outcomes[0],
            DeviceOutcome::Rollback { ref counter, .. } if counter == UPTIME
        ));
    }

    #[tokio::test]
    async fn auth_failure_is_classified_distinctly() {
        let querier = Arc::new(ScriptedQuerier::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(&querier, &notifier);

        querier.fail_all("rtr1", QueryError::AuthFailed("wrong digest".to_string()));
        let result = poller
            .poll_round(&[device("rtr1")], &FleetState::default())
            .await;

        assert!(result.has_fatal());
        assert!(matches!(
            result.outcomes[0],
            DeviceOutcome::AuthFailed { .. }
        ));
        assert!(result.state.is_empty());
    }

    #[tokio::test]
    async fn elapsed_duration_is_never_negative() {
        let querier = Arc::new(ScriptedQuerier::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller(&querier, &notifier);
        let d1 = device("rtr1");

        seed_baseline(&querier, "rtr1", 1000, 5);
        let round1 = poller.poll_round(&[d1.clone()], &FleetState::default()).await;

        seed_baseline(&querier, "rtr1", 1400, 8);
        let round2 = poller.poll_round(&[d1], &round1.state).await;

        let DeviceOutcome::Report(report) = &round2.outcomes[0] else {
            panic!("expected a report");
        };
        for change in &report.changes {
            assert!(arith::ticks_to_duration(change.elapsed_ticks) >= chrono::TimeDelta::zero());
            assert!(change.changed_at <= Utc::now());
        }
    }
}
