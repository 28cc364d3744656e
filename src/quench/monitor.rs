//! The quench reset monitor loop.
//!
//! A single ever-running loop scans every cavity once per second:
//!
//! - offline or intentionally-off cavities are skipped
//! - an unlatched cavity just has its "currently quenched" flag cleared
//! - a latched cavity inside the 3 s per-cavity cooldown is skipped
//!   (log only), so reset storms cannot form and a waveform that is still
//!   mutating is not re-validated
//! - otherwise the waveforms settle for 100 ms, the validator runs, and the
//!   interlock is reset only for a spurious trip
//!
//! Per-cavity errors (disconnected point, stale hardware state) are caught
//! individually and counted; they never abort a scan cycle. After each scan
//! the monitor increments a heartbeat point so external watchdogs can spot
//! a stall; the monitor stops itself once the heartbeat fails more than a
//! configured number of consecutive times.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::validator::{QuenchClassification, QuenchEvent};
use crate::cavity::Cavity;
use crate::config::MonitorConfig;
use crate::hierarchy::Machine;
use crate::points::{names, PointAccess, PointAccessExt, PointError, PointName};

/// Per-cavity counters kept by the monitor. Created lazily on the first
/// observation of a cavity; live for the monitor process only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CavityResetStats {
    /// Interlock resets issued for spurious trips.
    pub total_resets: u64,

    /// Quenches validated as real (left latched).
    pub real_quenches: u64,

    /// Per-cavity scan errors swallowed without stopping the monitor.
    pub scan_errors: u64,

    /// Whether the cavity was latched at the last scan.
    pub currently_quenched: bool,

    /// Wall-clock time of the last reset-or-record action.
    pub last_action_at: Option<DateTime<Utc>>,

    /// Monotonic instant of the last action, for the cooldown window.
    #[serde(skip)]
    last_action: Option<Instant>,
}

/// Why the monitor stopped.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("heartbeat failed {failures} consecutive times")]
    HeartbeatStalled { failures: u32 },
}

/// One cavity's stats, paired with its identity for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReportEntry {
    pub cavity: crate::types::CavityId,
    pub stats: CavityResetStats,
}

/// Snapshot of the monitor's counters across the machine.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub cavities: Vec<MonitorReportEntry>,
}

/// The continuous quench reset policy.
pub struct QuenchMonitor {
    config: MonitorConfig,
    stats: HashMap<crate::types::CavityId, CavityResetStats>,
    heartbeat: PointName,
    heartbeat_count: i64,
    heartbeat_failures: u32,
}

impl QuenchMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        QuenchMonitor {
            config,
            stats: HashMap::new(),
            heartbeat: names::quench_monitor_heartbeat(),
            heartbeat_count: 0,
            heartbeat_failures: 0,
        }
    }

    pub fn stats(&self, cavity: &crate::types::CavityId) -> Option<&CavityResetStats> {
        self.stats.get(cavity)
    }

    pub fn report(&self) -> MonitorReport {
        let mut cavities: Vec<MonitorReportEntry> = self
            .stats
            .iter()
            .map(|(cavity, stats)| MonitorReportEntry {
                cavity: cavity.clone(),
                stats: stats.clone(),
            })
            .collect();
        cavities.sort_by(|a, b| {
            (&a.cavity.linac.0, &a.cavity.cryomodule.0, a.cavity.cavity)
                .cmp(&(&b.cavity.linac.0, &b.cavity.cryomodule.0, b.cavity.cavity))
        });
        MonitorReport { cavities }
    }

    /// Scans at the configured cadence until `shutdown` is cancelled or the
    /// heartbeat stalls.
    #[instrument(skip_all)]
    pub async fn run<P: PointAccess>(
        &mut self,
        points: &P,
        machine: &Machine,
        shutdown: CancellationToken,
    ) -> Result<(), MonitorError> {
        info!(cavities = machine.cavities().count(), "quench monitor started");
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("quench monitor shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {
                    self.scan_once(points, machine).await?;
                }
            }
        }
    }

    /// One pass over every cavity, then the heartbeat update.
    pub async fn scan_once<P: PointAccess>(
        &mut self,
        points: &P,
        machine: &Machine,
    ) -> Result<(), MonitorError> {
        for cavity in machine.cavities() {
            if let Err(err) = self.check_cavity(points, cavity).await {
                let stats = self.stats.entry(cavity.id().clone()).or_default();
                stats.scan_errors += 1;
                warn!(cavity = %cavity.id(), error = %err, "quench scan error");
            }
        }
        self.beat_heartbeat(points).await
    }

    async fn check_cavity<P: PointAccess>(
        &mut self,
        points: &P,
        cavity: &Cavity,
    ) -> Result<(), PointError> {
        let id = cavity.id();
        if !cavity.is_online(points).await? || !cavity.is_rf_on(points).await? {
            return Ok(());
        }

        if !cavity.is_quenched(points).await? {
            if let Some(stats) = self.stats.get_mut(id) {
                stats.currently_quenched = false;
            }
            return Ok(());
        }

        let in_cooldown = self
            .stats
            .get(id)
            .and_then(|s| s.last_action)
            .is_some_and(|last| last.elapsed() < self.config.reset_cooldown);
        self.stats.entry(id.clone()).or_default().currently_quenched = true;
        if in_cooldown {
            debug!(cavity = %id, "quench within cooldown window; skipping");
            return Ok(());
        }

        // The capture may still be filling right after the trip.
        tokio::time::sleep(self.config.waveform_settle).await;
        let event = capture_quench_event(points, cavity).await?;
        let verdict = event.validate();

        let reset = verdict.classification == QuenchClassification::Spurious;
        if reset {
            info!(
                cavity = %id,
                loaded_q = ?verdict.computed_loaded_q,
                "spurious quench; resetting interlock"
            );
            points
                .put_i64(&cavity.names().interlock_reset, 1, false)
                .await?;
        } else {
            warn!(
                cavity = %id,
                loaded_q = ?verdict.computed_loaded_q,
                "real quench; leaving interlock latched"
            );
        }

        let stats = self.stats.entry(id.clone()).or_default();
        stats.last_action = Some(Instant::now());
        stats.last_action_at = Some(Utc::now());
        if reset {
            stats.total_resets += 1;
        } else {
            stats.real_quenches += 1;
        }
        Ok(())
    }

    async fn beat_heartbeat<P: PointAccess>(&mut self, points: &P) -> Result<(), MonitorError> {
        self.heartbeat_count += 1;
        match points
            .put_i64(&self.heartbeat, self.heartbeat_count, false)
            .await
        {
            Ok(()) => {
                self.heartbeat_failures = 0;
                Ok(())
            }
            Err(err) => {
                self.heartbeat_failures += 1;
                warn!(
                    failures = self.heartbeat_failures,
                    error = %err,
                    "failed to update quench monitor heartbeat"
                );
                if self.heartbeat_failures > self.config.max_heartbeat_failures {
                    error!("heartbeat stalled; stopping monitor");
                    Err(MonitorError::HeartbeatStalled {
                        failures: self.heartbeat_failures,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Reads one cavity's fault waveforms and reference values into an event.
pub async fn capture_quench_event<P: PointAccess>(
    points: &P,
    cavity: &Cavity,
) -> Result<QuenchEvent, PointError> {
    let time = points
        .get_f64_array(&cavity.names().fault_time_waveform)
        .await?;
    let amplitude = points
        .get_f64_array(&cavity.names().fault_amplitude_waveform)
        .await?;
    let prior_loaded_q = points.get_f64(&cavity.names().loaded_q).await?;
    Ok(QuenchEvent {
        time,
        amplitude,
        prior_loaded_q,
        rf_frequency_hz: cavity.rf_frequency_hz(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::MemoryPoints;
    use crate::sim::seed_nominal_cavity;
    use crate::test_utils::synthetic_decay;
    use crate::types::CavityId;

    fn machine() -> Machine {
        Machine::with_layout(&[("L0B", &["01"])])
    }

    /// Seeds the whole (one-cryomodule) machine online with RF on and no
    /// latch, then returns the first cavity's id.
    fn scanning_points(machine: &Machine) -> (MemoryPoints, CavityId) {
        let points = MemoryPoints::new();
        for cavity in machine.cavities() {
            seed_nominal_cavity(&points, cavity);
            points.set(cavity.names().rf_state_act.clone(), 1i64);
        }
        let first = machine.cavities().next().unwrap().id().clone();
        (points, first)
    }

    /// Latches the given cavity with waveforms whose fitted Q matches
    /// `loaded_q` against a prior of 4e7.
    fn latch_with_decay(points: &MemoryPoints, machine: &Machine, id: &CavityId, loaded_q: f64) {
        let cavity = machine
            .cavities()
            .find(|c| c.id() == id)
            .expect("cavity exists");
        let (time, amplitude) = synthetic_decay(loaded_q, cavity.rf_frequency_hz(), 16.6);
        points.set(cavity.names().quench_latch.clone(), 1i64);
        points.set(cavity.names().fault_time_waveform.clone(), time);
        points.set(cavity.names().fault_amplitude_waveform.clone(), amplitude);
        points.set(cavity.names().loaded_q.clone(), 4e7);
    }

    #[tokio::test(start_paused = true)]
    async fn spurious_quench_is_reset_once_within_cooldown() {
        let machine = machine();
        let (points, id) = scanning_points(&machine);
        latch_with_decay(&points, &machine, &id, 3.9e7);
        // The nominal reset reaction would clear the latch; re-latch so the
        // second scan still sees a quenched cavity.
        let cavity = machine.cavities().next().unwrap();
        points.react(
            cavity.names().interlock_reset.clone(),
            cavity.names().quench_latch.clone(),
            crate::points::ReactionValue::Set(crate::points::PointValue::Int(1)),
        );

        let mut monitor = QuenchMonitor::new(MonitorConfig::new());
        monitor.scan_once(&points, &machine).await.unwrap();
        monitor.scan_once(&points, &machine).await.unwrap();

        assert_eq!(
            points.puts_to(&cavity.names().interlock_reset).len(),
            1,
            "cooldown suppresses the second reset"
        );
        let stats = monitor.stats(&id).unwrap();
        assert_eq!(stats.total_resets, 1);
        assert_eq!(stats.real_quenches, 0);
        assert!(stats.currently_quenched);
        assert!(stats.last_action_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn real_quench_is_never_reset() {
        let machine = machine();
        let (points, id) = scanning_points(&machine);
        latch_with_decay(&points, &machine, &id, 1e7);

        let mut monitor = QuenchMonitor::new(MonitorConfig::new());
        monitor.scan_once(&points, &machine).await.unwrap();

        let cavity = machine.cavities().next().unwrap();
        assert!(points.puts_to(&cavity.names().interlock_reset).is_empty());
        let stats = monitor.stats(&id).unwrap();
        assert_eq!(stats.real_quenches, 1);
        assert_eq!(stats.total_resets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unlatched_cavities_clear_the_quenched_flag() {
        let machine = machine();
        let (points, id) = scanning_points(&machine);
        latch_with_decay(&points, &machine, &id, 1e7);

        let mut monitor = QuenchMonitor::new(MonitorConfig::new());
        monitor.scan_once(&points, &machine).await.unwrap();
        assert!(monitor.stats(&id).unwrap().currently_quenched);

        let cavity = machine.cavities().next().unwrap();
        points.set(cavity.names().quench_latch.clone(), 0i64);
        monitor.scan_once(&points, &machine).await.unwrap();
        assert!(!monitor.stats(&id).unwrap().currently_quenched);
    }

    #[tokio::test(start_paused = true)]
    async fn per_cavity_errors_do_not_stop_the_scan() {
        let machine = machine();
        let (points, id) = scanning_points(&machine);
        // Cavity 1's mode read fails; the rest of the scan must continue
        // and still act on cavity 2's spurious quench.
        let broken = machine.cavities().next().unwrap();
        points.fail_get(
            broken.names().hw_mode.clone(),
            PointError::Disconnected {
                name: broken.names().hw_mode.to_string(),
            },
        );
        let second_id = machine.cavities().nth(1).unwrap().id().clone();
        latch_with_decay(&points, &machine, &second_id, 3.9e7);

        let mut monitor = QuenchMonitor::new(MonitorConfig::new());
        monitor.scan_once(&points, &machine).await.unwrap();

        assert_eq!(monitor.stats(&id).unwrap().scan_errors, 1);
        assert_eq!(monitor.stats(&second_id).unwrap().total_resets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_cavities_are_skipped() {
        let machine = machine();
        let (points, id) = scanning_points(&machine);
        latch_with_decay(&points, &machine, &id, 1e7);
        let cavity = machine.cavities().next().unwrap();
        points.set(cavity.names().hw_mode.clone(), 2i64);

        let mut monitor = QuenchMonitor::new(MonitorConfig::new());
        monitor.scan_once(&points, &machine).await.unwrap();

        assert!(monitor.stats(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_stall_stops_the_monitor() {
        let machine = Machine::with_layout(&[]);
        let points = MemoryPoints::new();
        points.fail_put(
            names::quench_monitor_heartbeat(),
            PointError::Disconnected {
                name: "heartbeat".to_string(),
            },
        );

        let mut monitor = QuenchMonitor::new(MonitorConfig::new());
        for _ in 0..10 {
            monitor.scan_once(&points, &machine).await.unwrap();
        }
        let result = monitor.scan_once(&points, &machine).await;
        assert!(matches!(
            result,
            Err(MonitorError::HeartbeatStalled { failures: 11 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_increments_every_scan() {
        let machine = Machine::with_layout(&[]);
        let points = MemoryPoints::new();
        let mut monitor = QuenchMonitor::new(MonitorConfig::new());
        monitor.scan_once(&points, &machine).await.unwrap();
        monitor.scan_once(&points, &machine).await.unwrap();
        assert_eq!(
            points.puts_to(&names::quench_monitor_heartbeat()),
            vec![
                crate::points::PointValue::Int(1),
                crate::points::PointValue::Int(2)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancellation() {
        let machine = Machine::with_layout(&[]);
        let points = MemoryPoints::new();
        let mut monitor = QuenchMonitor::new(MonitorConfig::new());
        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();

        let run = monitor.run(&points, &machine, shutdown);
        let cancel = async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            canceller.cancel();
        };
        let (result, ()) = tokio::join!(run, cancel);
        assert!(result.is_ok());
        // Roughly one heartbeat per second while it ran.
        assert!(points.puts_to(&names::quench_monitor_heartbeat()).len() >= 4);
    }
}
