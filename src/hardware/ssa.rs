//! Solid-state amplifier control and calibration.
//!
//! Calibration runs the amplifier through its drive range and measures a
//! slope and the maximum forward power. Either falling outside tolerance
//! fails the attempt; tolerance failures are retried with the drive maximum
//! lowered by a fixed decrement each time:
//!
//! - initial attempt at the saved drive maximum `m`
//! - up to 3 retries at `m - 0.01`, `m - 0.02`, `m - 0.03`
//! - a fourth tolerance failure is fatal for the run
//!
//! Faults from the calibration sequencer itself are fatal immediately; only
//! tolerance failures are worth retrying at reduced drive.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::control::{wait_for, AbortFlag, AbortRequested, WaitError};
use crate::points::{PointAccess, PointAccessExt, PointError, SsaPoints};
use crate::types::CavityId;

/// Drive maximum reduction applied on each calibration retry.
pub const CAL_DRIVE_DECREMENT: f64 = 0.01;

/// Tolerance failures are retried this many times before becoming fatal.
pub const CAL_MAX_RETRIES: u32 = 3;

/// Acceptable band for the measured amplifier slope.
pub const CAL_SLOPE_LOWER_LIMIT: f64 = 0.5;
pub const CAL_SLOPE_UPPER_LIMIT: f64 = 1.8;

/// Calibration must reach at least this much forward power (W).
pub const CAL_FWD_POWER_LOWER_LIMIT_W: f64 = 3_000.0;

/// Bound on a power state change.
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on one calibration scan.
const CAL_TIMEOUT: Duration = Duration::from_secs(600);

/// Calibration sequencer status values.
const CAL_STATUS_COMPLETE: i64 = 1;
const CAL_STATUS_CRASHED: i64 = 3;

/// Powered states reported by the SSA status point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsaStatus {
    Faulted,
    Off,
    On,
    Resetting,
    Unknown(i64),
}

impl SsaStatus {
    pub fn from_point(value: i64) -> Self {
        match value {
            1 => SsaStatus::Faulted,
            2 => SsaStatus::Off,
            3 => SsaStatus::On,
            4 => SsaStatus::Resetting,
            other => SsaStatus::Unknown(other),
        }
    }

    fn point_value(self) -> i64 {
        match self {
            SsaStatus::Faulted => 1,
            SsaStatus::Off => 2,
            SsaStatus::On => 3,
            SsaStatus::Resetting => 4,
            SsaStatus::Unknown(v) => v,
        }
    }
}

/// Errors from SSA operations.
#[derive(Debug, Error)]
pub enum SsaError {
    /// Slope or forward power out of range; retried with reduced drive.
    #[error("SSA calibration out of tolerance: {0}")]
    CalibrationTolerance(String),

    /// The calibration sequencer itself failed; not retried.
    #[error("SSA calibration failed: {0}")]
    CalibrationFailed(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error(transparent)]
    Point(#[from] PointError),

    #[error(transparent)]
    Aborted(#[from] AbortRequested),
}

impl From<WaitError> for SsaError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Aborted(a) => SsaError::Aborted(a),
            WaitError::TimedOut { what, .. } => SsaError::Timeout(what),
            WaitError::Point(e) => SsaError::Point(e),
        }
    }
}

/// One cavity's solid-state amplifier.
#[derive(Debug, Clone)]
pub struct Ssa {
    pub names: SsaPoints,
}

impl Ssa {
    pub fn new(id: &CavityId) -> Self {
        Ssa {
            names: SsaPoints::new(id),
        }
    }

    pub async fn status<P: PointAccess>(&self, points: &P) -> Result<SsaStatus, PointError> {
        Ok(SsaStatus::from_point(
            points.get_i64(&self.names.status).await?,
        ))
    }

    /// Powers the SSA on, skipping the command when it already is.
    pub async fn turn_on<P: PointAccess>(
        &self,
        points: &P,
        abort: &AbortFlag,
        tick: Duration,
    ) -> Result<(), SsaError> {
        if self.status(points).await? == SsaStatus::On {
            debug!("SSA already on");
            return Ok(());
        }
        info!("turning SSA on");
        points.put_i64(&self.names.power_on, 1, true).await?;
        self.wait_for_status(points, abort, tick, SsaStatus::On, "SSA to report on")
            .await
    }

    /// Powers the SSA off, skipping the command when it already is.
    pub async fn turn_off<P: PointAccess>(
        &self,
        points: &P,
        abort: &AbortFlag,
        tick: Duration,
    ) -> Result<(), SsaError> {
        if self.status(points).await? == SsaStatus::Off {
            debug!("SSA already off");
            return Ok(());
        }
        info!("turning SSA off");
        points.put_i64(&self.names.power_off, 1, true).await?;
        self.wait_for_status(points, abort, tick, SsaStatus::Off, "SSA to report off")
            .await
    }

    async fn wait_for_status<P: PointAccess>(
        &self,
        points: &P,
        abort: &AbortFlag,
        tick: Duration,
        wanted: SsaStatus,
        what: &str,
    ) -> Result<(), SsaError> {
        let target = wanted.point_value();
        let status = &self.names.status;
        wait_for(abort, tick, Some(STATUS_TIMEOUT), what, move || async move {
            Ok(points.get_i64(status).await? == target)
        })
        .await?;
        Ok(())
    }

    /// The stored drive maximum from the last good calibration.
    pub async fn saved_drive_max<P: PointAccess>(&self, points: &P) -> Result<f64, PointError> {
        points.get_f64(&self.names.saved_drive_max).await
    }

    /// Calibrates the amplifier, retrying tolerance failures at reduced
    /// drive per the policy in the module docs.
    pub async fn calibrate<P: PointAccess>(
        &self,
        points: &P,
        abort: &AbortFlag,
        tick: Duration,
        drive_max: f64,
    ) -> Result<(), SsaError> {
        let mut drive = drive_max;
        let mut attempt = 0u32;
        loop {
            match self.run_calibration_scan(points, abort, tick, drive).await {
                Ok(()) => return Ok(()),
                Err(SsaError::CalibrationTolerance(reason)) if attempt < CAL_MAX_RETRIES => {
                    attempt += 1;
                    drive -= CAL_DRIVE_DECREMENT;
                    warn!(
                        attempt,
                        drive, "calibration out of tolerance ({reason}); retrying at lower drive"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One calibration scan at `drive_max`, with tolerance checks on the
    /// measured slope and forward power. Stores the slope on success.
    async fn run_calibration_scan<P: PointAccess>(
        &self,
        points: &P,
        abort: &AbortFlag,
        tick: Duration,
        drive_max: f64,
    ) -> Result<(), SsaError> {
        debug!(drive_max, "starting SSA calibration scan");
        points.put_f64(&self.names.drive_max, drive_max, true).await?;
        points.put_i64(&self.names.cal_start, 1, true).await?;
        let cal_status = &self.names.cal_status;
        wait_for(
            abort,
            tick,
            Some(CAL_TIMEOUT),
            "SSA calibration to complete",
            move || async move {
                let status = points.get_i64(cal_status).await?;
                Ok(status == CAL_STATUS_COMPLETE || status == CAL_STATUS_CRASHED)
            },
        )
        .await?;

        if points.get_i64(&self.names.cal_status).await? == CAL_STATUS_CRASHED {
            return Err(SsaError::CalibrationFailed(
                "calibration sequencer reported a fault".to_string(),
            ));
        }

        let fwd_power = points.get_f64(&self.names.fwd_power).await?;
        if fwd_power < CAL_FWD_POWER_LOWER_LIMIT_W {
            return Err(SsaError::CalibrationTolerance(format!(
                "maximum forward power {fwd_power:.0} W below {CAL_FWD_POWER_LOWER_LIMIT_W:.0} W"
            )));
        }

        let slope = points.get_f64(&self.names.slope).await?;
        if !(CAL_SLOPE_LOWER_LIMIT..=CAL_SLOPE_UPPER_LIMIT).contains(&slope) {
            return Err(SsaError::CalibrationTolerance(format!(
                "slope {slope:.3} outside [{CAL_SLOPE_LOWER_LIMIT}, {CAL_SLOPE_UPPER_LIMIT}]"
            )));
        }

        points.put_f64(&self.names.saved_slope, slope, true).await?;
        info!(slope, fwd_power, "SSA calibration complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::{MemoryPoints, PointValue, ReactionValue};
    use crate::types::{CavityNumber, CryomoduleName, LinacName};

    const TICK: Duration = Duration::from_millis(500);

    fn ssa() -> Ssa {
        Ssa::new(&CavityId::new(
            LinacName::new("L0B"),
            CryomoduleName::new("01"),
            CavityNumber(1),
        ))
    }

    /// Seeds the SSA points so a calibration scan completes with the given
    /// measured slope and forward power.
    fn cal_points(ssa: &Ssa, slope: f64, fwd_power: f64) -> MemoryPoints {
        let points = MemoryPoints::new();
        points.set(ssa.names.status.clone(), 2i64);
        points.set(ssa.names.cal_status.clone(), 0i64);
        points.react(
            ssa.names.cal_start.clone(),
            ssa.names.cal_status.clone(),
            ReactionValue::Set(PointValue::Int(CAL_STATUS_COMPLETE)),
        );
        points.set(ssa.names.slope.clone(), slope);
        points.set(ssa.names.fwd_power.clone(), fwd_power);
        points
    }

    #[tokio::test(start_paused = true)]
    async fn turn_on_skips_when_already_on() {
        let ssa = ssa();
        let points = MemoryPoints::new();
        points.set(ssa.names.status.clone(), 3i64);
        ssa.turn_on(&points, &AbortFlag::new(), TICK).await.unwrap();
        assert!(points.puts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn turn_on_commands_and_waits() {
        let ssa = ssa();
        let points = MemoryPoints::new();
        points.set(ssa.names.status.clone(), 2i64);
        points.react(
            ssa.names.power_on.clone(),
            ssa.names.status.clone(),
            ReactionValue::Set(PointValue::Int(3)),
        );
        ssa.turn_on(&points, &AbortFlag::new(), TICK).await.unwrap();
        assert_eq!(
            points.puts_to(&ssa.names.power_on),
            vec![PointValue::Int(1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn calibrate_saves_slope_on_success() {
        let ssa = ssa();
        let points = cal_points(&ssa, 0.95, 4_000.0);
        ssa.calibrate(&points, &AbortFlag::new(), TICK, 0.8)
            .await
            .unwrap();
        assert_eq!(
            points.puts_to(&ssa.names.saved_slope),
            vec![PointValue::Float(0.95)]
        );
        assert_eq!(
            points.puts_to(&ssa.names.drive_max),
            vec![PointValue::Float(0.8)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tolerance_failures_retry_with_lowered_drive() {
        let ssa = ssa();
        // Slope out of range on every attempt.
        let points = cal_points(&ssa, 0.1, 4_000.0);
        let result = ssa.calibrate(&points, &AbortFlag::new(), TICK, 0.8).await;
        assert!(matches!(result, Err(SsaError::CalibrationTolerance(_))));

        let drives: Vec<f64> = points
            .puts_to(&ssa.names.drive_max)
            .into_iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        assert_eq!(drives.len(), 4);
        assert!((drives[0] - 0.8).abs() < 1e-9);
        assert!((drives[1] - 0.79).abs() < 1e-9);
        assert!((drives[2] - 0.78).abs() < 1e-9);
        assert!((drives[3] - 0.77).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn low_forward_power_is_a_tolerance_failure() {
        let ssa = ssa();
        let points = cal_points(&ssa, 0.95, 100.0);
        let result = ssa.calibrate(&points, &AbortFlag::new(), TICK, 0.8).await;
        assert!(matches!(result, Err(SsaError::CalibrationTolerance(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn sequencer_crash_is_fatal_without_retry() {
        let ssa = ssa();
        let points = MemoryPoints::new();
        points.set(ssa.names.cal_status.clone(), 0i64);
        points.react(
            ssa.names.cal_start.clone(),
            ssa.names.cal_status.clone(),
            ReactionValue::Set(PointValue::Int(CAL_STATUS_CRASHED)),
        );
        let result = ssa.calibrate(&points, &AbortFlag::new(), TICK, 0.8).await;
        assert!(matches!(result, Err(SsaError::CalibrationFailed(_))));
        // A single attempt: crashes are not retried.
        assert_eq!(points.puts_to(&ssa.names.drive_max).len(), 1);
    }
}
