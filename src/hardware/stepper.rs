//! Coarse mechanical tuner motion.
//!
//! The stepper has its own hardware abort command: a cooperative abort
//! observed while the motor is moving issues that command before the
//! cancellation propagates, so the motor never keeps driving a cavity the
//! operator gave up on.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::control::{AbortFlag, AbortRequested, WaitError};
use crate::points::{PointAccess, PointAccessExt, PointError, PointName, StepperPoints};
use crate::types::CavityId;

/// Detune within this band counts as on-resonance (Hz).
pub const TUNE_TOLERANCE_HZ: f64 = 50.0;

/// Microsteps commanded per Hz of detune.
pub const MICROSTEPS_PER_HERTZ: f64 = 1.4;

/// Largest single move the tuner will accept (steps).
pub const MAX_STEPS_PER_MOVE: f64 = 1_000_000.0;

/// Piezo DC voltage within this band needs no re-centering (V).
pub const PIEZO_CENTER_TOLERANCE_V: f64 = 2.0;

/// Microsteps commanded per volt of piezo offset during re-centering.
pub const MICROSTEPS_PER_VOLT: f64 = 200.0;

/// Errors from tuner operations.
#[derive(Debug, Error)]
pub enum TunerError {
    /// The motor ran onto a limit switch; requires human intervention.
    #[error("stepper hit a limit switch")]
    LimitSwitch,

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error(transparent)]
    Point(#[from] PointError),

    #[error(transparent)]
    Aborted(#[from] AbortRequested),
}

impl From<WaitError> for TunerError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Aborted(a) => TunerError::Aborted(a),
            WaitError::TimedOut { what, .. } => TunerError::Timeout(what),
            WaitError::Point(e) => TunerError::Point(e),
        }
    }
}

/// One cavity's coarse mechanical tuner.
#[derive(Debug, Clone)]
pub struct StepperTuner {
    pub names: StepperPoints,
}

impl StepperTuner {
    pub fn new(id: &CavityId) -> Self {
        StepperTuner {
            names: StepperPoints::new(id),
        }
    }

    /// Commands a relative move and polls until the motor stops.
    ///
    /// The requested step count is clamped to [`MAX_STEPS_PER_MOVE`]. On
    /// abort the hardware motion-abort command is issued (best effort)
    /// before the cancellation is returned. A limit switch engaging during
    /// the move is an error.
    pub async fn move_steps<P: PointAccess>(
        &self,
        points: &P,
        abort: &AbortFlag,
        tick: Duration,
        steps: f64,
    ) -> Result<(), TunerError> {
        let steps = steps.clamp(-MAX_STEPS_PER_MOVE, MAX_STEPS_PER_MOVE);
        debug!(steps, "commanding stepper move");
        points.put_f64(&self.names.step_des, steps, true).await?;
        points.put_i64(&self.names.move_start, 1, false).await?;

        loop {
            if abort.is_requested() {
                // Stop the motor before unwinding; the put failing must not
                // mask the abort itself.
                let _ = points.put_i64(&self.names.motion_abort, 1, false).await;
                return Err(TunerError::Aborted(AbortRequested));
            }
            if points.get_i64(&self.names.limit_switch_a).await? == 1
                || points.get_i64(&self.names.limit_switch_b).await? == 1
            {
                return Err(TunerError::LimitSwitch);
            }
            if points.get_i64(&self.names.motor_moving).await? == 0 {
                return Ok(());
            }
            tokio::time::sleep(tick).await;
        }
    }

    /// Mechanically tunes the cavity to resonance without RF.
    ///
    /// Reads the detune estimate, steps proportionally against it, and
    /// repeats until the reading is within [`TUNE_TOLERANCE_HZ`]. Bounded
    /// only by the abort flag, like the hardware waits it wraps.
    pub async fn auto_tune<P: PointAccess>(
        &self,
        points: &P,
        detune: &PointName,
        abort: &AbortFlag,
        tick: Duration,
    ) -> Result<(), TunerError> {
        loop {
            abort.check()?;
            let detune_hz = points.get_f64(detune).await?;
            if detune_hz.abs() <= TUNE_TOLERANCE_HZ {
                info!(detune_hz, "cavity on resonance");
                return Ok(());
            }
            let steps = -detune_hz * MICROSTEPS_PER_HERTZ;
            debug!(detune_hz, steps, "stepping toward resonance");
            self.move_steps(points, abort, tick, steps).await?;
        }
    }

    /// Walks the mechanical tuner to bring the piezo DC voltage back toward
    /// the center of its range.
    pub async fn recenter<P: PointAccess>(
        &self,
        points: &P,
        piezo_voltage: &PointName,
        abort: &AbortFlag,
        tick: Duration,
    ) -> Result<(), TunerError> {
        let volts = points.get_f64(piezo_voltage).await?;
        if volts.abs() <= PIEZO_CENTER_TOLERANCE_V {
            return Ok(());
        }
        debug!(volts, "re-centering piezo via stepper");
        self.move_steps(points, abort, tick, -volts * MICROSTEPS_PER_VOLT)
            .await
    }
}
