//! The bring-up/shutdown state machine for one cavity.
//!
//! `setup` executes, in fixed order: RF off, SSA on, interlock reset, then
//! the four request-flag-gated steps (SSA calibration → auto-tune →
//! characterization → RF ramp). The order never changes even when an
//! earlier step's flag is clear. Each gated step opens with an abort check,
//! and every wait inside a step polls the abort flag once per tick.
//!
//! `setup` and `shut_down` are the single places an error becomes
//! `status = Error` plus a message; they never propagate the error to the
//! caller, which inspects the status instead.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::{Cavity, HardwareMode, RF_STATE_OFF, RF_STATE_ON};
use crate::config::SetupConfig;
use crate::control::{wait_for, AbortRequested, WaitError};
use crate::hardware::{PiezoError, SsaError, TunerError};
use crate::points::{PointAccess, PointAccessExt, PointError};
use crate::types::CavityStatus;

/// Bound on an RF state change.
const RF_STATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on one characterization run.
const CHAR_TIMEOUT: Duration = Duration::from_secs(600);

/// Characterization sequencer status values.
const CHAR_STATUS_COMPLETE: i64 = 2;
const CHAR_STATUS_ERROR: i64 = 3;

/// Errors that can end a setup or shutdown run.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The cavity is not online; nothing was commanded.
    #[error("cavity is not online (hardware mode {mode:?})")]
    NotOnline { mode: HardwareMode },

    /// The configured target amplitude is unusable; checked before any
    /// hardware command of the ramp.
    #[error("configured target amplitude must be positive, got {acon} MV")]
    InvalidTargetAmplitude { acon: f64 },

    /// Interlocks did not clear after a reset command.
    #[error("interlocks still latched after reset")]
    InterlocksLatched,

    /// The quench interlock latched while walking the amplitude up.
    #[error("cavity quenched during amplitude walk at {amplitude:.2} MV")]
    QuenchedDuringRamp { amplitude: f64 },

    #[error("characterization failed: {0}")]
    CharacterizationFailed(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error(transparent)]
    Ssa(#[from] SsaError),

    #[error(transparent)]
    Tuner(#[from] TunerError),

    #[error(transparent)]
    Piezo(#[from] PiezoError),

    #[error(transparent)]
    Point(#[from] PointError),

    #[error(transparent)]
    Aborted(#[from] AbortRequested),
}

impl SetupError {
    /// Whether this error is the cooperative abort unwinding, possibly
    /// wrapped by the hardware layer it interrupted.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            SetupError::Aborted(_)
                | SetupError::Ssa(SsaError::Aborted(_))
                | SetupError::Tuner(TunerError::Aborted(_))
                | SetupError::Piezo(PiezoError::Aborted(_))
        )
    }
}

impl From<WaitError> for SetupError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Aborted(a) => SetupError::Aborted(a),
            WaitError::TimedOut { what, .. } => SetupError::Timeout(what),
            WaitError::Point(e) => SetupError::Point(e),
        }
    }
}

impl Cavity {
    /// Runs the full bring-up sequence.
    ///
    /// Never returns an error: the outcome is reflected in
    /// [`status`](Cavity::status), [`progress`](Cavity::progress), and
    /// [`status_message`](Cavity::status_message). Refuses to start when a
    /// run is already in progress (no state change, no hardware commands).
    #[instrument(skip_all, fields(cavity = %self.id))]
    pub async fn setup<P: PointAccess>(&mut self, points: &P, config: &SetupConfig) {
        if self.status.is_running() {
            warn!("setup already running; ignoring request");
            self.status_message = "setup already running; ignoring request".to_string();
            return;
        }

        self.abort.clear();
        self.set_status(CavityStatus::Running, "setup started");
        self.progress = 0;
        info!(flags = ?self.flags, "starting cavity setup");

        match self.run_setup(points, config).await {
            Ok(()) => {
                self.advance_progress(100);
                self.set_status(CavityStatus::Ready, "setup complete");
                info!("cavity setup complete");
            }
            Err(err) => {
                self.abort.clear();
                if err.is_abort() {
                    info!("setup aborted by operator");
                } else {
                    error!(error = %err, "setup failed");
                }
                self.set_status(CavityStatus::Error, err.to_string());
            }
        }
    }

    async fn run_setup<P: PointAccess>(
        &mut self,
        points: &P,
        config: &SetupConfig,
    ) -> Result<(), SetupError> {
        let mode = self.hardware_mode(points).await?;
        if !mode.is_online() {
            return Err(SetupError::NotOnline { mode });
        }

        // A stale "on" request would fight the interlock reset below.
        self.turn_rf_off(points, config).await?;
        self.ssa
            .turn_on(points, &self.abort, config.poll_tick)
            .await?;
        self.advance_progress(10);
        self.reset_interlocks(points, config).await?;
        self.advance_progress(15);

        let flags = self.flags;
        if flags.ssa_cal {
            self.abort.check()?;
            self.run_ssa_calibration(points, config).await?;
            self.advance_progress(25);
        }
        if flags.auto_tune {
            self.abort.check()?;
            info!("auto-tuning to resonance");
            self.tuner
                .auto_tune(points, &self.names.detune, &self.abort, config.poll_tick)
                .await?;
            self.advance_progress(50);
        }
        if flags.cav_char {
            self.abort.check()?;
            self.characterize(points, config).await?;
            self.advance_progress(70);
            points.put_i64(&self.names.probe_q_start, 1, false).await?;
            self.advance_progress(75);
        }
        if flags.rf_ramp {
            self.abort.check()?;
            self.ramp_to_operating_amplitude(points, config).await?;
        }
        Ok(())
    }

    /// Turns RF off and powers the SSA down.
    ///
    /// Like [`setup`](Cavity::setup), never returns an error; the caller
    /// inspects the status. Refuses while a run is in progress.
    #[instrument(skip_all, fields(cavity = %self.id))]
    pub async fn shut_down<P: PointAccess>(&mut self, points: &P, config: &SetupConfig) {
        if self.status.is_running() {
            warn!("script already running; ignoring shutdown request");
            self.status_message = "script already running; ignoring shutdown request".to_string();
            return;
        }

        self.abort.clear();
        self.set_status(CavityStatus::Running, "shutdown started");
        self.progress = 0;
        info!("starting cavity shutdown");

        match self.run_shutdown(points, config).await {
            Ok(()) => {
                self.advance_progress(100);
                self.set_status(CavityStatus::Ready, "shutdown complete");
                info!("cavity shutdown complete");
            }
            Err(err) => {
                self.abort.clear();
                if err.is_abort() {
                    info!("shutdown aborted by operator");
                } else {
                    error!(error = %err, "shutdown failed");
                }
                self.set_status(CavityStatus::Error, err.to_string());
            }
        }
    }

    async fn run_shutdown<P: PointAccess>(
        &mut self,
        points: &P,
        config: &SetupConfig,
    ) -> Result<(), SetupError> {
        self.turn_rf_off(points, config).await?;
        self.advance_progress(50);
        self.ssa
            .turn_off(points, &self.abort, config.poll_tick)
            .await?;
        Ok(())
    }

    pub(crate) async fn turn_rf_off<P: PointAccess>(
        &self,
        points: &P,
        config: &SetupConfig,
    ) -> Result<(), SetupError> {
        points
            .put_i64(&self.names.rf_state_des, RF_STATE_OFF, true)
            .await?;
        let rf_state_act = &self.names.rf_state_act;
        wait_for(
            &self.abort,
            config.poll_tick,
            Some(RF_STATE_TIMEOUT),
            "RF to turn off",
            move || async move { Ok(points.get_i64(rf_state_act).await? == RF_STATE_OFF) },
        )
        .await?;
        Ok(())
    }

    pub(crate) async fn turn_rf_on<P: PointAccess>(
        &self,
        points: &P,
        config: &SetupConfig,
    ) -> Result<(), SetupError> {
        points
            .put_i64(&self.names.rf_state_des, RF_STATE_ON, true)
            .await?;
        let rf_state_act = &self.names.rf_state_act;
        wait_for(
            &self.abort,
            config.poll_tick,
            Some(RF_STATE_TIMEOUT),
            "RF to turn on",
            move || async move { Ok(points.get_i64(rf_state_act).await? == RF_STATE_ON) },
        )
        .await?;
        Ok(())
    }

    async fn reset_interlocks<P: PointAccess>(
        &self,
        points: &P,
        config: &SetupConfig,
    ) -> Result<(), SetupError> {
        debug!("resetting interlocks");
        points
            .put_i64(&self.names.interlock_reset, 1, false)
            .await?;
        let quench_latch = &self.names.quench_latch;
        let result = wait_for(
            &self.abort,
            config.poll_tick,
            Some(config.interlock_reset_timeout),
            "interlock latches to clear",
            move || async move { Ok(points.get_i64(quench_latch).await? == 0) },
        )
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(WaitError::TimedOut { .. }) => Err(SetupError::InterlocksLatched),
            Err(err) => Err(err.into()),
        }
    }

    async fn run_ssa_calibration<P: PointAccess>(
        &self,
        points: &P,
        config: &SetupConfig,
    ) -> Result<(), SetupError> {
        info!("running SSA calibration");
        self.turn_rf_off(points, config).await?;
        // The scan sweeps the drive range itself; both downstream amplitude
        // setpoints start from zero.
        points.put_f64(&self.names.ades, 0.0, true).await?;
        points.put_f64(&self.names.sel_aset, 0.0, true).await?;
        let drive_max = self.ssa.saved_drive_max(points).await?;
        self.ssa
            .calibrate(points, &self.abort, config.poll_tick, drive_max)
            .await?;
        Ok(())
    }

    async fn characterize<P: PointAccess>(
        &self,
        points: &P,
        config: &SetupConfig,
    ) -> Result<(), SetupError> {
        info!("running cavity characterization");
        points.put_i64(&self.names.char_start, 1, true).await?;
        let char_status = &self.names.char_status;
        wait_for(
            &self.abort,
            config.poll_tick,
            Some(CHAR_TIMEOUT),
            "characterization to complete",
            move || async move {
                let status = points.get_i64(char_status).await?;
                Ok(status == CHAR_STATUS_COMPLETE || status == CHAR_STATUS_ERROR)
            },
        )
        .await?;
        if points.get_i64(&self.names.char_status).await? == CHAR_STATUS_ERROR {
            return Err(SetupError::CharacterizationFailed(
                "characterization sequencer reported an error".to_string(),
            ));
        }
        Ok(())
    }
}
