//! Amplitude ramp to the operating gradient.
//!
//! The ramp never jumps the amplitude in one move: RF comes on at a low
//! setpoint, the cavity switches into SEL feedback, and the amplitude walks
//! up in bounded increments with an abort check and a quench-latch check at
//! every step. Once at the target the tuner is re-centered and the cavity
//! is handed to the full SELAP operating mode.

use tracing::{debug, info, instrument};

use super::{Cavity, RF_MODE_SEL, RF_MODE_SELAP, RF_MODE_SEL_RAW};
use crate::cavity::setup::SetupError;
use crate::config::SetupConfig;
use crate::control::wait_for;
use crate::points::{PointAccess, PointAccessExt};
use std::time::Duration;

/// Amplitude setpoint ceiling while RF first comes on (MV).
const INITIAL_RAMP_CAP_MV: f64 = 2.0;

/// Largest single amplitude increment during the walk (MV).
const AMPLITUDE_STEP_MV: f64 = 0.5;

/// Bound on an RF mode switch being confirmed by the readback.
const MODE_SWITCH_TIMEOUT: Duration = Duration::from_secs(30);

impl Cavity {
    /// Ramps the cavity to its configured operating amplitude (`acon`).
    ///
    /// The target is validated before any hardware command: a non-positive
    /// `acon` is fatal. Errors propagate to the setup boundary, which
    /// records them.
    #[instrument(skip_all, fields(cavity = %self.id))]
    pub(crate) async fn ramp_to_operating_amplitude<P: PointAccess>(
        &mut self,
        points: &P,
        config: &SetupConfig,
    ) -> Result<(), SetupError> {
        let acon = points.get_f64(&self.names.acon).await?;
        if acon <= 0.0 {
            return Err(SetupError::InvalidTargetAmplitude { acon });
        }
        info!(acon, "ramping to operating amplitude");

        self.piezo
            .enable_feedback(points, &self.abort, config.poll_tick)
            .await?;

        let rf_on = self.is_rf_on(points).await?;
        let mode = points.get_i64(&self.names.rf_mode_act).await?;
        if !rf_on || mode != RF_MODE_SEL_RAW {
            // RF comes on at low amplitude; the walk below raises it.
            points
                .put_f64(&self.names.ades, acon.min(INITIAL_RAMP_CAP_MV), true)
                .await?;
            self.turn_rf_on(points, config).await?;
        }
        self.advance_progress(80);

        self.switch_rf_mode(points, config, RF_MODE_SEL, "RF mode to reach SEL")
            .await?;
        self.advance_progress(85);

        self.walk_amplitude(points, config, acon).await?;
        self.advance_progress(90);

        self.tuner
            .recenter(
                points,
                &self.piezo.names.voltage,
                &self.abort,
                config.poll_tick,
            )
            .await?;
        self.advance_progress(95);

        self.switch_rf_mode(points, config, RF_MODE_SELAP, "RF mode to reach SELAP")
            .await?;
        Ok(())
    }

    async fn switch_rf_mode<P: PointAccess>(
        &self,
        points: &P,
        config: &SetupConfig,
        mode: i64,
        what: &str,
    ) -> Result<(), SetupError> {
        points.put_i64(&self.names.rf_mode_des, mode, true).await?;
        let rf_mode_act = &self.names.rf_mode_act;
        wait_for(
            &self.abort,
            config.poll_tick,
            Some(MODE_SWITCH_TIMEOUT),
            what,
            move || async move { Ok(points.get_i64(rf_mode_act).await? == mode) },
        )
        .await?;
        Ok(())
    }

    /// Walks the amplitude setpoint up to `target` in bounded steps.
    async fn walk_amplitude<P: PointAccess>(
        &self,
        points: &P,
        config: &SetupConfig,
        target: f64,
    ) -> Result<(), SetupError> {
        let mut amplitude = points.get_f64(&self.names.ades).await?;
        while amplitude < target {
            self.abort.check()?;
            if self.is_quenched(points).await? {
                return Err(SetupError::QuenchedDuringRamp { amplitude });
            }
            amplitude = (amplitude + AMPLITUDE_STEP_MV).min(target);
            debug!(amplitude, target, "walking amplitude");
            points.put_f64(&self.names.ades, amplitude, true).await?;
            tokio::time::sleep(config.poll_tick).await;
        }
        Ok(())
    }
}
