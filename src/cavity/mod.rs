//! The cavity entity and its lifecycle operations.
//!
//! A [`Cavity`] owns exactly one SSA, one stepper tuner, and one piezo, and
//! carries the user-visible run state (`status`, `progress`, message) plus
//! the operator request flags and abort flag. The setup/shutdown state
//! machine lives in [`setup`]; the amplitude ramp in [`ramp`].
//!
//! # Key invariants
//!
//! 1. **Status transitions** are only `Ready → Running → {Ready, Error}`.
//! 2. **Progress** is reset to 0 at the start of a run and never decreases
//!    within one run.
//! 3. **Single translation point**: every error raised inside a step
//!    propagates to the `setup`/`shut_down` boundary, which alone turns it
//!    into `status = Error` plus a human-readable message. Nothing below
//!    that boundary leaves the cavity neither `Running` nor resolved.

mod ramp;
mod setup;


pub use setup::SetupError;

use tracing::info;

use crate::control::AbortFlag;
use crate::hardware::{Piezo, Ssa, StepperTuner};
use crate::points::{CavityPoints, PointAccess, PointAccessExt, PointError};
use crate::types::{CavityId, CavityStatus, CavityStatusReport, RequestFlags};

/// RF frequency of a standard cavity (Hz).
pub const RF_FREQUENCY_HZ: f64 = 1.3e9;

/// RF frequency of a harmonic-linearizer cavity (Hz).
pub const HARMONIC_RF_FREQUENCY_HZ: f64 = 3.9e9;

/// RF state point values.
pub const RF_STATE_OFF: i64 = 0;
pub const RF_STATE_ON: i64 = 1;

/// RF mode point values, in the order the hardware enumerates them.
pub const RF_MODE_SELAP: i64 = 0;
pub const RF_MODE_SELA: i64 = 1;
pub const RF_MODE_SEL: i64 = 2;
pub const RF_MODE_SEL_RAW: i64 = 3;
pub const RF_MODE_PULSE: i64 = 4;
pub const RF_MODE_CHIRP: i64 = 5;

/// Hardware mode reported by a cavity's `hw_mode` point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareMode {
    Online,
    Maintenance,
    Offline,
    Unknown(i64),
}

impl HardwareMode {
    pub fn from_point(value: i64) -> Self {
        match value {
            0 => HardwareMode::Online,
            1 => HardwareMode::Maintenance,
            2 => HardwareMode::Offline,
            other => HardwareMode::Unknown(other),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, HardwareMode::Online)
    }
}

/// One superconducting RF cavity and its dedicated hardware.
#[derive(Debug)]
pub struct Cavity {
    id: CavityId,
    names: CavityPoints,
    pub ssa: Ssa,
    pub tuner: StepperTuner,
    pub piezo: Piezo,
    status: CavityStatus,
    progress: u8,
    status_message: String,
    /// Which setup steps the next run executes. Copied down from the
    /// hierarchy before a run starts.
    pub flags: RequestFlags,
    abort: AbortFlag,
    rf_frequency_hz: f64,
}

impl Cavity {
    pub fn new(id: CavityId) -> Self {
        let rf_frequency_hz = if id.cryomodule.is_harmonic() {
            HARMONIC_RF_FREQUENCY_HZ
        } else {
            RF_FREQUENCY_HZ
        };
        Cavity {
            names: CavityPoints::new(&id),
            ssa: Ssa::new(&id),
            tuner: StepperTuner::new(&id),
            piezo: Piezo::new(&id),
            status: CavityStatus::Ready,
            progress: 0,
            status_message: String::new(),
            flags: RequestFlags::default(),
            abort: AbortFlag::new(),
            rf_frequency_hz,
            id,
        }
    }

    pub fn id(&self) -> &CavityId {
        &self.id
    }

    pub fn names(&self) -> &CavityPoints {
        &self.names
    }

    pub fn status(&self) -> CavityStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn rf_frequency_hz(&self) -> f64 {
        self.rf_frequency_hz
    }

    /// Requests a cooperative abort of whatever run is in progress.
    pub fn request_abort(&self) {
        info!(cavity = %self.id, "abort requested");
        self.abort.request();
    }

    /// A handle front ends can hold to abort this cavity later.
    pub fn abort_handle(&self) -> AbortFlag {
        self.abort.clone()
    }

    pub fn status_report(&self) -> CavityStatusReport {
        CavityStatusReport {
            cavity: self.id.clone(),
            status: self.status,
            progress: self.progress,
            message: self.status_message.clone(),
        }
    }

    /// Reads the hardware mode point.
    pub async fn hardware_mode<P: PointAccess>(
        &self,
        points: &P,
    ) -> Result<HardwareMode, PointError> {
        Ok(HardwareMode::from_point(
            points.get_i64(&self.names.hw_mode).await?,
        ))
    }

    pub async fn is_online<P: PointAccess>(&self, points: &P) -> Result<bool, PointError> {
        Ok(self.hardware_mode(points).await?.is_online())
    }

    pub async fn is_rf_on<P: PointAccess>(&self, points: &P) -> Result<bool, PointError> {
        Ok(points.get_i64(&self.names.rf_state_act).await? == RF_STATE_ON)
    }

    /// Whether the quench interlock is currently latched.
    pub async fn is_quenched<P: PointAccess>(&self, points: &P) -> Result<bool, PointError> {
        Ok(points.get_i64(&self.names.quench_latch).await? == 1)
    }

    fn set_status(&mut self, status: CavityStatus, message: impl Into<String>) {
        self.status = status;
        self.status_message = message.into();
    }

    /// Progress only moves forward within a run.
    fn advance_progress(&mut self, to: u8) {
        debug_assert!(to >= self.progress, "progress must not decrease in a run");
        self.progress = to;
    }

    #[cfg(test)]
    pub(crate) fn force_status_for_tests(&mut self, status: CavityStatus) {
        self.status = status;
    }
}
