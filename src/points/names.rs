//! Point-name construction for the accelerator's device addressing scheme.
//!
//! Cavity-scoped names follow `ACCL:<linac>:<cm><cavity>0:<suffix>`, so
//! cavity 3 of CM02 in L1B is addressed as `ACCL:L1B:0230:<suffix>`.
//! Sub-devices nest under the cavity prefix (`SSA:`, `STEP:`, `PZT:`).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::CavityId;

/// A fully-qualified point (process variable) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointName(pub String);

impl PointName {
    pub fn new(s: impl Into<String>) -> Self {
        PointName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Heartbeat point incremented by the quench monitor once per scan cycle.
/// External watchdogs poll it to detect a stalled monitor.
pub fn quench_monitor_heartbeat() -> PointName {
    PointName::new("PHYS:SYS0:1:SC_CAV_QNCH_RESET_HEART")
}

fn cavity_prefix(id: &CavityId) -> String {
    format!("ACCL:{}:{}{}0:", id.linac, id.cryomodule, id.cavity)
}

/// Per-cavity point names (RF controls, interlocks, fault capture).
#[derive(Debug, Clone)]
pub struct CavityPoints {
    /// Hardware mode (online/maintenance/offline).
    pub hw_mode: PointName,
    /// RF state request and readback.
    pub rf_state_des: PointName,
    pub rf_state_act: PointName,
    /// RF mode request and readback (SELAP/SELA/SEL/...).
    pub rf_mode_des: PointName,
    pub rf_mode_act: PointName,
    /// Amplitude setpoint, readback, and configured target (MV).
    pub ades: PointName,
    pub aact: PointName,
    pub acon: PointName,
    /// SEL amplitude setpoint, the second drive channel zeroed before
    /// SSA calibration.
    pub sel_aset: PointName,
    /// Detune readback (Hz).
    pub detune: PointName,
    /// Quench interlock latch and the reset command.
    pub quench_latch: PointName,
    pub interlock_reset: PointName,
    /// Characterization sequencer controls.
    pub char_start: PointName,
    pub char_status: PointName,
    pub probe_q_start: PointName,
    /// Most recently measured loaded Q.
    pub loaded_q: PointName,
    /// Paired fault-capture waveforms (seconds relative to the trip, MV).
    pub fault_time_waveform: PointName,
    pub fault_amplitude_waveform: PointName,
}

impl CavityPoints {
    pub fn new(id: &CavityId) -> Self {
        let p = cavity_prefix(id);
        CavityPoints {
            hw_mode: PointName::new(format!("{p}HWMODE")),
            rf_state_des: PointName::new(format!("{p}RFCTRL")),
            rf_state_act: PointName::new(format!("{p}RFSTATE")),
            rf_mode_des: PointName::new(format!("{p}RFMODECTRL")),
            rf_mode_act: PointName::new(format!("{p}RFMODE")),
            ades: PointName::new(format!("{p}ADES")),
            aact: PointName::new(format!("{p}AACTMEAN")),
            acon: PointName::new(format!("{p}ACON")),
            sel_aset: PointName::new(format!("{p}SEL_ASET")),
            detune: PointName::new(format!("{p}DFBEST")),
            quench_latch: PointName::new(format!("{p}QUENCH_LTCH")),
            interlock_reset: PointName::new(format!("{p}INTLK_RESET_ALL")),
            char_start: PointName::new(format!("{p}PROBECALSTRT")),
            char_status: PointName::new(format!("{p}PROBECALSTS")),
            probe_q_start: PointName::new(format!("{p}QPROBE_CALC")),
            loaded_q: PointName::new(format!("{p}QLOADED")),
            fault_time_waveform: PointName::new(format!("{p}CAV:FLTTWF")),
            fault_amplitude_waveform: PointName::new(format!("{p}CAV:FLTAWF")),
        }
    }
}

/// Solid-state amplifier point names.
#[derive(Debug, Clone)]
pub struct SsaPoints {
    pub status: PointName,
    pub power_on: PointName,
    pub power_off: PointName,
    pub cal_start: PointName,
    pub cal_status: PointName,
    /// Measured calibration results.
    pub slope: PointName,
    pub fwd_power: PointName,
    /// Stored calibration values carried between runs.
    pub saved_slope: PointName,
    pub saved_drive_max: PointName,
    /// Drive maximum used by the next calibration scan.
    pub drive_max: PointName,
}

impl SsaPoints {
    pub fn new(id: &CavityId) -> Self {
        let p = format!("{}SSA:", cavity_prefix(id));
        SsaPoints {
            status: PointName::new(format!("{p}StatusMsg")),
            power_on: PointName::new(format!("{p}PowerOn")),
            power_off: PointName::new(format!("{p}PowerOff")),
            cal_start: PointName::new(format!("{p}CALSTRT")),
            cal_status: PointName::new(format!("{p}CALSTS")),
            slope: PointName::new(format!("{p}SLOPE")),
            fwd_power: PointName::new(format!("{p}CALPWR")),
            saved_slope: PointName::new(format!("{p}SLOPE_SAVED")),
            saved_drive_max: PointName::new(format!("{p}DRV_MAX_SAVE")),
            drive_max: PointName::new(format!("{p}DRV_MAX_REQ")),
        }
    }
}

/// Stepper (coarse mechanical tuner) point names.
#[derive(Debug, Clone)]
pub struct StepperPoints {
    pub step_des: PointName,
    pub move_start: PointName,
    pub motor_moving: PointName,
    pub motion_abort: PointName,
    pub limit_switch_a: PointName,
    pub limit_switch_b: PointName,
}

impl StepperPoints {
    pub fn new(id: &CavityId) -> Self {
        let p = format!("{}STEP:", cavity_prefix(id));
        StepperPoints {
            step_des: PointName::new(format!("{p}NSTEPS")),
            move_start: PointName::new(format!("{p}MOV_REQ_POS")),
            motor_moving: PointName::new(format!("{p}STAT_MOV")),
            motion_abort: PointName::new(format!("{p}ABORT_REQ")),
            limit_switch_a: PointName::new(format!("{p}STAT_LIMA")),
            limit_switch_b: PointName::new(format!("{p}STAT_LIMB")),
        }
    }
}

/// Piezo (fine tuner) point names.
#[derive(Debug, Clone)]
pub struct PiezoPoints {
    pub enable: PointName,
    pub mode_des: PointName,
    pub mode_act: PointName,
    /// DC voltage readback, re-centered by walking the stepper.
    pub voltage: PointName,
}

impl PiezoPoints {
    pub fn new(id: &CavityId) -> Self {
        let p = format!("{}PZT:", cavity_prefix(id));
        PiezoPoints {
            enable: PointName::new(format!("{p}ENABLE")),
            mode_des: PointName::new(format!("{p}MODECTRL")),
            mode_act: PointName::new(format!("{p}MODESTAT")),
            voltage: PointName::new(format!("{p}V")),
        }
    }
}
