//! Nominal point tables for dry runs.
//!
//! Seeds a [`MemoryPoints`] backend so every device state machine a setup
//! run touches resolves the way healthy hardware would: the SSA powers up
//! when commanded, RF state and mode readbacks follow their setpoints, a
//! calibration scan completes in tolerance, and a tuner move pulls the
//! cavity onto resonance. Operators use this to rehearse a sequence end to
//! end before pointing the launcher at the real transport; the test suite
//! uses the same tables.

use crate::cavity::Cavity;
use crate::hierarchy::Machine;
use crate::points::{MemoryPoints, PointValue, ReactionValue};

/// Status value the SSA reports once powered on.
const SIM_SSA_ON: i64 = 3;
/// Status value the SSA reports once powered off.
const SIM_SSA_OFF: i64 = 2;
/// Calibration sequencer "complete" status.
const SIM_CAL_COMPLETE: i64 = 1;
/// Characterization sequencer "complete" status.
const SIM_CHAR_COMPLETE: i64 = 2;
/// Measured calibration results of a healthy amplifier.
const SIM_CAL_SLOPE: f64 = 0.95;
const SIM_CAL_FWD_POWER_W: f64 = 4_000.0;

/// Seeds one cavity's points with nominal values and reactions.
pub fn seed_nominal_cavity(points: &MemoryPoints, cavity: &Cavity) {
    let n = cavity.names();
    let ssa = &cavity.ssa.names;
    let step = &cavity.tuner.names;
    let pzt = &cavity.piezo.names;

    // Cavity comes up online, RF off, detuned, with a centered-but-offset
    // piezo and a cleared quench latch.
    points.set(n.hw_mode.clone(), 0i64);
    points.set(n.rf_state_act.clone(), 0i64);
    points.set(n.rf_mode_act.clone(), 5i64);
    points.set(n.ades.clone(), 0.0);
    points.set(n.aact.clone(), 0.0);
    points.set(n.acon.clone(), 16.6);
    points.set(n.detune.clone(), 5_000.0);
    points.set(n.quench_latch.clone(), 0i64);
    points.set(n.char_status.clone(), 0i64);
    points.set(n.loaded_q.clone(), 4.1e7);

    points.set(ssa.status.clone(), SIM_SSA_OFF);
    points.set(ssa.cal_status.clone(), 0i64);
    points.set(ssa.saved_drive_max.clone(), 0.8);

    points.set(step.motor_moving.clone(), 0i64);
    points.set(step.limit_switch_a.clone(), 0i64);
    points.set(step.limit_switch_b.clone(), 0i64);

    points.set(pzt.mode_act.clone(), 0i64);
    points.set(pzt.voltage.clone(), 30.0);

    // Device responses to commands.
    points.react(
        ssa.power_on.clone(),
        ssa.status.clone(),
        ReactionValue::Set(PointValue::Int(SIM_SSA_ON)),
    );
    points.react(
        ssa.power_off.clone(),
        ssa.status.clone(),
        ReactionValue::Set(PointValue::Int(SIM_SSA_OFF)),
    );
    points.react(
        ssa.cal_start.clone(),
        ssa.cal_status.clone(),
        ReactionValue::Set(PointValue::Int(SIM_CAL_COMPLETE)),
    );
    points.react(
        ssa.cal_start.clone(),
        ssa.slope.clone(),
        ReactionValue::Set(PointValue::Float(SIM_CAL_SLOPE)),
    );
    points.react(
        ssa.cal_start.clone(),
        ssa.fwd_power.clone(),
        ReactionValue::Set(PointValue::Float(SIM_CAL_FWD_POWER_W)),
    );
    points.react(
        n.rf_state_des.clone(),
        n.rf_state_act.clone(),
        ReactionValue::CopyPut,
    );
    points.react(
        n.rf_mode_des.clone(),
        n.rf_mode_act.clone(),
        ReactionValue::CopyPut,
    );
    points.react(
        n.interlock_reset.clone(),
        n.quench_latch.clone(),
        ReactionValue::Set(PointValue::Int(0)),
    );
    points.react(
        n.char_start.clone(),
        n.char_status.clone(),
        ReactionValue::Set(PointValue::Int(SIM_CHAR_COMPLETE)),
    );
    points.react(
        pzt.mode_des.clone(),
        pzt.mode_act.clone(),
        ReactionValue::CopyPut,
    );
    // A tuner move lands the cavity on resonance with a centered piezo.
    points.react(
        step.move_start.clone(),
        n.detune.clone(),
        ReactionValue::Set(PointValue::Float(0.0)),
    );
    points.react(
        step.move_start.clone(),
        pzt.voltage.clone(),
        ReactionValue::Set(PointValue::Float(0.0)),
    );
}

/// Seeds every cavity of a machine.
pub fn seed_nominal_machine(points: &MemoryPoints, machine: &Machine) {
    for cavity in machine.cavities() {
        seed_nominal_cavity(points, cavity);
    }
}
