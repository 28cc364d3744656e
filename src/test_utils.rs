//! Shared test utilities: proptest generators and synthetic waveforms.

use proptest::prelude::*;

use crate::types::{CavityId, CavityNumber, CavityStatus, CryomoduleName, LinacName, RequestFlags};

pub fn arb_cavity_number() -> impl Strategy<Value = CavityNumber> {
    (1u8..=8).prop_map(CavityNumber)
}

pub fn arb_cryomodule_name() -> impl Strategy<Value = CryomoduleName> {
    prop_oneof![
        "0[1-9]".prop_map(CryomoduleName::new),
        "[12][0-9]".prop_map(CryomoduleName::new),
        "H[12]".prop_map(CryomoduleName::new),
    ]
}

pub fn arb_linac_name() -> impl Strategy<Value = LinacName> {
    "L[0-3]B".prop_map(LinacName::new)
}

pub fn arb_cavity_id() -> impl Strategy<Value = CavityId> {
    (arb_linac_name(), arb_cryomodule_name(), arb_cavity_number())
        .prop_map(|(linac, cm, cavity)| CavityId::new(linac, cm, cavity))
}

pub fn arb_request_flags() -> impl Strategy<Value = RequestFlags> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(ssa_cal, auto_tune, cav_char, rf_ramp)| RequestFlags {
            ssa_cal,
            auto_tune,
            cav_char,
            rf_ramp,
        },
    )
}

pub fn arb_cavity_status() -> impl Strategy<Value = CavityStatus> {
    prop_oneof![
        Just(CavityStatus::Ready),
        Just(CavityStatus::Running),
        Just(CavityStatus::Error),
    ]
}

/// An exponential amplitude decay for a cavity with the given loaded Q,
/// sampled from the trip instant until just past the validator's noise
/// floor. Returns paired `(time, amplitude)` waveforms.
pub fn synthetic_decay(loaded_q: f64, rf_frequency_hz: f64, pre_amplitude: f64) -> (Vec<f64>, Vec<f64>) {
    let decay_rate = std::f64::consts::PI * rf_frequency_hz / loaded_q;
    // ln(500) is the time to fall to 0.002 of the starting amplitude; run
    // slightly past it so the tail truncation has samples to cut.
    let t_end = (1.0 / crate::quench::validator::DECAY_NOISE_FLOOR_FRACTION).ln() / decay_rate * 1.05;
    let n = 600;
    let mut time = Vec::with_capacity(n);
    let mut amplitude = Vec::with_capacity(n);
    for i in 0..n {
        let t = t_end * i as f64 / (n - 1) as f64;
        time.push(t);
        amplitude.push(pre_amplitude * (-decay_rate * t).exp());
    }
    (time, amplitude)
}
