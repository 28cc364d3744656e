//! Cavity run status and operator request flags.
//!
//! These types carry the user-visible state of a cavity script run. Front
//! ends consume them but the contract here is only that they are kept
//! current and monotonically sensible.

use serde::{Deserialize, Serialize};

use super::ids::CavityId;

/// The lifecycle status of a cavity script run.
///
/// Transitions are only `Ready → Running → {Ready, Error}`. A new run resets
/// `Error` back through `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CavityStatus {
    /// Idle and available; the last run (if any) succeeded.
    Ready,

    /// A setup or shutdown script is currently executing.
    Running,

    /// The last run failed; see the status message for the reason.
    Error,
}

impl CavityStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, CavityStatus::Ready)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, CavityStatus::Running)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CavityStatus::Error)
    }
}

/// Operator request flags selecting which setup steps run.
///
/// Flags are copied by value down the hierarchy before a run starts, never
/// shared by reference, so one cavity's run cannot mutate a sibling's intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestFlags {
    /// Run SSA calibration.
    pub ssa_cal: bool,

    /// Mechanically tune to resonance before RF.
    pub auto_tune: bool,

    /// Run cavity characterization and the probe-Q calculation.
    pub cav_char: bool,

    /// Ramp to the configured operating amplitude.
    pub rf_ramp: bool,
}

impl RequestFlags {
    /// Every step requested (the usual full bring-up).
    pub fn all() -> Self {
        RequestFlags {
            ssa_cal: true,
            auto_tune: true,
            cav_char: true,
            rf_ramp: true,
        }
    }

    /// No optional step requested; setup still does the unconditional
    /// preamble (RF off, SSA on, interlock reset).
    pub fn none() -> Self {
        RequestFlags::default()
    }

    pub fn any(&self) -> bool {
        self.ssa_cal || self.auto_tune || self.cav_char || self.rf_ramp
    }
}

/// Snapshot of one cavity's user-visible state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CavityStatusReport {
    pub cavity: CavityId,
    pub status: CavityStatus,
    /// 0-100, monotonically non-decreasing within one run.
    pub progress: u8,
    /// The most recent human-readable explanation.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ids::{CavityNumber, CryomoduleName, LinacName};
    use proptest::prelude::*;

    fn arb_status() -> impl Strategy<Value = CavityStatus> {
        prop_oneof![
            Just(CavityStatus::Ready),
            Just(CavityStatus::Running),
            Just(CavityStatus::Error),
        ]
    }

    fn arb_flags() -> impl Strategy<Value = RequestFlags> {
        (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(ssa_cal, auto_tune, cav_char, rf_ramp)| RequestFlags {
                ssa_cal,
                auto_tune,
                cav_char,
                rf_ramp,
            },
        )
    }

    proptest! {
        #[test]
        fn status_serde_roundtrip(status in arb_status()) {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: CavityStatus = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(status, parsed);
        }

        #[test]
        fn flags_serde_roundtrip(flags in arb_flags()) {
            let json = serde_json::to_string(&flags).unwrap();
            let parsed: RequestFlags = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(flags, parsed);
        }

        #[test]
        fn any_is_false_only_for_none(flags in arb_flags()) {
            prop_assert_eq!(
                flags.any(),
                flags != RequestFlags::none()
            );
        }
    }

    #[test]
    fn status_predicates() {
        assert!(CavityStatus::Ready.is_ready());
        assert!(CavityStatus::Running.is_running());
        assert!(CavityStatus::Error.is_error());
        assert!(!CavityStatus::Ready.is_running());
    }

    #[test]
    fn report_serializes_with_nested_id() {
        let report = CavityStatusReport {
            cavity: CavityId::new(
                LinacName::new("L0B"),
                CryomoduleName::new("01"),
                CavityNumber(1),
            ),
            status: CavityStatus::Ready,
            progress: 100,
            message: "setup complete".to_string(),
        };
        let json = serde_json::to_string(&report).unwrap();
        let parsed: CavityStatusReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, parsed);
    }
}
