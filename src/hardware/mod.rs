//! Hardware primitives owned by a cavity: amplifier, coarse tuner, fine tuner.
//!
//! Each primitive wraps a bundle of point names and exposes the operations
//! the setup state machine sequences. All blocking waits inside these
//! operations are abort-aware.

pub mod piezo;
pub mod ssa;
pub mod stepper;

pub use piezo::{Piezo, PiezoError};
pub use ssa::{Ssa, SsaError, SsaStatus};
pub use stepper::{StepperTuner, TunerError};
