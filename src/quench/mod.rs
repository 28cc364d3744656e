//! Quench handling: validation of quench events and the reset policy.
//!
//! A latched quench interlock means one of two things: the cavity really
//! lost superconductivity (leave it off, a reset would re-energize a
//! quenched cavity), or an RF glitch tripped the latch spuriously (reset
//! it, or the cavity strands off for no reason). The [`validator`] decides
//! between the two from the captured amplitude decay; the [`monitor`]
//! applies that decision continuously with a per-cavity cooldown.

pub mod monitor;
pub mod validator;

pub use monitor::{CavityResetStats, MonitorError, MonitorReport, QuenchMonitor};
pub use validator::{QuenchClassification, QuenchEvent, QuenchVerdict};
