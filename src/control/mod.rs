//! Cooperative cancellation and the shared poll-wait primitive.
//!
//! Aborts are best-effort: the flag is observed at poll boundaries, never
//! mid hardware-command. Every blocking wait in the crate goes through
//! [`wait::wait_for`], which checks the abort flag once per tick.

pub mod abort;
pub mod wait;

pub use abort::{AbortFlag, AbortRequested};
pub use wait::{wait_for, WaitError};
