//! Per-cavity abort flags.
//!
//! An abort is a single boolean per cavity: an operator sets it at any time,
//! and the running sequence observes it at the next poll tick. The flag is
//! cleared at the start of a run (a stale abort must not kill a fresh run)
//! and again when an aborted run unwinds, so the cavity never stays poisoned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Returned (as an error value) when an operator abort is observed at a
/// poll tick. Unwinds the current operation up to the `setup`/`shut_down`
/// boundary, which clears the flag and marks the run `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("aborted by operator request")]
pub struct AbortRequested;

/// A shared, externally settable abort flag for one cavity.
///
/// Cloning yields another handle to the same flag, so the hierarchy can hand
/// handles to front ends while the cavity's own sequence polls it.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    requested: Arc<AtomicBool>,
}

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag::default()
    }

    /// Requests an abort. Takes effect at the next poll tick of whatever is
    /// running, never mid hardware-command.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Poll-tick check: errors when the flag is set.
    pub fn check(&self) -> Result<(), AbortRequested> {
        if self.is_requested() {
            Err(AbortRequested)
        } else {
            Ok(())
        }
    }
}
