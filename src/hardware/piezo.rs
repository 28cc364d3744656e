//! Piezo (fine tuner) feedback control.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::control::{wait_for, AbortFlag, AbortRequested, WaitError};
use crate::points::{PointAccess, PointAccessExt, PiezoPoints, PointError};
use crate::types::CavityId;

/// Piezo mode point values.
pub const PIEZO_MODE_MANUAL: i64 = 0;
pub const PIEZO_MODE_FEEDBACK: i64 = 1;

/// Bound on feedback engagement; the piezo controller can take a while to
/// hand over but not this long.
const FEEDBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from piezo operations.
#[derive(Debug, Error)]
pub enum PiezoError {
    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error(transparent)]
    Point(#[from] PointError),

    #[error(transparent)]
    Aborted(#[from] AbortRequested),
}

impl From<WaitError> for PiezoError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Aborted(a) => PiezoError::Aborted(a),
            WaitError::TimedOut { what, .. } => PiezoError::Timeout(what),
            WaitError::Point(e) => PiezoError::Point(e),
        }
    }
}

/// One cavity's piezo fine tuner.
#[derive(Debug, Clone)]
pub struct Piezo {
    pub names: PiezoPoints,
}

impl Piezo {
    pub fn new(id: &CavityId) -> Self {
        Piezo {
            names: PiezoPoints::new(id),
        }
    }

    /// Enables the piezo and puts it in feedback mode, polling the readback
    /// until the mode engages.
    pub async fn enable_feedback<P: PointAccess>(
        &self,
        points: &P,
        abort: &AbortFlag,
        tick: Duration,
    ) -> Result<(), PiezoError> {
        debug!("engaging piezo feedback");
        points.put_i64(&self.names.enable, 1, true).await?;
        points
            .put_i64(&self.names.mode_des, PIEZO_MODE_FEEDBACK, true)
            .await?;
        let mode_act = &self.names.mode_act;
        wait_for(
            abort,
            tick,
            Some(FEEDBACK_TIMEOUT),
            "piezo feedback to engage",
            move || async move { Ok(points.get_i64(mode_act).await? == PIEZO_MODE_FEEDBACK) },
        )
        .await?;
        Ok(())
    }
}
