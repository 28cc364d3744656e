//! Point access: the process-variable boundary between the orchestration
//! core and the control system.
//!
//! Every piece of hardware state (RF on/off, SSA status, tuner position,
//! quench latch, fault waveforms) is read and written through [`PointAccess`];
//! the core never talks to hardware directly. The trait-based design enables:
//!
//! - In-memory backends for dry runs and tests ([`MemoryPoints`])
//! - Site transports implemented out of tree
//! - Logging/tracing wrappers
//!
//! Errors distinguish timeouts, disconnects, and rejected writes because the
//! monitor loop counts them per cavity rather than aborting a scan.

use std::future::Future;

use thiserror::Error;

pub mod memory;
pub mod names;

pub use memory::{MemoryPoints, ReactionValue};
pub use names::{CavityPoints, PiezoPoints, PointName, SsaPoints, StepperPoints};

/// A value read from or written to a hardware point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Float(f64),
    Int(i64),
    /// Waveform records (fault capture buffers).
    FloatArray(Vec<f64>),
}

impl PointValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Float(v) => Some(*v),
            PointValue::Int(v) => Some(*v as f64),
            PointValue::FloatArray(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PointValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64_array(&self) -> Option<&[f64]> {
        match self {
            PointValue::FloatArray(v) => Some(v),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PointValue::Float(_) => "float",
            PointValue::Int(_) => "int",
            PointValue::FloatArray(_) => "float array",
        }
    }
}

impl From<f64> for PointValue {
    fn from(v: f64) -> Self {
        PointValue::Float(v)
    }
}

impl From<i64> for PointValue {
    fn from(v: i64) -> Self {
        PointValue::Int(v)
    }
}

impl From<Vec<f64>> for PointValue {
    fn from(v: Vec<f64>) -> Self {
        PointValue::FloatArray(v)
    }
}

/// Errors surfaced by a point transport.
#[derive(Debug, Clone, Error)]
pub enum PointError {
    /// The read or write did not complete within the transport's deadline.
    #[error("timed out accessing {name}")]
    Timeout { name: String },

    /// The point has no connected source.
    #[error("{name} is disconnected")]
    Disconnected { name: String },

    /// The hardware refused the write.
    #[error("write to {name} rejected: {reason}")]
    WriteRejected { name: String, reason: String },

    /// The point holds a value of a different type than the caller expected.
    #[error("{name} returned {got} where {wanted} was expected")]
    TypeMismatch {
        name: String,
        wanted: &'static str,
        got: &'static str,
    },
}

/// Read/write access to named hardware points.
///
/// # Example (mock for testing)
///
/// ```ignore
/// let points = MemoryPoints::new();
/// points.set(name.clone(), PointValue::Float(16.6));
/// assert_eq!(points.get_f64(&name).await.unwrap(), 16.6);
/// ```
pub trait PointAccess: Send + Sync {
    /// Reads the current value of a point.
    fn get(&self, name: &PointName) -> impl Future<Output = Result<PointValue, PointError>> + Send;

    /// Writes a value to a point. When `wait` is true the call returns only
    /// after the hardware acknowledges the write.
    fn put(
        &self,
        name: &PointName,
        value: PointValue,
        wait: bool,
    ) -> impl Future<Output = Result<(), PointError>> + Send;
}

/// Typed accessors available on every [`PointAccess`] implementation.
pub trait PointAccessExt: PointAccess {
    fn get_f64(&self, name: &PointName) -> impl Future<Output = Result<f64, PointError>> + Send {
        async move {
            let value = self.get(name).await?;
            value.as_f64().ok_or_else(|| PointError::TypeMismatch {
                name: name.to_string(),
                wanted: "float",
                got: value.kind(),
            })
        }
    }

    fn get_i64(&self, name: &PointName) -> impl Future<Output = Result<i64, PointError>> + Send {
        async move {
            let value = self.get(name).await?;
            value.as_i64().ok_or_else(|| PointError::TypeMismatch {
                name: name.to_string(),
                wanted: "int",
                got: value.kind(),
            })
        }
    }

    fn get_f64_array(
        &self,
        name: &PointName,
    ) -> impl Future<Output = Result<Vec<f64>, PointError>> + Send {
        async move {
            let value = self.get(name).await?;
            match value {
                PointValue::FloatArray(v) => Ok(v),
                other => Err(PointError::TypeMismatch {
                    name: name.to_string(),
                    wanted: "float array",
                    got: other.kind(),
                }),
            }
        }
    }

    fn put_f64(
        &self,
        name: &PointName,
        value: f64,
        wait: bool,
    ) -> impl Future<Output = Result<(), PointError>> + Send {
        self.put(name, PointValue::Float(value), wait)
    }

    fn put_i64(
        &self,
        name: &PointName,
        value: i64,
        wait: bool,
    ) -> impl Future<Output = Result<(), PointError>> + Send {
        self.put(name, PointValue::Int(value), wait)
    }
}

impl<P: PointAccess + ?Sized> PointAccessExt for P {}
