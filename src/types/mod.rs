//! Core domain types shared across the crate.

pub mod ids;
pub mod status;

pub use ids::{CavityId, CavityNumber, CryomoduleName, LinacName};
pub use status::{CavityStatus, CavityStatusReport, RequestFlags};
