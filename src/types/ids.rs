//! Newtype wrappers for accelerator identifiers.
//!
//! These types prevent accidental mixing of identifiers (e.g., using a cavity
//! number where a cryomodule name is expected) and make the code more
//! self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A cavity position within a cryomodule (1 through 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CavityNumber(pub u8);

impl CavityNumber {
    /// All eight positions of a cryomodule, in beamline order.
    pub const ALL: [CavityNumber; 8] = [
        CavityNumber(1),
        CavityNumber(2),
        CavityNumber(3),
        CavityNumber(4),
        CavityNumber(5),
        CavityNumber(6),
        CavityNumber(7),
        CavityNumber(8),
    ];

    /// Creates a cavity number, rejecting values outside 1..=8.
    pub fn new(n: u8) -> Option<Self> {
        (1..=8).contains(&n).then_some(CavityNumber(n))
    }
}

impl fmt::Display for CavityNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cryomodule name within its linac section, e.g. `"02"` or `"H1"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CryomoduleName(pub String);

impl CryomoduleName {
    pub fn new(s: impl Into<String>) -> Self {
        CryomoduleName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Harmonic-linearizer cryomodules carry an `H` prefix and run 3.9 GHz
    /// cavities instead of the standard 1.3 GHz.
    pub fn is_harmonic(&self) -> bool {
        self.0.starts_with('H')
    }
}

impl fmt::Display for CryomoduleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A linac section name (`L0B` through `L3B`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinacName(pub String);

impl LinacName {
    pub fn new(s: impl Into<String>) -> Self {
        LinacName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LinacName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully-qualified identity of one cavity in the machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CavityId {
    pub linac: LinacName,
    pub cryomodule: CryomoduleName,
    pub cavity: CavityNumber,
}

impl CavityId {
    pub fn new(linac: LinacName, cryomodule: CryomoduleName, cavity: CavityNumber) -> Self {
        CavityId {
            linac,
            cryomodule,
            cavity,
        }
    }
}

impl fmt::Display for CavityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} CM{} cavity {}",
            self.linac, self.cryomodule, self.cavity
        )
    }
}
