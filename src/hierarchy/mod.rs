//! Machine hierarchy: machine → linac → cryomodule → cavity.
//!
//! Each level exposes the same three operations — `trigger_start`,
//! `trigger_shutdown`, `trigger_abort` — and fans them out to its children.
//! Request flags are copied by value to every leaf before any cavity runs,
//! so a run in progress never observes a flag change. Within one process
//! the cavities of a level run strictly sequentially with a small delay
//! between them; parallelism across targets is a matter of launching more
//! processes.

use tracing::{info, instrument};

use crate::cavity::Cavity;
use crate::config::SetupConfig;
use crate::points::PointAccess;
use crate::types::{CavityNumber, CavityStatusReport, CryomoduleName, LinacName, RequestFlags};

/// Cryomodule names per linac section, in beamline order.
pub const LINAC_LAYOUT: [(&str, &[&str]); 4] = [
    ("L0B", &["01"]),
    ("L1B", &["02", "03", "H1", "H2"]),
    (
        "L2B",
        &[
            "04", "05", "06", "07", "08", "09", "10", "11", "12", "13", "14", "15",
        ],
    ),
    (
        "L3B",
        &[
            "16", "17", "18", "19", "20", "21", "22", "23", "24", "25", "26", "27", "28", "29",
            "30", "31", "32", "33", "34", "35",
        ],
    ),
];

/// A cryomodule: eight cavities sharing a cryostat.
#[derive(Debug)]
pub struct Cryomodule {
    name: CryomoduleName,
    linac: LinacName,
    /// Flags copied to every cavity when a run starts here or above.
    pub flags: RequestFlags,
    cavities: Vec<Cavity>,
}

impl Cryomodule {
    pub fn new(linac: LinacName, name: CryomoduleName) -> Self {
        let cavities = CavityNumber::ALL
            .iter()
            .map(|&n| Cavity::new(crate::types::CavityId::new(linac.clone(), name.clone(), n)))
            .collect();
        Cryomodule {
            name,
            linac,
            flags: RequestFlags::default(),
            cavities,
        }
    }

    pub fn name(&self) -> &CryomoduleName {
        &self.name
    }

    pub fn linac(&self) -> &LinacName {
        &self.linac
    }

    pub fn cavities(&self) -> &[Cavity] {
        &self.cavities
    }

    pub fn cavity(&self, number: CavityNumber) -> Option<&Cavity> {
        self.cavities.iter().find(|c| c.id().cavity == number)
    }

    pub fn cavity_mut(&mut self, number: CavityNumber) -> Option<&mut Cavity> {
        self.cavities.iter_mut().find(|c| c.id().cavity == number)
    }

    /// Copies this level's request flags to every cavity.
    pub fn propagate_request_flags(&mut self) {
        for cavity in &mut self.cavities {
            cavity.flags = self.flags;
        }
    }

    /// Runs setup on every cavity, sequentially, flags copied down first.
    #[instrument(skip_all, fields(cryomodule = %self.name))]
    pub async fn trigger_start<P: PointAccess>(&mut self, points: &P, config: &SetupConfig) {
        self.propagate_request_flags();
        info!(flags = ?self.flags, "starting cryomodule setup");
        let mut first = true;
        for cavity in &mut self.cavities {
            if !first {
                tokio::time::sleep(config.inter_cavity_delay).await;
            }
            first = false;
            cavity.setup(points, config).await;
        }
    }

    /// Shuts every cavity down, sequentially.
    #[instrument(skip_all, fields(cryomodule = %self.name))]
    pub async fn trigger_shutdown<P: PointAccess>(&mut self, points: &P, config: &SetupConfig) {
        info!("shutting cryomodule down");
        let mut first = true;
        for cavity in &mut self.cavities {
            if !first {
                tokio::time::sleep(config.inter_cavity_delay).await;
            }
            first = false;
            cavity.shut_down(points, config).await;
        }
    }

    /// Forwards the abort request to every cavity without waiting.
    pub fn trigger_abort(&self) {
        for cavity in &self.cavities {
            cavity.request_abort();
        }
    }

    pub fn status_reports(&self) -> Vec<CavityStatusReport> {
        self.cavities.iter().map(Cavity::status_report).collect()
    }
}

/// A linac section: an ordered set of cryomodules.
#[derive(Debug)]
pub struct Linac {
    name: LinacName,
    pub flags: RequestFlags,
    cryomodules: Vec<Cryomodule>,
}

impl Linac {
    pub fn new(name: LinacName, cryomodule_names: &[&str]) -> Self {
        let cryomodules = cryomodule_names
            .iter()
            .map(|cm| Cryomodule::new(name.clone(), CryomoduleName::new(*cm)))
            .collect();
        Linac {
            name,
            flags: RequestFlags::default(),
            cryomodules,
        }
    }

    pub fn name(&self) -> &LinacName {
        &self.name
    }

    pub fn cryomodules(&self) -> &[Cryomodule] {
        &self.cryomodules
    }

    pub fn cryomodule(&self, name: &str) -> Option<&Cryomodule> {
        self.cryomodules.iter().find(|cm| cm.name().as_str() == name)
    }

    pub fn cryomodule_mut(&mut self, name: &str) -> Option<&mut Cryomodule> {
        self.cryomodules
            .iter_mut()
            .find(|cm| cm.name().as_str() == name)
    }

    pub fn propagate_request_flags(&mut self) {
        for cm in &mut self.cryomodules {
            cm.flags = self.flags;
            cm.propagate_request_flags();
        }
    }

    #[instrument(skip_all, fields(linac = %self.name))]
    pub async fn trigger_start<P: PointAccess>(&mut self, points: &P, config: &SetupConfig) {
        self.propagate_request_flags();
        for cm in &mut self.cryomodules {
            cm.trigger_start(points, config).await;
        }
    }

    #[instrument(skip_all, fields(linac = %self.name))]
    pub async fn trigger_shutdown<P: PointAccess>(&mut self, points: &P, config: &SetupConfig) {
        for cm in &mut self.cryomodules {
            cm.trigger_shutdown(points, config).await;
        }
    }

    pub fn trigger_abort(&self) {
        for cm in &self.cryomodules {
            cm.trigger_abort();
        }
    }
}

/// The whole machine: every linac section.
#[derive(Debug)]
pub struct Machine {
    pub flags: RequestFlags,
    linacs: Vec<Linac>,
}

impl Machine {
    /// Builds the full production layout ([`LINAC_LAYOUT`]).
    pub fn new() -> Self {
        Machine::with_layout(&LINAC_LAYOUT)
    }

    /// Builds a machine from an explicit layout; used by bench setups and
    /// tests that want a single cryomodule.
    pub fn with_layout(layout: &[(&str, &[&str])]) -> Self {
        let linacs = layout
            .iter()
            .map(|&(name, cms)| Linac::new(LinacName::new(name), cms))
            .collect();
        Machine {
            flags: RequestFlags::default(),
            linacs,
        }
    }

    pub fn linacs(&self) -> &[Linac] {
        &self.linacs
    }

    pub fn linac(&self, name: &str) -> Option<&Linac> {
        self.linacs.iter().find(|l| l.name().as_str() == name)
    }

    pub fn linac_mut(&mut self, name: &str) -> Option<&mut Linac> {
        self.linacs.iter_mut().find(|l| l.name().as_str() == name)
    }

    pub fn cryomodule(&self, name: &str) -> Option<&Cryomodule> {
        self.linacs.iter().find_map(|l| l.cryomodule(name))
    }

    pub fn cryomodule_mut(&mut self, name: &str) -> Option<&mut Cryomodule> {
        self.linacs.iter_mut().find_map(|l| l.cryomodule_mut(name))
    }

    /// Every cavity of the machine, in beamline order.
    pub fn cavities(&self) -> impl Iterator<Item = &Cavity> {
        self.linacs
            .iter()
            .flat_map(|l| l.cryomodules.iter())
            .flat_map(|cm| cm.cavities.iter())
    }

    /// Copies the machine-level flags down to every leaf cavity.
    pub fn propagate_request_flags(&mut self) {
        for linac in &mut self.linacs {
            linac.flags = self.flags;
            linac.propagate_request_flags();
        }
    }

    /// Propagates flags to every leaf, then runs every linac in order.
    #[instrument(skip_all)]
    pub async fn trigger_start<P: PointAccess>(&mut self, points: &P, config: &SetupConfig) {
        self.propagate_request_flags();
        for linac in &mut self.linacs {
            linac.trigger_start(points, config).await;
        }
    }

    #[instrument(skip_all)]
    pub async fn trigger_shutdown<P: PointAccess>(&mut self, points: &P, config: &SetupConfig) {
        for linac in &mut self.linacs {
            linac.trigger_shutdown(points, config).await;
        }
    }

    pub fn trigger_abort(&self) {
        for linac in &self.linacs {
            linac.trigger_abort();
        }
    }

    pub fn status_reports(&self) -> Vec<CavityStatusReport> {
        self.cavities().map(Cavity::status_report).collect()
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}
