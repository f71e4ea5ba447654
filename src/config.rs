//! Analysis configuration: signal definition, systematics catalogue and
//! normalization constants.
//!
//! Every field carries a default, so an empty (or absent) TOML file describes
//! the nominal single-pion analysis. Units are MeV, millimetres and radians
//! unless a field name says otherwise.

use std::{collections::BTreeSet, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    cuts::{parse_cut_list, Cut, TRACKED_CUTS, TRACKLESS_CUTS},
    error::{Error, Result},
    universe::ShiftTarget,
};

/// Which signal definition the run extracts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// Exactly one charged pion
    OnePi,
    /// One pion with a hadron-track angular requirement
    OnePiTh,
    /// Any number of charged pions
    NPi,
}

impl SignalKind {
    fn ensure_implemented(self) -> Result<()> {
        match self {
            SignalKind::OnePi => Ok(()),
            other => Err(Error::Configuration(format!(
                "signal definition {other:?} is not implemented"
            ))),
        }
    }
}

/// How the two Michel-reconstruction pipelines are combined.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MichelMode {
    OnlyTracked,
    OnlyUntracked,
    Both,
}

impl MichelMode {
    pub fn from_flags(tracked: bool, untracked: bool) -> Result<Self> {
        match (tracked, untracked) {
            (true, false) => Ok(MichelMode::OnlyTracked),
            (false, true) => Ok(MichelMode::OnlyUntracked),
            (true, true) => Ok(MichelMode::Both),
            (false, false) => Err(Error::Configuration(
                "tracked and untracked Michel reconstruction are both disabled".into(),
            )),
        }
    }
    pub fn tracked(self) -> bool {
        !matches!(self, MichelMode::OnlyUntracked)
    }
    pub fn untracked(self) -> bool {
        !matches!(self, MichelMode::OnlyTracked)
    }
}

/// Immutable selection thresholds shared by every cut.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalDefinition {
    pub kind: SignalKind,
    pub pmu_min: f64,
    pub pmu_max: f64,
    pub thetamu_max: f64,
    pub iso_prongs_max: u32,
    pub apothem: f64,
    pub z_vtx_min: f64,
    pub z_vtx_max: f64,
    /// Upper edge of the signal region in reconstructed W_exp.
    pub w_max: f64,
    /// Lowest W_exp that counts as sideband rather than the signal-region tail.
    pub w_sideband_min: f64,
    /// Truth-W boundary between the mid-W and high-W background categories.
    pub w_mid_max: f64,
    pub tpi_min: f64,
    pub tpi_max: f64,
    pub ptmu_max: f64,
    pub llr_min: f64,
    pub node_max: f64,
    pub michel_distance_max: f64,
    pub tracked_michel_reco: bool,
    pub untracked_michel_reco: bool,
}

impl Default for SignalDefinition {
    fn default() -> Self {
        Self {
            kind: SignalKind::OnePi,
            pmu_min: 1500.0,
            pmu_max: 20000.0,
            thetamu_max: 20f64.to_radians(),
            iso_prongs_max: 2,
            apothem: 850.0,
            z_vtx_min: 5990.0,
            z_vtx_max: 8340.0,
            w_max: 1400.0,
            w_sideband_min: 1500.0,
            w_mid_max: 1800.0,
            tpi_min: 0.0,
            tpi_max: 350.0,
            ptmu_max: 1800.0,
            llr_min: 0.0,
            node_max: 160.0,
            michel_distance_max: 150.0,
            tracked_michel_reco: true,
            untracked_michel_reco: false,
        }
    }
}

impl SignalDefinition {
    pub fn michel_mode(&self) -> Result<MichelMode> {
        MichelMode::from_flags(self.tracked_michel_reco, self.untracked_michel_reco)
    }

    pub fn validate(&self) -> Result<()> {
        self.kind.ensure_implemented()?;
        self.michel_mode()?;
        let ordered = [
            ("pmu", self.pmu_min, self.pmu_max),
            ("z_vtx", self.z_vtx_min, self.z_vtx_max),
            ("tpi", self.tpi_min, self.tpi_max),
            ("w", self.w_max, self.w_mid_max),
        ];
        for (name, lo, hi) in ordered {
            if !(lo < hi) {
                return Err(Error::Configuration(format!(
                    "{name} range is empty: [{lo}, {hi})"
                )));
            }
        }
        Ok(())
    }
}

/// How one systematic source perturbs a universe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceShift {
    /// Reweights by `1 + sigma * response`, `response` being a per-candidate field.
    Vertical { response: String },
    /// Scales a reconstructed energy by `1 + sigma * fraction`.
    Lateral { target: ShiftTarget, fraction: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystematicSource {
    pub name: String,
    #[serde(flatten)]
    pub shift: SourceShift,
    pub sigmas: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystematicsConfig {
    pub enabled: bool,
    pub sources: Vec<SystematicSource>,
}

impl Default for SystematicsConfig {
    fn default() -> Self {
        let vertical = |name: &str, response: &str, sigmas: Vec<f64>| SystematicSource {
            name: name.to_string(),
            shift: SourceShift::Vertical {
                response: response.to_string(),
            },
            sigmas,
        };
        let lateral = |name: &str, target: ShiftTarget, fraction: f64| SystematicSource {
            name: name.to_string(),
            shift: SourceShift::Lateral { target, fraction },
            sigmas: vec![-1.0, 1.0],
        };
        Self {
            enabled: true,
            sources: vec![
                vertical(
                    "Flux",
                    "flux",
                    vec![-1.5, -1.0, -0.6, -0.3, -0.1, 0.1, 0.3, 0.6, 1.0, 1.5],
                ),
                vertical("GENIE_MaRES", "genie_mares", vec![-1.0, 1.0]),
                lateral("Muon_Energy", ShiftTarget::MuonEnergy, 0.02),
                lateral("Hadron_Energy", ShiftTarget::HadronEnergy, 0.05),
            ],
        }
    }
}

impl SystematicsConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if source.name == crate::universe::CV_BAND {
                return Err(Error::Configuration(format!(
                    "systematic source may not be named {:?}",
                    source.name
                )));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "systematic source {} registered twice",
                    source.name
                )));
            }
            if source.sigmas.is_empty() {
                return Err(Error::Configuration(format!(
                    "systematic source {} has no universes",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

/// Ordered cut identifiers of the two reconstruction pipelines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub tracked_cuts: Vec<String>,
    pub trackless_cuts: Vec<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        let ids = |cuts: &[Cut]| cuts.iter().map(|c| c.identifier().to_string()).collect();
        Self {
            tracked_cuts: ids(&TRACKED_CUTS),
            trackless_cuts: ids(&TRACKLESS_CUTS),
        }
    }
}

impl SelectionConfig {
    pub fn tracked(&self) -> Result<Vec<Cut>> {
        parse_cut_list(&self.tracked_cuts)
    }

    pub fn trackless(&self) -> Result<Vec<Cut>> {
        parse_cut_list(&self.trackless_cuts)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Neutrino energy range (GeV) of the flux integral.
    pub flux_e_min: f64,
    pub flux_e_max: f64,
    /// Effective tracker density (g/cm^3) used to count target nucleons.
    pub target_density: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            flux_e_min: 0.0,
            flux_e_max: 100.0,
            target_density: 0.91,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub signal: SignalDefinition,
    pub selection: SelectionConfig,
    pub systematics: SystematicsConfig,
    pub normalization: NormalizationConfig,
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.signal.validate()?;
        self.selection.tracked()?;
        self.selection.trackless()?;
        self.systematics.validate()
    }
}
