//! Systematic universes and error bands.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    candidate::{Candidate, HadronTrack},
    config::{SourceShift, SystematicsConfig},
};

pub const CV_BAND: &str = "cv";
pub const MUON_MASS: f64 = 105.658;
pub const NUCLEON_MASS: f64 = 938.272;

/// Reconstructed energy a lateral universe rescales.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftTarget {
    MuonEnergy,
    HadronEnergy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UniverseKind {
    Vertical,
    Lateral,
}

#[derive(Clone, Debug, PartialEq)]
enum Shift {
    Nominal,
    Weight { response: String },
    Energy { target: ShiftTarget, fraction: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Universe {
    band: String,
    index: usize,
    sigma: f64,
    shift: Shift,
}

impl Universe {
    pub fn cv() -> Self {
        Universe {
            band: CV_BAND.to_string(),
            index: 0,
            sigma: 0.0,
            shift: Shift::Nominal,
        }
    }

    pub fn vertical(band: &str, index: usize, sigma: f64, response: &str) -> Self {
        Universe {
            band: band.to_string(),
            index,
            sigma,
            shift: Shift::Weight {
                response: response.to_string(),
            },
        }
    }

    pub fn lateral(
        band: &str,
        index: usize,
        sigma: f64,
        target: ShiftTarget,
        fraction: f64,
    ) -> Self {
        Universe {
            band: band.to_string(),
            index,
            sigma,
            shift: Shift::Energy { target, fraction },
        }
    }

    pub fn kind(&self) -> UniverseKind {
        match self.shift {
            Shift::Nominal | Shift::Weight { .. } => UniverseKind::Vertical,
            Shift::Energy { .. } => UniverseKind::Lateral,
        }
    }

    pub fn is_vertical_only(&self) -> bool {
        self.kind() == UniverseKind::Vertical
    }

    pub fn is_cv(&self) -> bool {
        self.shift == Shift::Nominal
    }

    /// Stable short name of the systematic source.
    pub fn short_name(&self) -> &str {
        &self.band
    }

    /// Position of this universe inside its band.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn label(&self) -> String {
        if self.is_cv() {
            CV_BAND.to_string()
        } else {
            format!("{}[{}]", self.band, self.index)
        }
    }

    pub fn weight(&self, candidate: &Candidate) -> f64 {
        match &self.shift {
            Shift::Weight { response } => {
                candidate.weight * (1.0 + self.sigma * candidate.response(response))
            }
            _ => candidate.weight,
        }
    }

    fn energy_scale(&self, target: ShiftTarget) -> f64 {
        match &self.shift {
            Shift::Energy { target: t, fraction } if *t == target => 1.0 + self.sigma * fraction,
            _ => 1.0,
        }
    }

    /// Reads a named raw field with this universe's energy shift applied.
    pub fn shifted_field(&self, candidate: &Candidate, key: &str) -> Option<f64> {
        let scale = match key {
            "pmu" => self.energy_scale(ShiftTarget::MuonEnergy),
            "recoil_energy" | "trackless_recoil_energy" | "tpi_trackless" => {
                self.energy_scale(ShiftTarget::HadronEnergy)
            }
            _ => 1.0,
        };
        candidate.field(key).map(|v| v * scale)
    }

    pub fn pmu(&self, c: &Candidate) -> f64 {
        c.pmu * self.energy_scale(ShiftTarget::MuonEnergy)
    }

    pub fn thetamu(&self, c: &Candidate) -> f64 {
        c.thetamu
    }

    pub fn emu(&self, c: &Candidate) -> f64 {
        self.pmu(c).hypot(MUON_MASS)
    }

    pub fn ptmu(&self, c: &Candidate) -> f64 {
        self.pmu(c) * c.thetamu.sin()
    }

    pub fn pzmu(&self, c: &Candidate) -> f64 {
        self.pmu(c) * c.thetamu.cos()
    }

    pub fn recoil_energy(&self, c: &Candidate) -> f64 {
        c.recoil_energy * self.energy_scale(ShiftTarget::HadronEnergy)
    }

    pub fn trackless_recoil_energy(&self, c: &Candidate) -> f64 {
        c.trackless_recoil_energy * self.energy_scale(ShiftTarget::HadronEnergy)
    }

    pub fn track_energy(&self, track: &HadronTrack) -> f64 {
        track.energy * self.energy_scale(ShiftTarget::HadronEnergy)
    }

    pub fn tpi_trackless(&self, c: &Candidate) -> f64 {
        c.tpi_trackless * self.energy_scale(ShiftTarget::HadronEnergy)
    }

    pub fn enu(&self, c: &Candidate) -> f64 {
        self.emu(c) + self.recoil_energy(c)
    }

    pub fn q2(&self, c: &Candidate) -> f64 {
        q2(self.enu(c), self.emu(c), self.pmu(c), c.thetamu)
    }

    pub fn wexp(&self, c: &Candidate) -> f64 {
        wexp(self.enu(c), self.emu(c), self.q2(c))
    }

    pub fn trackless_enu(&self, c: &Candidate) -> f64 {
        self.emu(c) + self.trackless_recoil_energy(c)
    }

    pub fn trackless_q2(&self, c: &Candidate) -> f64 {
        q2(self.trackless_enu(c), self.emu(c), self.pmu(c), c.thetamu)
    }

    /// W_exp built from the calorimetric recoil instead of tracked hadrons.
    pub fn trackless_wexp(&self, c: &Candidate) -> f64 {
        wexp(self.trackless_enu(c), self.emu(c), self.trackless_q2(c))
    }
}

fn q2(enu: f64, emu: f64, pmu: f64, thetamu: f64) -> f64 {
    2.0 * enu * (emu - pmu * thetamu.cos()) - MUON_MASS * MUON_MASS
}

fn wexp(enu: f64, emu: f64, q2: f64) -> f64 {
    let w2 = NUCLEON_MASS * NUCLEON_MASS + 2.0 * NUCLEON_MASS * (enu - emu) - q2;
    w2.max(0.0).sqrt()
}

/// Universes sharing one systematic source.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorBand {
    pub name: String,
    pub universes: Vec<Universe>,
}

impl ErrorBand {
    pub fn is_vertical_only(&self) -> bool {
        self.universes.iter().all(Universe::is_vertical_only)
    }
}

/// Error bands in registration order, central value first.
#[derive(Clone, Debug, PartialEq)]
pub struct UniverseSet {
    bands: Vec<ErrorBand>,
}

impl Default for UniverseSet {
    fn default() -> Self {
        Self::cv_only()
    }
}

impl UniverseSet {
    pub fn cv_only() -> Self {
        UniverseSet {
            bands: vec![ErrorBand {
                name: CV_BAND.to_string(),
                universes: vec![Universe::cv()],
            }],
        }
    }

    pub fn from_config(config: &SystematicsConfig) -> Self {
        let mut set = Self::cv_only();
        if !config.enabled {
            return set;
        }
        for source in &config.sources {
            let universes = source
                .sigmas
                .iter()
                .enumerate()
                .map(|(i, &sigma)| match &source.shift {
                    SourceShift::Vertical { response } => {
                        Universe::vertical(&source.name, i, sigma, response)
                    }
                    SourceShift::Lateral { target, fraction } => {
                        Universe::lateral(&source.name, i, sigma, *target, *fraction)
                    }
                })
                .collect();
            set.bands.push(ErrorBand {
                name: source.name.clone(),
                universes,
            });
        }
        set
    }

    /// Bands that apply at generator level: lateral reconstruction shifts have no meaning there.
    pub fn truth_subset(&self) -> Self {
        UniverseSet {
            bands: self
                .bands
                .iter()
                .filter(|b| b.is_vertical_only())
                .cloned()
                .collect(),
        }
    }

    pub fn bands(&self) -> &[ErrorBand] {
        &self.bands
    }

    pub fn cv(&self) -> &Universe {
        &self.bands[0].universes[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Universe> {
        self.bands.iter().flat_map(|b| b.universes.iter())
    }

    pub fn n_universes(&self) -> usize {
        self.bands.iter().map(|b| b.universes.len()).sum()
    }

    /// Band name to universe count, in registration order.
    pub fn layout(&self) -> IndexMap<String, usize> {
        self.bands
            .iter()
            .map(|b| (b.name.clone(), b.universes.len()))
            .collect()
    }
}
