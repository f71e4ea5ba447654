//! The ordered selection cuts.

use std::{fmt, str::FromStr};

use crate::{
    candidate::Candidate,
    config::{SignalDefinition, SignalKind},
    error::{Error, Result},
    universe::Universe,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cut {
    NoCuts,
    Precuts,
    Vtx,
    MinosMuon,
    AtLeastOnePionCandidateTrack,
    AtLeastOneMichel,
    Llr,
    Node,
    Wexp,
    IsoProngs,
    PionMult,
    Thetamu,
    Pmu,
    HasMichel,
    BestMichelDistance,
    ClosestMichel,
    OneMichel,
    Tpi,
    PTmu,
    UntrackedWexp,
}

/// Default tracked selection, in evaluation order.
pub const TRACKED_CUTS: [Cut; 13] = [
    Cut::NoCuts,
    Cut::Precuts,
    Cut::Vtx,
    Cut::MinosMuon,
    Cut::AtLeastOnePionCandidateTrack,
    Cut::AtLeastOneMichel,
    Cut::Llr,
    Cut::Node,
    Cut::Wexp,
    Cut::IsoProngs,
    Cut::PionMult,
    Cut::Thetamu,
    Cut::Pmu,
];

/// Default selection for events reconstructed without hadron tracks.
pub const TRACKLESS_CUTS: [Cut; 14] = [
    Cut::NoCuts,
    Cut::Precuts,
    Cut::Vtx,
    Cut::MinosMuon,
    Cut::HasMichel,
    Cut::BestMichelDistance,
    Cut::ClosestMichel,
    Cut::OneMichel,
    Cut::Tpi,
    Cut::IsoProngs,
    Cut::Thetamu,
    Cut::Pmu,
    Cut::PTmu,
    Cut::UntrackedWexp,
];

impl Cut {
    pub const ALL: [Cut; 20] = [
        Cut::NoCuts,
        Cut::Precuts,
        Cut::Vtx,
        Cut::MinosMuon,
        Cut::AtLeastOnePionCandidateTrack,
        Cut::AtLeastOneMichel,
        Cut::Llr,
        Cut::Node,
        Cut::Wexp,
        Cut::IsoProngs,
        Cut::PionMult,
        Cut::Thetamu,
        Cut::Pmu,
        Cut::HasMichel,
        Cut::BestMichelDistance,
        Cut::ClosestMichel,
        Cut::OneMichel,
        Cut::Tpi,
        Cut::PTmu,
        Cut::UntrackedWexp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Cut::NoCuts => "No Cuts",
            Cut::Precuts => "Anatool Precuts",
            Cut::Vtx => "vertex position Cut",
            Cut::MinosMuon => "MINOS Muon",
            Cut::AtLeastOnePionCandidateTrack => ">= 1 Hadron Track",
            Cut::AtLeastOneMichel => ">= 1 Michel",
            Cut::Llr => "LLR PID",
            Cut::Node => "Node",
            Cut::Wexp => "Tracked W_exp",
            Cut::IsoProngs => "< 2 Isolated Prongs",
            Cut::PionMult => "Pion Multiplicity",
            Cut::Thetamu => "theta_mu < 20 degrees",
            Cut::Pmu => "1.5 GeV < Pmu < 20 GeV",
            Cut::HasMichel => "Untracked Has Michel",
            Cut::BestMichelDistance => "Best Michel Distance",
            Cut::ClosestMichel => "Closest Michel",
            Cut::OneMichel => "One michel",
            Cut::Tpi => "T_pi < 350 MeV",
            Cut::PTmu => "Ptmu < 1.8 GeV",
            Cut::UntrackedWexp => "Untracked W_exp",
        }
    }

    pub fn identifier(self) -> &'static str {
        match self {
            Cut::NoCuts => "no_cuts",
            Cut::Precuts => "precuts",
            Cut::Vtx => "vtx",
            Cut::MinosMuon => "minos_muon",
            Cut::AtLeastOnePionCandidateTrack => "at_least_one_pion_candidate_track",
            Cut::AtLeastOneMichel => "at_least_one_michel",
            Cut::Llr => "llr",
            Cut::Node => "node",
            Cut::Wexp => "wexp",
            Cut::IsoProngs => "iso_prongs",
            Cut::PionMult => "pion_mult",
            Cut::Thetamu => "thetamu",
            Cut::Pmu => "pmu",
            Cut::HasMichel => "has_michel",
            Cut::BestMichelDistance => "best_michel_distance",
            Cut::ClosestMichel => "closest_michel",
            Cut::OneMichel => "one_michel",
            Cut::Tpi => "tpi",
            Cut::PTmu => "ptmu",
            Cut::UntrackedWexp => "untracked_wexp",
        }
    }

    /// The discriminating cut excluded to define the sideband.
    pub fn is_w_cut(self) -> bool {
        matches!(self, Cut::Wexp | Cut::UntrackedWexp)
    }

    pub fn passes(
        self,
        candidate: &Candidate,
        universe: &Universe,
        signal: &SignalDefinition,
        state: &mut SelectionState,
    ) -> bool {
        match self {
            Cut::NoCuts => true,
            Cut::Precuts => candidate.passes_precuts,
            Cut::Vtx => {
                let [x, y, z] = candidate.vtx;
                in_hexagon(x, y, signal.apothem) && z > signal.z_vtx_min && z < signal.z_vtx_max
            }
            Cut::MinosMuon => candidate.minos_match && candidate.minos_qp < 0.0,
            Cut::AtLeastOnePionCandidateTrack => {
                state.pion_candidates = Some((0..candidate.tracks.len()).collect());
                !candidate.tracks.is_empty()
            }
            Cut::AtLeastOneMichel => state.retain(candidate, |t| t.has_michel),
            Cut::Llr => state.retain(candidate, |t| t.llr > signal.llr_min),
            Cut::Node => state.retain(candidate, |t| t.node_energy < signal.node_max),
            Cut::Wexp => universe.wexp(candidate) < signal.w_max,
            Cut::IsoProngs => candidate.n_iso_prongs < signal.iso_prongs_max,
            Cut::PionMult => {
                let n = state.candidates(candidate).len();
                match signal.kind {
                    SignalKind::OnePi | SignalKind::OnePiTh => n == 1,
                    SignalKind::NPi => n >= 1,
                }
            }
            Cut::Thetamu => universe.thetamu(candidate) < signal.thetamu_max,
            Cut::Pmu => {
                let pmu = universe.pmu(candidate);
                pmu > signal.pmu_min && pmu < signal.pmu_max
            }
            Cut::HasMichel => candidate.n_michels >= 1,
            Cut::BestMichelDistance => candidate.best_michel_distance < signal.michel_distance_max,
            Cut::ClosestMichel => candidate.closest_michel,
            Cut::OneMichel => candidate.n_michels == 1,
            Cut::Tpi => {
                let tpi = universe.tpi_trackless(candidate);
                tpi > signal.tpi_min && tpi < signal.tpi_max
            }
            Cut::PTmu => universe.ptmu(candidate) < signal.ptmu_max,
            Cut::UntrackedWexp => {
                let w = universe.trackless_wexp(candidate);
                w > 0.0 && w < signal.w_max
            }
        }
    }
}

impl fmt::Display for Cut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Cut {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Cut::ALL
            .into_iter()
            .find(|cut| cut.identifier() == s)
            .ok_or_else(|| Error::Configuration(format!("unknown cut identifier {s:?}")))
    }
}

pub fn parse_cut_list<S: AsRef<str>>(identifiers: &[S]) -> Result<Vec<Cut>> {
    identifiers.iter().map(|s| s.as_ref().parse()).collect()
}

/// The full list minus the W cut, order preserved.
pub fn sideband_cuts(cuts: &[Cut]) -> Vec<Cut> {
    cuts.iter().copied().filter(|c| !c.is_w_cut()).collect()
}

/// Regular hexagon with two edges parallel to the y axis.
pub fn in_hexagon(x: f64, y: f64, apothem: f64) -> bool {
    x.abs() <= apothem && x.abs() + 3f64.sqrt() * y.abs() <= 2.0 * apothem
}

/// Running per-event state threaded through the cut list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionState {
    pion_candidates: Option<Vec<usize>>,
}

impl SelectionState {
    fn candidates(&self, candidate: &Candidate) -> Vec<usize> {
        self.pion_candidates
            .clone()
            .unwrap_or_else(|| (0..candidate.tracks.len()).collect())
    }

    fn retain(
        &mut self,
        candidate: &Candidate,
        keep: impl Fn(&crate::candidate::HadronTrack) -> bool,
    ) -> bool {
        let kept: Vec<usize> = self
            .candidates(candidate)
            .into_iter()
            .filter(|&i| keep(&candidate.tracks[i]))
            .collect();
        let any = !kept.is_empty();
        self.pion_candidates = Some(kept);
        any
    }

    pub fn pion_candidates(&self) -> &[usize] {
        self.pion_candidates.as_deref().unwrap_or(&[])
    }
}
