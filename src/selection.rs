//! Per-universe event classification.

use tracing::trace;

use crate::{
    candidate::Candidate,
    config::{MichelMode, SelectionConfig, SignalDefinition},
    cuts::{Cut, SelectionState},
    error::{Error, Result},
    universe::{Universe, UniverseKind, UniverseSet},
};

/// Aggregates of one pipeline. `passes_all_cuts` and `is_w_sideband` are never both set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub passes_all_cuts: bool,
    pub passes_all_except_w: bool,
    pub is_w_sideband: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classification {
    pub tracked: PipelineOutcome,
    pub trackless: PipelineOutcome,
    /// Track indices compatible with the pion hypothesis after the tracked pipeline.
    pub pion_candidates: Vec<usize>,
    pub highest_energy_pion: Option<usize>,
}

impl Classification {
    /// Signal region of the merged sample: either pipeline passes.
    pub fn passes_all_cuts(&self) -> bool {
        self.tracked.passes_all_cuts || self.trackless.passes_all_cuts
    }

    pub fn passes_all_except_w(&self) -> bool {
        self.tracked.passes_all_except_w || self.trackless.passes_all_except_w
    }

    /// Sideband of the merged sample. A candidate already in the signal
    /// region through one pipeline never enters the sideband through the other.
    pub fn is_w_sideband(&self) -> bool {
        !self.passes_all_cuts() && (self.tracked.is_w_sideband || self.trackless.is_w_sideband)
    }

    /// True when the signal-region entry came from the trackless pipeline alone.
    pub fn is_trackless_signal(&self) -> bool {
        self.trackless.passes_all_cuts && !self.tracked.passes_all_cuts
    }

    /// True when the trackless pipeline placed the candidate in its region,
    /// signal or sideband, so its kinematics must be read the trackless way.
    pub fn uses_trackless(&self) -> bool {
        !self.tracked.passes_all_cuts
            && (self.trackless.passes_all_cuts
                || (!self.tracked.is_w_sideband && self.trackless.is_w_sideband))
    }
}

/// Highest-energy member of `indices` as read by `universe`.
///
/// Exact ties keep the earliest index in `indices`.
pub fn highest_energy_pion(
    candidate: &Candidate,
    universe: &Universe,
    indices: &[usize],
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &i in indices {
        let Some(track) = candidate.tracks.get(i) else {
            continue;
        };
        let energy = universe.track_energy(track);
        if best.map_or(true, |(_, e)| energy > e) {
            best = Some((i, energy));
        }
    }
    best.map(|(i, _)| i)
}

pub struct Selector<'a> {
    signal: &'a SignalDefinition,
    mode: MichelMode,
    tracked: Vec<Cut>,
    trackless: Vec<Cut>,
}

impl<'a> Selector<'a> {
    pub fn new(signal: &'a SignalDefinition, selection: &SelectionConfig) -> Result<Self> {
        Self::with_cuts(signal, selection.tracked()?, selection.trackless()?)
    }

    pub fn with_cuts(
        signal: &'a SignalDefinition,
        tracked: Vec<Cut>,
        trackless: Vec<Cut>,
    ) -> Result<Self> {
        signal.validate()?;
        if tracked.contains(&Cut::UntrackedWexp) || trackless.contains(&Cut::Wexp) {
            return Err(Error::Configuration(
                "W cut assigned to the wrong reconstruction pipeline".into(),
            ));
        }
        Ok(Self {
            signal,
            mode: signal.michel_mode()?,
            tracked,
            trackless,
        })
    }

    pub fn signal(&self) -> &SignalDefinition {
        self.signal
    }

    pub fn mode(&self) -> MichelMode {
        self.mode
    }

    /// Cut list of the pipeline that drives the cut-flow table.
    pub fn active_cuts(&self) -> &[Cut] {
        if self.mode.tracked() {
            &self.tracked
        } else {
            &self.trackless
        }
    }

    fn run(
        &self,
        cuts: &[Cut],
        w: f64,
        c: &Candidate,
        u: &Universe,
    ) -> (PipelineOutcome, SelectionState) {
        let mut state = SelectionState::default();
        let mut all = true;
        let mut except_w = true;
        for cut in cuts {
            let pass = cut.passes(c, u, self.signal, &mut state);
            if cut.is_w_cut() {
                all &= pass;
            } else if !pass {
                all = false;
                except_w = false;
                break;
            }
        }
        let outcome = PipelineOutcome {
            passes_all_cuts: all,
            passes_all_except_w: except_w,
            is_w_sideband: except_w
                && !all
                && w >= self.signal.w_max
                && w >= self.signal.w_sideband_min,
        };
        (outcome, state)
    }

    pub fn classify(&self, candidate: &Candidate, universe: &Universe) -> Classification {
        let mut classification = Classification::default();
        if self.mode.tracked() {
            let w = universe.wexp(candidate);
            let (outcome, state) = self.run(&self.tracked, w, candidate, universe);
            classification.tracked = outcome;
            classification.pion_candidates = state.pion_candidates().to_vec();
            classification.highest_energy_pion =
                highest_energy_pion(candidate, universe, &classification.pion_candidates);
        }
        if self.mode.untracked() {
            let w = universe.trackless_wexp(candidate);
            let (outcome, _) = self.run(&self.trackless, w, candidate, universe);
            classification.trackless = outcome;
        }
        classification
    }

    /// Number of leading cuts of [`Self::active_cuts`] the candidate survives.
    pub fn survived_cuts(&self, candidate: &Candidate, universe: &Universe) -> usize {
        let mut state = SelectionState::default();
        self.active_cuts()
            .iter()
            .take_while(|cut| cut.passes(candidate, universe, self.signal, &mut state))
            .count()
    }

    /// Classifies `candidate` in every universe of `set`, in registration order.
    ///
    /// The central value is classified first and shared with every vertical
    /// universe; lateral universes are classified from scratch. Returns the
    /// number of classifications actually computed.
    pub fn for_each_universe<F>(
        &self,
        candidate: &Candidate,
        set: &UniverseSet,
        mut f: F,
    ) -> Result<usize>
    where
        F: FnMut(&Universe, &Classification) -> Result<()>,
    {
        let cv = self.classify(candidate, set.cv());
        let mut computed = 1;
        for universe in set.iter() {
            match universe.kind() {
                UniverseKind::Vertical => f(universe, &cv)?,
                UniverseKind::Lateral => {
                    computed += 1;
                    let own = self.classify(candidate, universe);
                    f(universe, &own)?;
                }
            }
        }
        trace!(entry = candidate.entry, computed, "classified candidate");
        Ok(computed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        candidate::HadronTrack,
        config::SystematicsConfig,
        cuts::{TRACKED_CUTS, TRACKLESS_CUTS},
        universe::ShiftTarget,
    };
    use proptest::prelude::*;

    /// A candidate passing every tracked and trackless cut except W, with
    /// `recoil` setting W_exp (300 -> ~1160, 700 -> ~1440, 900 -> ~1565 MeV).
    pub(crate) fn selected(recoil: f64) -> Candidate {
        Candidate {
            passes_precuts: true,
            pmu: 3000.0,
            thetamu: 0.1,
            recoil_energy: recoil,
            trackless_recoil_energy: recoil,
            vtx: [0.0, 0.0, 7000.0],
            minos_match: true,
            minos_qp: -1.0,
            tracks: vec![HadronTrack {
                energy: 150.0,
                theta: 0.6,
                llr: 1.0,
                node_energy: 50.0,
                has_michel: true,
            }],
            n_michels: 1,
            best_michel_distance: 50.0,
            closest_michel: true,
            tpi_trackless: 150.0,
            ..Candidate::default()
        }
    }

    fn signal_with(tracked: bool, untracked: bool) -> SignalDefinition {
        SignalDefinition {
            tracked_michel_reco: tracked,
            untracked_michel_reco: untracked,
            ..SignalDefinition::default()
        }
    }

    fn selector(signal: &SignalDefinition) -> Selector<'_> {
        Selector::with_cuts(signal, TRACKED_CUTS.to_vec(), TRACKLESS_CUTS.to_vec()).unwrap()
    }

    #[test]
    fn w_regions_of_tracked_pipeline() {
        let signal = signal_with(true, false);
        let sel = selector(&signal);
        let cv = Universe::cv();

        let sig = sel.classify(&selected(300.0), &cv);
        assert!(sig.passes_all_cuts() && !sig.is_w_sideband());
        assert_eq!(sig.highest_energy_pion, Some(0));

        let gap = sel.classify(&selected(700.0), &cv);
        assert!(gap.passes_all_except_w() && !gap.passes_all_cuts() && !gap.is_w_sideband());

        let sb = sel.classify(&selected(900.0), &cv);
        assert!(sb.is_w_sideband() && !sb.passes_all_cuts());
        assert_eq!(sb.trackless, PipelineOutcome::default());
    }

    #[test]
    fn only_untracked_forces_tracked_outputs_false() {
        let signal = signal_with(false, true);
        let sel = selector(&signal);
        let c = sel.classify(&selected(300.0), &Universe::cv());
        assert_eq!(c.tracked, PipelineOutcome::default());
        assert!(c.trackless.passes_all_cuts);
        assert!(c.is_trackless_signal());
        assert!(c.pion_candidates.is_empty());
    }

    #[test]
    fn both_modes_count_a_candidate_once() {
        let signal = signal_with(true, true);
        let sel = selector(&signal);
        let mut c = selected(900.0);
        // trackless W stays in the signal region while tracked W is in the sideband
        c.trackless_recoil_energy = 300.0;
        let class = sel.classify(&c, &Universe::cv());
        assert!(class.tracked.is_w_sideband);
        assert!(class.trackless.passes_all_cuts);
        assert!(class.passes_all_cuts());
        assert!(!class.is_w_sideband());
    }

    #[test]
    fn failing_early_cut_rejects() {
        let signal = SignalDefinition::default();
        let sel = selector(&signal);
        let mut c = selected(300.0);
        c.minos_qp = 1.0;
        let class = sel.classify(&c, &Universe::cv());
        assert!(!class.passes_all_except_w() && !class.is_w_sideband());
        assert_eq!(sel.survived_cuts(&c, &Universe::cv()), 3);
        assert_eq!(
            sel.survived_cuts(&selected(300.0), &Universe::cv()),
            TRACKED_CUTS.len()
        );
    }

    #[test]
    fn tie_keeps_first_candidate() {
        let mut c = selected(300.0);
        let mut twin = c.tracks[0].clone();
        twin.theta = 1.2;
        c.tracks.push(twin);
        assert_eq!(highest_energy_pion(&c, &Universe::cv(), &[0, 1]), Some(0));
        c.tracks[1].energy = 151.0;
        assert_eq!(highest_energy_pion(&c, &Universe::cv(), &[0, 1]), Some(1));
        assert_eq!(highest_energy_pion(&c, &Universe::cv(), &[]), None);
    }

    #[test]
    fn vertical_universes_share_cv_classification() {
        let signal = SignalDefinition::default();
        let sel = selector(&signal);
        let set = UniverseSet::from_config(&SystematicsConfig::default());
        let cv = sel.classify(&selected(300.0), set.cv());
        let mut seen = 0;
        let computed = sel
            .for_each_universe(&selected(300.0), &set, |u, class| {
                seen += 1;
                if u.is_vertical_only() {
                    assert_eq!(class, &cv);
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, set.n_universes());
        // cv plus the four lateral universes
        assert_eq!(computed, 5);
    }

    #[test]
    fn lateral_universe_reclassifies() {
        let signal = signal_with(true, false);
        let sel = selector(&signal);
        let c = selected(600.0);
        assert!(sel.classify(&c, &Universe::cv()).passes_all_cuts());
        let up = Universe::lateral("Hadron_Energy", 1, 1.0, ShiftTarget::HadronEnergy, 0.2);
        assert!(!sel.classify(&c, &up).passes_all_cuts());
    }

    proptest! {
        #[test]
        fn regions_are_mutually_exclusive(
            recoil in 0.0..3000.0f64,
            trackless_recoil in 0.0..3000.0f64,
            pmu in 1000.0..8000.0f64,
            thetamu in 0.0..0.5f64,
            n_michels in 0u32..3,
            energies in proptest::collection::vec(0.0..500.0f64, 0..4),
        ) {
            let signal = signal_with(true, true);
            let sel = selector(&signal);
            let mut c = selected(recoil);
            c.trackless_recoil_energy = trackless_recoil;
            c.pmu = pmu;
            c.thetamu = thetamu;
            c.n_michels = n_michels;
            c.tracks = energies
                .iter()
                .map(|&energy| HadronTrack { energy, ..c.tracks[0].clone() })
                .collect();
            let class = sel.classify(&c, &Universe::cv());
            for outcome in [&class.tracked, &class.trackless] {
                prop_assert!(!(outcome.passes_all_cuts && outcome.is_w_sideband));
            }
            prop_assert!(!(class.passes_all_cuts() && class.is_w_sideband()));
        }
    }
}
