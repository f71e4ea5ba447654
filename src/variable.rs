//! Analysis variables and the histograms each one owns.

use std::collections::BTreeMap;

use tracing::warn;

use crate::{
    candidate::{Candidate, TruthInfo},
    config::SignalDefinition,
    error::Result,
    histogram::{Hist1D, Hist2D, UniverseHist},
    selection::Classification,
    store::HistogramStore,
    universe::{Universe, UniverseSet},
};

/// Name of the variable the sideband fit runs on.
pub const FIT_VARIABLE: &str = "wexp_fit";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quantity {
    Tpi,
    ThetapiDeg,
    Pmu,
    ThetamuDeg,
    Enu,
    Q2,
    Wexp,
    WexpFit,
    Ptmu,
    Pzmu,
}

impl Quantity {
    pub const ALL: [Quantity; 10] = [
        Quantity::Tpi,
        Quantity::ThetapiDeg,
        Quantity::Pmu,
        Quantity::ThetamuDeg,
        Quantity::Enu,
        Quantity::Q2,
        Quantity::Wexp,
        Quantity::WexpFit,
        Quantity::Ptmu,
        Quantity::Pzmu,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Quantity::Tpi => "tpi",
            Quantity::ThetapiDeg => "thetapi_deg",
            Quantity::Pmu => "pmu",
            Quantity::ThetamuDeg => "thetamu_deg",
            Quantity::Enu => "enu",
            Quantity::Q2 => "q2",
            Quantity::Wexp => "wexp",
            Quantity::WexpFit => FIT_VARIABLE,
            Quantity::Ptmu => "ptmu",
            Quantity::Pzmu => "pzmu",
        }
    }

    /// Bin edges in MeV, MeV^2 or degrees.
    pub fn edges(self) -> Vec<f64> {
        match self {
            Quantity::Tpi => vec![35., 68., 100., 133., 166., 200., 350.],
            Quantity::ThetapiDeg => {
                vec![0., 15., 30., 45., 60., 76., 108., 122., 136., 150., 165., 180.]
            }
            Quantity::Pmu | Quantity::Pzmu => vec![
                1500., 2000., 2500., 3000., 3500., 4000., 5000., 6000., 8000., 10000., 20000.,
            ],
            Quantity::ThetamuDeg => vec![
                0., 1., 2., 3., 4., 5., 6., 7., 8., 9., 10., 12., 14., 16., 20.,
            ],
            Quantity::Enu => vec![1500., 2000., 3000., 4000., 5000., 6000., 8000., 10000., 20000.],
            Quantity::Q2 => vec![
                0., 25e3, 50e3, 100e3, 200e3, 300e3, 400e3, 600e3, 800e3, 1000e3, 2000e3,
            ],
            Quantity::Wexp => vec![
                0., 300., 600., 800., 1000., 1100., 1200., 1300., 1400.,
            ],
            Quantity::WexpFit => (0..=32).map(|i| 100.0 * i as f64).collect(),
            Quantity::Ptmu => vec![
                0., 100., 200., 300., 400., 500., 600., 700., 800., 1000., 1250., 1500., 1800.,
            ],
        }
    }

    /// Bayesian unfolding iterations; unstable variables need more.
    pub fn unfolding_iterations(self) -> usize {
        match self {
            Quantity::Tpi
            | Quantity::ThetapiDeg
            | Quantity::Ptmu
            | Quantity::Q2
            | Quantity::Wexp => 10,
            _ => 4,
        }
    }

    /// Reconstructed value as read by `universe`.
    ///
    /// Pion kinematics come from the highest-energy pion candidate; candidates
    /// placed in the signal region or sideband by the trackless pipeline alone
    /// use the Michel-based T_pi and the calorimetric recoil, and have no pion
    /// angle.
    pub fn reco(self, c: &Candidate, u: &Universe, class: &Classification) -> Option<f64> {
        let trackless = class.uses_trackless();
        let pion = class.highest_energy_pion.and_then(|i| c.tracks.get(i));
        let value = match self {
            Quantity::Tpi if trackless => u.tpi_trackless(c),
            Quantity::Tpi => u.track_energy(pion?),
            Quantity::ThetapiDeg if trackless => return None,
            Quantity::ThetapiDeg => pion?.theta.to_degrees(),
            Quantity::Pmu => u.pmu(c),
            Quantity::ThetamuDeg => u.thetamu(c).to_degrees(),
            Quantity::Enu if trackless => u.trackless_enu(c),
            Quantity::Enu => u.enu(c),
            Quantity::Q2 if trackless => u.trackless_q2(c),
            Quantity::Q2 => u.q2(c),
            Quantity::Wexp | Quantity::WexpFit if trackless => u.trackless_wexp(c),
            Quantity::Wexp | Quantity::WexpFit => u.wexp(c),
            Quantity::Ptmu => u.ptmu(c),
            Quantity::Pzmu => u.pzmu(c),
        };
        Some(value)
    }

    pub fn truth(self, t: &TruthInfo) -> f64 {
        match self {
            Quantity::Tpi => t.tpi,
            Quantity::ThetapiDeg => t.thetapi.to_degrees(),
            Quantity::Pmu => t.pmu,
            Quantity::ThetamuDeg => t.thetamu.to_degrees(),
            Quantity::Enu => t.enu,
            Quantity::Q2 => t.q2,
            Quantity::Wexp | Quantity::WexpFit => t.wexp,
            Quantity::Ptmu => t.pmu * t.thetamu.sin(),
            Quantity::Pzmu => t.pmu * t.thetamu.cos(),
        }
    }
}

/// Truth-W background categories the sideband fit scales independently.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WCategory {
    LoW,
    MidW,
    HiW,
}

impl WCategory {
    pub const ALL: [WCategory; 3] = [WCategory::LoW, WCategory::MidW, WCategory::HiW];

    pub fn of(true_w: f64, signal: &SignalDefinition) -> Self {
        if true_w < signal.w_max {
            WCategory::LoW
        } else if true_w < signal.w_mid_max {
            WCategory::MidW
        } else {
            WCategory::HiW
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            WCategory::LoW => "loW",
            WCategory::MidW => "midW",
            WCategory::HiW => "hiW",
        }
    }

    pub fn background(self) -> Role {
        match self {
            WCategory::LoW => Role::BgLoW,
            WCategory::MidW => Role::BgMidW,
            WCategory::HiW => Role::BgHiW,
        }
    }

    pub fn sideband(self) -> Role {
        match self {
            WCategory::LoW => Role::SidebandLoW,
            WCategory::MidW => Role::SidebandMidW,
            WCategory::HiW => Role::SidebandHiW,
        }
    }
}

/// What a histogram of a [`HistogramSet`] holds. The prefix is the store name
/// stem, completed by `_<variable>`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    SelectionData,
    SelectionMc,
    Bg,
    BgLoW,
    BgMidW,
    BgHiW,
    SidebandData,
    SidebandSig,
    SidebandLoW,
    SidebandMidW,
    SidebandHiW,
    EffNum,
    EffDen,
    TunedBg,
    BgSubbedData,
    Unfolded,
    Efficiency,
    EfficiencyCorrected,
    CrossSection,
    McCrossSection,
}

impl Role {
    pub const MC_RECO: [Role; 9] = [
        Role::SelectionMc,
        Role::Bg,
        Role::BgLoW,
        Role::BgMidW,
        Role::BgHiW,
        Role::SidebandSig,
        Role::SidebandLoW,
        Role::SidebandMidW,
        Role::SidebandHiW,
    ];
    pub const DATA: [Role; 2] = [Role::SelectionData, Role::SidebandData];

    pub fn prefix(self) -> &'static str {
        match self {
            Role::SelectionData => "selection_data",
            Role::SelectionMc => "selection_mc",
            Role::Bg => "bg",
            Role::BgLoW => "bg_loW",
            Role::BgMidW => "bg_midW",
            Role::BgHiW => "bg_hiW",
            Role::SidebandData => "wsidebandfit_data",
            Role::SidebandSig => "wsidebandfit_sig",
            Role::SidebandLoW => "wsidebandfit_loW",
            Role::SidebandMidW => "wsidebandfit_midW",
            Role::SidebandHiW => "wsidebandfit_hiW",
            Role::EffNum => "effnum",
            Role::EffDen => "effden",
            Role::TunedBg => "tuned_bg",
            Role::BgSubbedData => "bg_subbed_data",
            Role::Unfolded => "unfolded",
            Role::Efficiency => "efficiency",
            Role::EfficiencyCorrected => "efficiency_corrected_data",
            Role::CrossSection => "cross_section",
            Role::McCrossSection => "mc_cross_section",
        }
    }
}

/// Per-role universe bundles owned by one variable.
#[derive(Clone, Debug, Default)]
pub struct HistogramSet {
    hists: BTreeMap<Role, UniverseHist<Hist1D>>,
    migration: Option<UniverseHist<Hist2D>>,
}

impl HistogramSet {
    pub fn get(&self, role: Role) -> Option<&UniverseHist<Hist1D>> {
        self.hists.get(&role)
    }

    pub fn get_mut(&mut self, role: Role) -> Option<&mut UniverseHist<Hist1D>> {
        self.hists.get_mut(&role)
    }

    pub fn insert(&mut self, role: Role, hist: UniverseHist<Hist1D>) {
        self.hists.insert(role, hist);
    }

    pub fn migration(&self) -> Option<&UniverseHist<Hist2D>> {
        self.migration.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &UniverseHist<Hist1D>)> {
        self.hists.iter().map(|(role, h)| (*role, h))
    }

    fn sync(&mut self) {
        self.hists.values_mut().for_each(UniverseHist::sync);
        if let Some(m) = self.migration.as_mut() {
            m.sync();
        }
    }
}

/// A named observable with its binning. Truth variables carry the `_true`
/// suffix and hold only the efficiency histograms.
#[derive(Clone, Debug)]
pub struct Variable {
    quantity: Quantity,
    is_true: bool,
    name: String,
    edges: Vec<f64>,
    pub hists: HistogramSet,
}

impl Variable {
    pub fn reco(quantity: Quantity) -> Self {
        Self::with_edges(quantity, false, quantity.edges())
    }

    pub fn truth(quantity: Quantity) -> Self {
        Self::with_edges(quantity, true, quantity.edges())
    }

    pub fn with_edges(quantity: Quantity, is_true: bool, edges: Vec<f64>) -> Self {
        let name = if is_true {
            format!("{}_true", quantity.name())
        } else {
            quantity.name().to_string()
        };
        Self {
            quantity,
            is_true,
            name,
            edges,
            hists: HistogramSet::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn is_true(&self) -> bool {
        self.is_true
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn n_bins(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }

    pub fn store_name(&self, role: Role) -> String {
        format!("{}_{}", role.prefix(), self.name)
    }

    fn migration_name(&self) -> String {
        format!("migration_{}", self.name)
    }

    /// Allocates the simulation histograms: reconstruction roles over every
    /// universe, the efficiency denominator over the truth universes.
    pub fn init_mc(&mut self, reco: &UniverseSet, truth: &UniverseSet) -> Result<()> {
        let proto = Hist1D::new(&self.edges)?;
        if self.is_true {
            self.hists.insert(
                Role::EffNum,
                UniverseHist::for_universes(self.store_name(Role::EffNum), proto.clone(), reco),
            );
            self.hists.insert(
                Role::EffDen,
                UniverseHist::for_universes(self.store_name(Role::EffDen), proto, truth),
            );
        } else {
            for role in Role::MC_RECO {
                self.hists.insert(
                    role,
                    UniverseHist::for_universes(self.store_name(role), proto.clone(), reco),
                );
            }
            self.hists.migration = Some(UniverseHist::for_universes(
                self.migration_name(),
                Hist2D::new(&self.edges, &self.edges)?,
                reco,
            ));
        }
        Ok(())
    }

    /// Allocates central-value-only data histograms.
    pub fn init_data(&mut self) -> Result<()> {
        if self.is_true {
            return Ok(());
        }
        let proto = Hist1D::new(&self.edges)?;
        for role in Role::DATA {
            self.hists
                .insert(role, UniverseHist::cv_only(self.store_name(role), proto.clone()));
        }
        Ok(())
    }

    fn fill_role(&mut self, role: Role, u: &Universe, x: f64, w: f64) -> Result<()> {
        match self.hists.get_mut(role) {
            Some(h) => h.fill(u, x, w),
            None => Ok(()),
        }
    }

    /// Fills the simulation histograms of one (candidate, universe) pair.
    pub fn fill_mc(
        &mut self,
        c: &Candidate,
        u: &Universe,
        class: &Classification,
        signal: &SignalDefinition,
    ) -> Result<()> {
        let Some(truth) = c.truth.as_ref() else {
            return Ok(());
        };
        let w = u.weight(c);
        let y = self.quantity.truth(truth);
        if self.is_true {
            if class.passes_all_cuts() && truth.is_signal {
                self.fill_role(Role::EffNum, u, y, w)?;
            }
            return Ok(());
        }
        let Some(x) = self.quantity.reco(c, u, class) else {
            return Ok(());
        };
        let category = WCategory::of(truth.wexp, signal);
        if class.passes_all_cuts() {
            self.fill_role(Role::SelectionMc, u, x, w)?;
            if truth.is_signal {
                if let Some(m) = self.hists.migration.as_mut() {
                    m.fill(u, x, y, w)?;
                }
            } else {
                self.fill_role(Role::Bg, u, x, w)?;
                self.fill_role(category.background(), u, x, w)?;
            }
        }
        if class.is_w_sideband() {
            let role = if truth.is_signal {
                Role::SidebandSig
            } else {
                category.sideband()
            };
            self.fill_role(role, u, x, w)?;
        }
        Ok(())
    }

    /// Fills the efficiency denominator from a generated-signal record.
    pub fn fill_truth(&mut self, c: &Candidate, u: &Universe) -> Result<()> {
        match c.truth.as_ref() {
            Some(truth) if self.is_true && truth.is_signal => {
                let y = self.quantity.truth(truth);
                self.fill_role(Role::EffDen, u, y, u.weight(c))
            }
            _ => Ok(()),
        }
    }

    pub fn fill_data(&mut self, c: &Candidate, u: &Universe, class: &Classification) -> Result<()> {
        if self.is_true {
            return Ok(());
        }
        let Some(x) = self.quantity.reco(c, u, class) else {
            return Ok(());
        };
        if class.passes_all_cuts() {
            self.fill_role(Role::SelectionData, u, x, c.weight)?;
        }
        if class.is_w_sideband() {
            self.fill_role(Role::SidebandData, u, x, c.weight)?;
        }
        Ok(())
    }

    pub fn sync(&mut self) {
        self.hists.sync();
    }

    pub fn write(&self, store: &mut HistogramStore) {
        for (_, hist) in self.hists.iter() {
            store.write_hist1d(hist.name(), hist.clone());
        }
        if let Some(m) = self.hists.migration() {
            store.write_hist2d(m.name(), m.clone());
        }
    }

    /// Reloads the simulation histograms written by [`Self::write`].
    pub fn load_mc(&mut self, store: &HistogramStore) -> Result<()> {
        let roles: &[Role] = if self.is_true {
            &[Role::EffNum, Role::EffDen]
        } else {
            &Role::MC_RECO
        };
        for &role in roles {
            let hist = store.read_hist1d(&self.store_name(role))?;
            self.hists.insert(role, hist);
        }
        if !self.is_true {
            self.hists.migration = Some(store.read_hist2d(&self.migration_name())?);
        }
        Ok(())
    }
}

/// Every analysis variable, optionally with its truth counterpart.
pub fn analysis_variables(include_truth: bool) -> Vec<Variable> {
    let mut variables: Vec<Variable> = Quantity::ALL.iter().map(|&q| Variable::reco(q)).collect();
    if include_truth {
        variables.extend(
            Quantity::ALL
                .iter()
                .filter(|&&q| q != Quantity::WexpFit)
                .map(|&q| Variable::truth(q)),
        );
    }
    variables
}

pub fn find_variable<'a>(variables: &'a [Variable], name: &str) -> Option<&'a Variable> {
    let found = variables.iter().find(|v| v.name() == name);
    if found.is_none() {
        warn!(name, "no such variable");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        candidate::HadronTrack,
        cuts::{TRACKED_CUTS, TRACKLESS_CUTS},
        histogram::find_bin,
        selection::{tests::selected, PipelineOutcome, Selector},
    };
    use approx::assert_relative_eq;

    fn tracked_signal() -> Classification {
        Classification {
            tracked: PipelineOutcome {
                passes_all_cuts: true,
                passes_all_except_w: true,
                is_w_sideband: false,
            },
            pion_candidates: vec![0, 1],
            highest_energy_pion: Some(1),
            ..Classification::default()
        }
    }

    fn mc_candidate(signal: bool, true_w: f64) -> Candidate {
        Candidate {
            pmu: 3000.0,
            thetamu: 0.1,
            recoil_energy: 300.0,
            tracks: vec![
                HadronTrack {
                    energy: 80.0,
                    theta: 0.2,
                    ..HadronTrack::default()
                },
                HadronTrack {
                    energy: 150.0,
                    theta: 0.5,
                    ..HadronTrack::default()
                },
            ],
            truth: Some(TruthInfo {
                is_signal: signal,
                wexp: true_w,
                tpi: 140.0,
                ..TruthInfo::default()
            }),
            ..Candidate::default()
        }
    }

    #[test]
    fn pion_quantities_follow_highest_energy_candidate() {
        let c = mc_candidate(true, 1200.0);
        let cv = Universe::cv();
        let class = tracked_signal();
        assert_eq!(Quantity::Tpi.reco(&c, &cv, &class), Some(150.0));
        assert_relative_eq!(
            Quantity::ThetapiDeg.reco(&c, &cv, &class).unwrap(),
            0.5f64.to_degrees()
        );
        let none = Classification::default();
        assert_eq!(Quantity::Tpi.reco(&c, &cv, &none), None);
    }

    #[test]
    fn truth_w_categories() {
        let signal = SignalDefinition::default();
        assert_eq!(WCategory::of(1399.0, &signal), WCategory::LoW);
        assert_eq!(WCategory::of(1400.0, &signal), WCategory::MidW);
        assert_eq!(WCategory::of(1800.0, &signal), WCategory::HiW);
    }

    #[test]
    fn mc_fill_routes_by_truth() {
        let signal = SignalDefinition::default();
        let universes = UniverseSet::cv_only();
        let mut tpi = Variable::reco(Quantity::Tpi);
        let mut tpi_true = Variable::truth(Quantity::Tpi);
        tpi.init_mc(&universes, &universes).unwrap();
        tpi_true.init_mc(&universes, &universes).unwrap();
        let cv = universes.cv();
        let class = tracked_signal();
        for c in [mc_candidate(true, 1200.0), mc_candidate(false, 1600.0)] {
            tpi.fill_mc(&c, cv, &class, &signal).unwrap();
            tpi_true.fill_mc(&c, cv, &class, &signal).unwrap();
            tpi_true.fill_truth(&c, cv).unwrap();
        }
        tpi.sync();
        tpi_true.sync();
        let integral = |v: &Variable, role| v.hists.get(role).unwrap().cv().integral();
        assert_eq!(integral(&tpi, Role::SelectionMc), 2.0);
        assert_eq!(integral(&tpi, Role::Bg), 1.0);
        assert_eq!(integral(&tpi, Role::BgMidW), 1.0);
        assert_eq!(integral(&tpi, Role::BgLoW), 0.0);
        assert_eq!(tpi.hists.migration().unwrap().cv().projection_y().integral(), 1.0);
        assert_eq!(integral(&tpi_true, Role::EffNum), 1.0);
        assert_eq!(integral(&tpi_true, Role::EffDen), 1.0);
        assert_eq!(tpi.store_name(Role::SelectionMc), "selection_mc_tpi");
        assert_eq!(tpi_true.store_name(Role::EffDen), "effden_tpi_true");
    }

    fn michel_signal(tracked: bool, untracked: bool) -> SignalDefinition {
        SignalDefinition {
            tracked_michel_reco: tracked,
            untracked_michel_reco: untracked,
            ..SignalDefinition::default()
        }
    }

    fn both_pipelines(signal: &SignalDefinition) -> Selector<'_> {
        Selector::with_cuts(signal, TRACKED_CUTS.to_vec(), TRACKLESS_CUTS.to_vec()).unwrap()
    }

    fn bin_of(var: &Variable, role: Role, x: f64) -> f64 {
        let bin = find_bin(var.edges(), x).unwrap();
        var.hists.get(role).unwrap().cv().content(bin)
    }

    fn with_truth(mut c: Candidate) -> Candidate {
        c.truth = Some(TruthInfo {
            is_signal: false,
            wexp: 1600.0,
            tpi: 150.0,
            ..TruthInfo::default()
        });
        c
    }

    #[test]
    fn untracked_sideband_reads_trackless_w() {
        let signal = michel_signal(false, true);
        let selector = both_pipelines(&signal);
        let cv = Universe::cv();
        let mut c = selected(900.0);
        c.recoil_energy = 300.0;
        let class = selector.classify(&c, &cv);
        assert!(class.is_w_sideband());
        assert!(class.uses_trackless());

        let filled = Quantity::WexpFit.reco(&c, &cv, &class).unwrap();
        assert_relative_eq!(filled, cv.trackless_wexp(&c));
        assert!((filled - cv.wexp(&c)).abs() > 300.0);

        let mut fit = Variable::reco(Quantity::WexpFit);
        fit.init_data().unwrap();
        fit.fill_data(&c, &cv, &class).unwrap();
        assert_eq!(bin_of(&fit, Role::SidebandData, cv.trackless_wexp(&c)), 1.0);
        assert_eq!(bin_of(&fit, Role::SidebandData, cv.wexp(&c)), 0.0);
    }

    #[test]
    fn trackless_candidates_fill_trackless_kinematics() {
        let universes = UniverseSet::cv_only();
        let cv = universes.cv();

        for (tracked, untracked) in [(false, true), (true, true)] {
            let signal = michel_signal(tracked, untracked);
            let selector = both_pipelines(&signal);
            let mut vars = [
                Quantity::Wexp,
                Quantity::WexpFit,
                Quantity::Tpi,
                Quantity::ThetapiDeg,
            ]
            .map(Variable::reco);
            for var in vars.iter_mut() {
                var.init_mc(&universes, &universes).unwrap();
                var.init_data().unwrap();
            }

            // signal region through the trackless pipeline only
            let mut sig = with_truth(selected(900.0));
            sig.trackless_recoil_energy = 300.0;
            let sig_class = selector.classify(&sig, cv);
            assert!(sig_class.is_trackless_signal());
            // sideband through the trackless pipeline; tracked W sits in the signal region
            let mut sb = with_truth(selected(300.0));
            sb.trackless_recoil_energy = 900.0;
            let sb_class = selector.classify(&sb, cv);

            for var in vars.iter_mut() {
                var.fill_mc(&sig, cv, &sig_class, &signal).unwrap();
                var.fill_data(&sig, cv, &sig_class).unwrap();
                if !tracked {
                    var.fill_mc(&sb, cv, &sb_class, &signal).unwrap();
                    var.fill_data(&sb, cv, &sb_class).unwrap();
                }
                var.sync();
            }

            let w_sig = cv.trackless_wexp(&sig);
            let [wexp, wexp_fit, tpi, thetapi] = &vars;
            assert_eq!(bin_of(wexp, Role::SelectionData, w_sig), 1.0);
            assert_eq!(bin_of(wexp, Role::SelectionMc, w_sig), 1.0);
            assert_eq!(bin_of(tpi, Role::SelectionData, sig.tpi_trackless), 1.0);
            let no_angle = |role| thetapi.hists.get(role).unwrap().cv().integral();
            assert_eq!(no_angle(Role::SelectionData), 0.0);
            assert_eq!(no_angle(Role::SelectionMc), 0.0);

            if tracked {
                // the tracked sideband never claims a trackless signal candidate
                assert!(sb_class.passes_all_cuts() && !sb_class.uses_trackless());
                let sideband = wexp_fit.hists.get(Role::SidebandData).unwrap();
                assert_eq!(sideband.cv().integral(), 0.0);
            } else {
                assert!(sb_class.is_w_sideband() && sb_class.uses_trackless());
                let w_sb = cv.trackless_wexp(&sb);
                assert_eq!(bin_of(wexp_fit, Role::SidebandData, w_sb), 1.0);
                assert_eq!(bin_of(wexp_fit, Role::SidebandMidW, w_sb), 1.0);
                assert_eq!(bin_of(wexp_fit, Role::SidebandData, cv.wexp(&sb)), 0.0);
            }
        }
    }

    #[test]
    fn catalogue_and_lookup() {
        let vars = analysis_variables(true);
        assert_eq!(vars.len(), 19);
        assert!(find_variable(&vars, "wexp_fit").is_some());
        assert!(find_variable(&vars, "wexp_fit_true").is_none());
        assert!(find_variable(&vars, "tpi_mbr").is_none());
        assert_eq!(Quantity::Q2.unfolding_iterations(), 10);
        assert_eq!(Quantity::Pmu.unfolding_iterations(), 4);
    }
}
