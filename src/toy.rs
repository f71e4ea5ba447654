//! Toy single-pion samples drawn by accept/reject.

use std::f64::consts::PI;

use rand::{distributions::Uniform, rngs::StdRng, Rng, SeedableRng};

use crate::{
    candidate::{Candidate, CandidateTable, HadronTrack, TruthInfo},
    universe::{MUON_MASS, NUCLEON_MASS},
};

/// Generated interactions per unit of exposure.
pub const EVENTS_PER_POT: f64 = 1.0e-17;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Channel {
    Signal,
    LowWBackground,
    MidWBackground,
    HighWBackground,
}

impl Channel {
    const FRACTIONS: [(Channel, f64); 4] = [
        (Channel::Signal, 0.5),
        (Channel::LowWBackground, 0.15),
        (Channel::MidWBackground, 0.2),
        (Channel::HighWBackground, 0.15),
    ];
}

pub struct ToySample {
    pub reco: CandidateTable,
    /// Generator-level records of every interaction; empty for data.
    pub truth: CandidateTable,
    pub pot: f64,
}

pub struct ToyGenerator {
    rng: StdRng,
}

impl ToyGenerator {
    const PMU_BOUNDS: (f64, f64) = (1500.0, 20000.0);
    const THETAMU_BOUNDS: (f64, f64) = (0.0, 0.35);
    const TPI_BOUNDS: (f64, f64) = (35.0, 350.0);
    const DELTA_MASS: f64 = 1232.0;
    const DELTA_WIDTH: f64 = 117.0;

    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn generate(&mut self, n: usize, with_truth: bool) -> ToySample {
        let mut reco = Vec::with_capacity(n);
        let mut truth = Vec::new();
        for entry in 0..n {
            let channel = self.gen_channel();
            let mut candidate = self.gen_candidate(entry, channel);
            if with_truth {
                truth.push(Candidate {
                    entry,
                    weight: candidate.weight,
                    responses: candidate.responses.clone(),
                    truth: candidate.truth.clone(),
                    ..Candidate::default()
                });
            } else {
                candidate.truth = None;
                candidate.responses.clear();
            }
            reco.push(candidate);
        }
        ToySample {
            reco: CandidateTable::new(reco),
            truth: CandidateTable::new(truth),
            pot: n as f64 / EVENTS_PER_POT,
        }
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        self.rng.sample(Uniform::new(lo, hi))
    }

    fn accept_reject(&mut self, bounds: (f64, f64), p_max: f64, p: impl Fn(f64) -> f64) -> f64 {
        loop {
            let x_star = self.uniform(bounds.0, bounds.1);
            if p(x_star) >= self.uniform(0.0, p_max) {
                return x_star;
            }
        }
    }

    /// Standard normal truncated at three sigma.
    fn gen_gauss(&mut self) -> f64 {
        self.accept_reject((-3.0, 3.0), 1.0, |g| f64::exp(-0.5 * g * g))
    }

    fn gen_channel(&mut self) -> Channel {
        let u = self.uniform(0.0, 1.0);
        let mut cumulative = 0.0;
        for (channel, fraction) in Channel::FRACTIONS {
            cumulative += fraction;
            if u < cumulative {
                return channel;
            }
        }
        Channel::HighWBackground
    }

    fn gen_w(&mut self, channel: Channel) -> f64 {
        let breit_wigner = |w: f64| {
            let half = ToyGenerator::DELTA_WIDTH / 2.0;
            half * half / ((w - ToyGenerator::DELTA_MASS).powi(2) + half * half)
        };
        match channel {
            Channel::Signal | Channel::LowWBackground => {
                self.accept_reject((1080.0, 1400.0), 1.0, breit_wigner)
            }
            Channel::MidWBackground => self.uniform(1400.0, 1800.0),
            Channel::HighWBackground => {
                self.accept_reject((1800.0, 2800.0), 1.0, |w| f64::exp(-(w - 1800.0) / 400.0))
            }
        }
    }

    fn gen_candidate(&mut self, entry: usize, channel: Channel) -> Candidate {
        let pmu = self.accept_reject(Self::PMU_BOUNDS, 1.0, |p| f64::exp(-(p - 1500.0) / 4000.0));
        let thetamu = self.accept_reject(Self::THETAMU_BOUNDS, 0.03, |t| {
            f64::sin(t) * f64::exp(-t / 0.08)
        });
        let w = self.gen_w(channel);
        let tpi = self.accept_reject(Self::TPI_BOUNDS, 30.0, |t| t * f64::exp(-t / 80.0));
        let thetapi = self.accept_reject((0.0, PI), 1.0, f64::sin);

        // energy transfer reproducing W at this muon kinematics
        let emu = pmu.hypot(MUON_MASS);
        let k = emu - pmu * thetamu.cos();
        let nu = (w * w - NUCLEON_MASS * NUCLEON_MASS + 2.0 * emu * k - MUON_MASS * MUON_MASS)
            / (2.0 * (NUCLEON_MASS - k));
        let enu = emu + nu;
        let q2 = 2.0 * enu * k - MUON_MASS * MUON_MASS;

        let recoil_smear = match channel {
            // missed or extra hadronic energy
            Channel::LowWBackground => self.uniform(0.8, 2.2),
            _ => 1.0 + 0.08 * self.gen_gauss(),
        };
        let recoil = nu * recoil_smear;
        let mut tracks = vec![self.gen_track(tpi, thetapi)];
        if channel == Channel::HighWBackground && self.uniform(0.0, 1.0) < 0.4 {
            let extra_tpi = self.accept_reject(Self::TPI_BOUNDS, 30.0, |t| t * f64::exp(-t / 80.0));
            tracks.push(self.gen_track(extra_tpi, thetapi));
        }
        let has_michel = tracks.iter().any(|t| t.has_michel);

        let is_signal = channel == Channel::Signal;
        let mut responses = std::collections::BTreeMap::new();
        responses.insert("flux".to_string(), 0.05 + 0.05 * enu / 10000.0);
        responses.insert(
            "genie_mares".to_string(),
            if matches!(channel, Channel::Signal | Channel::LowWBackground) {
                0.2
            } else {
                0.05
            },
        );
        let qp_sign = if self.uniform(0.0, 1.0) < 0.95 { -1.0 } else { 1.0 };

        Candidate {
            entry,
            weight: 1.0,
            passes_precuts: self.uniform(0.0, 1.0) < 0.97,
            pmu: pmu * (1.0 + 0.03 * self.gen_gauss()),
            thetamu: (thetamu + 0.002 * self.gen_gauss()).abs(),
            recoil_energy: recoil,
            trackless_recoil_energy: nu * (1.0 + 0.15 * self.gen_gauss()),
            vtx: [
                self.uniform(-950.0, 950.0),
                self.uniform(-950.0, 950.0),
                self.uniform(5800.0, 8500.0),
            ],
            n_iso_prongs: if self.uniform(0.0, 1.0) < 0.9 { 0 } else { 2 },
            minos_match: self.uniform(0.0, 1.0) < 0.85,
            minos_qp: qp_sign * self.uniform(0.05, 1.0),
            tracks,
            n_michels: u32::from(has_michel),
            best_michel_distance: self.uniform(0.0, 300.0),
            closest_michel: has_michel,
            tpi_trackless: tpi * (1.0 + 0.2 * self.gen_gauss()),
            responses,
            truth: Some(TruthInfo {
                is_signal,
                wexp: w,
                tpi,
                thetapi,
                pmu,
                thetamu,
                enu,
                q2,
            }),
        }
    }

    fn gen_track(&mut self, tpi: f64, thetapi: f64) -> HadronTrack {
        HadronTrack {
            energy: (tpi * (1.0 + 0.1 * self.gen_gauss())).max(0.0),
            theta: (thetapi + 0.05 * self.gen_gauss()).clamp(0.0, PI),
            llr: 2.0 + self.gen_gauss(),
            node_energy: self.uniform(0.0, 180.0),
            has_michel: self.uniform(0.0, 1.0) < 0.9,
        }
    }
}
