//! Reconstructed interaction candidates and the sources that serve them.
//!
//! Candidates are stored as two CSV tables: one row per event
//! (`entry`, muon kinematics, vertex, Michel information, per-source
//! systematic responses prefixed `resp_`, truth columns prefixed `true_`)
//! and one row per reconstructed hadron track keyed by `entry`.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    path::{Path, PathBuf},
};

use polars::prelude::*;

use crate::error::{Error, Result};

const RESPONSE_PREFIX: &str = "resp_";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HadronTrack {
    /// Kinetic energy under the pion hypothesis (MeV).
    pub energy: f64,
    pub theta: f64,
    /// Log-likelihood-ratio pion score.
    pub llr: f64,
    pub node_energy: f64,
    pub has_michel: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TruthInfo {
    pub is_signal: bool,
    pub wexp: f64,
    pub tpi: f64,
    pub thetapi: f64,
    pub pmu: f64,
    pub thetamu: f64,
    pub enu: f64,
    pub q2: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub entry: usize,
    /// Central-value event weight.
    pub weight: f64,
    pub passes_precuts: bool,
    pub pmu: f64,
    pub thetamu: f64,
    pub recoil_energy: f64,
    /// Calorimetric recoil used by the trackless W proxy.
    pub trackless_recoil_energy: f64,
    pub vtx: [f64; 3],
    pub n_iso_prongs: u32,
    pub minos_match: bool,
    pub minos_qp: f64,
    pub tracks: Vec<HadronTrack>,
    pub n_michels: u32,
    pub best_michel_distance: f64,
    pub closest_michel: bool,
    pub tpi_trackless: f64,
    /// Fractional weight responses keyed by systematic response name.
    pub responses: BTreeMap<String, f64>,
    pub truth: Option<TruthInfo>,
}

impl Default for Candidate {
    fn default() -> Self {
        Candidate {
            entry: 0,
            weight: 1.0,
            passes_precuts: false,
            pmu: 0.0,
            thetamu: 0.0,
            recoil_energy: 0.0,
            trackless_recoil_energy: 0.0,
            vtx: [0.0; 3],
            n_iso_prongs: 0,
            minos_match: false,
            minos_qp: 0.0,
            tracks: Vec::new(),
            n_michels: 0,
            best_michel_distance: f64::INFINITY,
            closest_michel: false,
            tpi_trackless: 0.0,
            responses: BTreeMap::new(),
            truth: None,
        }
    }
}

impl Candidate {
    pub fn response(&self, name: &str) -> f64 {
        self.responses.get(name).copied().unwrap_or(0.0)
    }

    pub fn is_mc(&self) -> bool {
        self.truth.is_some()
    }

    /// Named scalar lookup over the raw record.
    pub fn field(&self, key: &str) -> Option<f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let value = match key {
            "weight" => self.weight,
            "pmu" => self.pmu,
            "thetamu" => self.thetamu,
            "recoil_energy" => self.recoil_energy,
            "trackless_recoil_energy" => self.trackless_recoil_energy,
            "vtx_x" => self.vtx[0],
            "vtx_y" => self.vtx[1],
            "vtx_z" => self.vtx[2],
            "n_iso_prongs" => self.n_iso_prongs as f64,
            "minos_match" => flag(self.minos_match),
            "minos_qp" => self.minos_qp,
            "n_michels" => self.n_michels as f64,
            "best_michel_distance" => self.best_michel_distance,
            "closest_michel" => flag(self.closest_michel),
            "tpi_trackless" => self.tpi_trackless,
            "n_tracks" => self.tracks.len() as f64,
            other => match other.strip_prefix(RESPONSE_PREFIX) {
                Some(name) => return self.responses.get(name).copied(),
                None => return None,
            },
        };
        Some(value)
    }
}

/// Random-access, read-only stream of candidates.
pub trait CandidateSource {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn read(&self, index: usize) -> Result<Candidate>;
}

/// Candidates held in memory, in entry order.
#[derive(Clone, Debug, Default)]
pub struct CandidateTable {
    candidates: Vec<Candidate>,
}

impl CandidateSource for CandidateTable {
    fn len(&self) -> usize {
        self.candidates.len()
    }
    fn read(&self, index: usize) -> Result<Candidate> {
        self.candidates
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Lookup(format!("candidate index {index} out of range")))
    }
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

fn f64_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    Ok(series
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

fn f64_column_or(df: &DataFrame, name: &str, default: f64) -> Result<Vec<f64>> {
    if has_column(df, name) {
        f64_column(df, name)
    } else {
        Ok(vec![default; df.height()])
    }
}

fn bool_column(df: &DataFrame, name: &str) -> Result<Vec<bool>> {
    // nulls arrive as NaN and read as unset
    Ok(f64_column(df, name)?
        .into_iter()
        .map(|v| !v.is_nan() && v != 0.0)
        .collect())
}

pub(crate) fn read_csv(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(Error::Configuration(format!(
            "input file {} does not exist",
            path.display()
        )));
    }
    Ok(CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(PathBuf::from(path)))?
        .finish()?)
}

fn response_columns(df: &DataFrame) -> Result<Vec<(String, Vec<f64>)>> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .filter_map(|c| c.strip_prefix(RESPONSE_PREFIX).map(str::to_string))
        .collect();
    names
        .into_iter()
        .map(|name| {
            let values = f64_column(df, &format!("{RESPONSE_PREFIX}{name}"))?;
            Ok((name, values))
        })
        .collect()
}

fn truth_columns(df: &DataFrame) -> Result<Option<Vec<TruthInfo>>> {
    if !has_column(df, "true_is_signal") {
        return Ok(None);
    }
    let is_signal = bool_column(df, "true_is_signal")?;
    let wexp = f64_column(df, "true_wexp")?;
    let tpi = f64_column(df, "true_tpi")?;
    let thetapi = f64_column(df, "true_thetapi")?;
    let pmu = f64_column(df, "true_pmu")?;
    let thetamu = f64_column(df, "true_thetamu")?;
    let enu = f64_column(df, "true_enu")?;
    let q2 = f64_column(df, "true_q2")?;
    Ok(Some(
        (0..df.height())
            .map(|i| TruthInfo {
                is_signal: is_signal[i],
                wexp: wexp[i],
                tpi: tpi[i],
                thetapi: thetapi[i],
                pmu: pmu[i],
                thetamu: thetamu[i],
                enu: enu[i],
                q2: q2[i],
            })
            .collect(),
    ))
}

impl CandidateTable {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Builds reconstructed candidates from an events frame and an optional tracks frame.
    pub fn from_frames(events: &DataFrame, tracks: Option<&DataFrame>) -> Result<Self> {
        let n = events.height();
        let entry = f64_column(events, "entry")?;
        let weight = f64_column_or(events, "weight", 1.0)?;
        let precuts = bool_column(events, "passes_precuts")?;
        let pmu = f64_column(events, "pmu")?;
        let thetamu = f64_column(events, "thetamu")?;
        let recoil = f64_column(events, "recoil_energy")?;
        let trackless_recoil = f64_column_or(events, "trackless_recoil_energy", 0.0)?;
        let vtx_x = f64_column(events, "vtx_x")?;
        let vtx_y = f64_column(events, "vtx_y")?;
        let vtx_z = f64_column(events, "vtx_z")?;
        let iso = f64_column(events, "n_iso_prongs")?;
        let minos_match = bool_column(events, "minos_match")?;
        let minos_qp = f64_column(events, "minos_qp")?;
        let n_michels = f64_column_or(events, "n_michels", 0.0)?;
        let michel_distance = f64_column_or(events, "best_michel_distance", f64::INFINITY)?;
        let closest = f64_column_or(events, "closest_michel", 0.0)?;
        let tpi_trackless = f64_column_or(events, "tpi_trackless", 0.0)?;
        let responses = response_columns(events)?;
        let truth = truth_columns(events)?;

        let mut candidates: Vec<Candidate> = (0..n)
            .map(|i| Candidate {
                entry: entry[i] as usize,
                weight: weight[i],
                passes_precuts: precuts[i],
                pmu: pmu[i],
                thetamu: thetamu[i],
                recoil_energy: recoil[i],
                trackless_recoil_energy: trackless_recoil[i],
                vtx: [vtx_x[i], vtx_y[i], vtx_z[i]],
                n_iso_prongs: iso[i] as u32,
                minos_match: minos_match[i],
                minos_qp: minos_qp[i],
                tracks: Vec::new(),
                n_michels: n_michels[i] as u32,
                best_michel_distance: michel_distance[i],
                closest_michel: closest[i] != 0.0,
                tpi_trackless: tpi_trackless[i],
                responses: responses
                    .iter()
                    .map(|(name, values)| (name.clone(), values[i]))
                    .collect(),
                truth: truth.as_ref().map(|t| t[i].clone()),
            })
            .collect();

        if let Some(tracks) = tracks {
            let position: HashMap<usize, usize> = candidates
                .iter()
                .enumerate()
                .map(|(i, c)| (c.entry, i))
                .collect();
            let trk_entry = f64_column(tracks, "entry")?;
            let energy = f64_column(tracks, "energy")?;
            let theta = f64_column(tracks, "theta")?;
            let llr = f64_column(tracks, "llr")?;
            let node = f64_column(tracks, "node_energy")?;
            let michel = bool_column(tracks, "has_michel")?;
            for i in 0..tracks.height() {
                let entry = trk_entry[i] as usize;
                let Some(&pos) = position.get(&entry) else {
                    return Err(Error::Lookup(format!(
                        "track row {i} refers to unknown entry {entry}"
                    )));
                };
                candidates[pos].tracks.push(HadronTrack {
                    energy: energy[i],
                    theta: theta[i],
                    llr: llr[i],
                    node_energy: node[i],
                    has_michel: michel[i],
                });
            }
        }
        candidates.sort_by_key(|c| c.entry);
        Ok(Self { candidates })
    }

    /// Builds generated-signal records (truth only) for efficiency denominators.
    pub fn truth_from_frame(events: &DataFrame) -> Result<Self> {
        let entry = f64_column(events, "entry")?;
        let weight = f64_column_or(events, "weight", 1.0)?;
        let responses = response_columns(events)?;
        let truth = truth_columns(events)?.ok_or_else(|| {
            Error::Configuration("truth table has no true_is_signal column".into())
        })?;
        let mut candidates: Vec<Candidate> = truth
            .into_iter()
            .enumerate()
            .map(|(i, truth)| Candidate {
                entry: entry[i] as usize,
                weight: weight[i],
                responses: responses
                    .iter()
                    .map(|(name, values)| (name.clone(), values[i]))
                    .collect(),
                truth: Some(truth),
                ..Candidate::default()
            })
            .collect();
        candidates.sort_by_key(|c| c.entry);
        Ok(Self { candidates })
    }

    pub fn from_csv(events: &Path, tracks: Option<&Path>) -> Result<Self> {
        let events = read_csv(events)?;
        let tracks = tracks.map(read_csv).transpose()?;
        Self::from_frames(&events, tracks.as_ref())
    }

    pub fn truth_from_csv(path: &Path) -> Result<Self> {
        Self::truth_from_frame(&read_csv(path)?)
    }

    /// Flattens the table back into events and tracks frames.
    pub fn to_frames(&self) -> Result<(DataFrame, DataFrame)> {
        let col = |f: &dyn Fn(&Candidate) -> f64| -> Vec<f64> {
            self.candidates.iter().map(f).collect()
        };
        let flag = |b: bool| if b { 1i64 } else { 0i64 };
        let mut columns = vec![
            Series::new(
                "entry",
                self.candidates.iter().map(|c| c.entry as i64).collect::<Vec<_>>(),
            ),
            Series::new("weight", col(&|c| c.weight)),
            Series::new(
                "passes_precuts",
                self.candidates.iter().map(|c| flag(c.passes_precuts)).collect::<Vec<_>>(),
            ),
            Series::new("pmu", col(&|c| c.pmu)),
            Series::new("thetamu", col(&|c| c.thetamu)),
            Series::new("recoil_energy", col(&|c| c.recoil_energy)),
            Series::new("trackless_recoil_energy", col(&|c| c.trackless_recoil_energy)),
            Series::new("vtx_x", col(&|c| c.vtx[0])),
            Series::new("vtx_y", col(&|c| c.vtx[1])),
            Series::new("vtx_z", col(&|c| c.vtx[2])),
            Series::new(
                "n_iso_prongs",
                self.candidates.iter().map(|c| c.n_iso_prongs as i64).collect::<Vec<_>>(),
            ),
            Series::new(
                "minos_match",
                self.candidates.iter().map(|c| flag(c.minos_match)).collect::<Vec<_>>(),
            ),
            Series::new("minos_qp", col(&|c| c.minos_qp)),
            Series::new(
                "n_michels",
                self.candidates.iter().map(|c| c.n_michels as i64).collect::<Vec<_>>(),
            ),
            Series::new("best_michel_distance", col(&|c| c.best_michel_distance)),
            Series::new(
                "closest_michel",
                self.candidates.iter().map(|c| flag(c.closest_michel)).collect::<Vec<_>>(),
            ),
            Series::new("tpi_trackless", col(&|c| c.tpi_trackless)),
        ];
        let response_names: Vec<String> = self
            .candidates
            .iter()
            .flat_map(|c| c.responses.keys().cloned())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        for name in response_names {
            columns.push(Series::new(
                &format!("{RESPONSE_PREFIX}{name}"),
                col(&|c| c.response(&name)),
            ));
        }
        if self.candidates.iter().all(Candidate::is_mc) && !self.candidates.is_empty() {
            let truth = |f: &dyn Fn(&TruthInfo) -> f64| -> Vec<f64> {
                self.candidates
                    .iter()
                    .map(|c| c.truth.as_ref().map(f).unwrap_or(f64::NAN))
                    .collect()
            };
            columns.push(Series::new(
                "true_is_signal",
                self.candidates
                    .iter()
                    .map(|c| flag(c.truth.as_ref().is_some_and(|t| t.is_signal)))
                    .collect::<Vec<_>>(),
            ));
            columns.push(Series::new("true_wexp", truth(&|t| t.wexp)));
            columns.push(Series::new("true_tpi", truth(&|t| t.tpi)));
            columns.push(Series::new("true_thetapi", truth(&|t| t.thetapi)));
            columns.push(Series::new("true_pmu", truth(&|t| t.pmu)));
            columns.push(Series::new("true_thetamu", truth(&|t| t.thetamu)));
            columns.push(Series::new("true_enu", truth(&|t| t.enu)));
            columns.push(Series::new("true_q2", truth(&|t| t.q2)));
        }
        let events = DataFrame::new(columns)?;

        let rows: Vec<(usize, &HadronTrack)> = self
            .candidates
            .iter()
            .flat_map(|c| c.tracks.iter().map(move |t| (c.entry, t)))
            .collect();
        let tracks = DataFrame::new(vec![
            Series::new(
                "entry",
                rows.iter().map(|(e, _)| *e as i64).collect::<Vec<_>>(),
            ),
            Series::new("energy", rows.iter().map(|(_, t)| t.energy).collect::<Vec<_>>()),
            Series::new("theta", rows.iter().map(|(_, t)| t.theta).collect::<Vec<_>>()),
            Series::new("llr", rows.iter().map(|(_, t)| t.llr).collect::<Vec<_>>()),
            Series::new(
                "node_energy",
                rows.iter().map(|(_, t)| t.node_energy).collect::<Vec<_>>(),
            ),
            Series::new(
                "has_michel",
                rows.iter().map(|(_, t)| flag(t.has_michel)).collect::<Vec<_>>(),
            ),
        ])?;
        Ok((events, tracks))
    }

    pub fn write_csv(&self, events: &Path, tracks: &Path) -> Result<()> {
        let (mut events_df, mut tracks_df) = self.to_frames()?;
        CsvWriter::new(File::create(events)?).finish(&mut events_df)?;
        CsvWriter::new(File::create(tracks)?).finish(&mut tracks_df)?;
        Ok(())
    }

    /// Writes the events table alone, as used for generator-level records.
    pub fn write_truth_csv(&self, path: &Path) -> Result<()> {
        let (mut events, _) = self.to_frames()?;
        CsvWriter::new(File::create(path)?).finish(&mut events)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CandidateTable {
        let mut a = Candidate {
            entry: 0,
            pmu: 3000.0,
            thetamu: 0.1,
            passes_precuts: true,
            minos_match: true,
            minos_qp: -0.2,
            tracks: vec![
                HadronTrack {
                    energy: 120.0,
                    theta: 0.5,
                    llr: 2.0,
                    node_energy: 40.0,
                    has_michel: true,
                },
                HadronTrack {
                    energy: 80.0,
                    theta: 1.0,
                    llr: -1.0,
                    node_energy: 300.0,
                    has_michel: false,
                },
            ],
            truth: Some(TruthInfo {
                is_signal: true,
                wexp: 1250.0,
                ..TruthInfo::default()
            }),
            ..Candidate::default()
        };
        a.responses.insert("flux".into(), 0.05);
        let b = Candidate {
            entry: 1,
            truth: Some(TruthInfo::default()),
            best_michel_distance: 12.0,
            ..Candidate::default()
        };
        CandidateTable::new(vec![a, b])
    }

    #[test]
    fn frames_round_trip_preserves_tracks_and_truth() {
        let table = sample();
        let (events, tracks) = table.to_frames().unwrap();
        assert_eq!(events.height(), 2);
        assert_eq!(tracks.height(), 2);
        let back = CandidateTable::from_frames(&events, Some(&tracks)).unwrap();
        let first = back.read(0).unwrap();
        assert_eq!(first.tracks.len(), 2);
        assert!(first.tracks[0].has_michel);
        assert_eq!(first.response("flux"), 0.05);
        assert_eq!(first.truth.as_ref().unwrap().wexp, 1250.0);
        assert!(back.read(1).unwrap().tracks.is_empty());
        assert!(back.read(2).is_err());
    }

    #[test]
    fn field_lookup_by_key() {
        let c = sample().read(0).unwrap();
        assert_eq!(c.field("pmu"), Some(3000.0));
        assert_eq!(c.field("n_tracks"), Some(2.0));
        assert_eq!(c.field("resp_flux"), Some(0.05));
        assert_eq!(c.field("resp_missing"), None);
        assert_eq!(c.field("no_such_branch"), None);
    }

    #[test]
    fn missing_flags_read_as_false() {
        let df = df!("flag" => [Some(1.0), None, Some(f64::NAN), Some(0.0), Some(-1.0)]).unwrap();
        assert_eq!(
            bool_column(&df, "flag").unwrap(),
            vec![true, false, false, false, true]
        );
    }

    #[test]
    fn missing_input_is_a_configuration_error() {
        let err = CandidateTable::from_csv(Path::new("/nonexistent/events.csv"), None);
        assert!(matches!(err, Err(Error::Configuration(_))));
    }
}
