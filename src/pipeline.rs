//! The event loops and the end-to-end drivers built on them.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use indicatif::ProgressIterator;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    candidate::{CandidateSource, CandidateTable},
    config::AnalysisConfig,
    cutflow::CutFlow,
    error::{Error, Result},
    normalize::{FluxProvider, Normalizer, TargetGeometry},
    selection::Selector,
    sideband::fit_sideband,
    store::{HistogramStore, DATA_POT, MC_POT},
    toy::ToyGenerator,
    universe::{Universe, UniverseSet},
    variable::{analysis_variables, find_variable, Role, Variable, FIT_VARIABLE},
    xsec::{extract_all, pot_scale, Extraction, VariableResult},
};

/// Default directory holding the per-playlist samples.
pub const DEFAULT_SAMPLE_DIR: &str = "samples";

/// Exposures of one playlist's simulated and measured samples.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    pub mc_pot: f64,
    pub data_pot: f64,
}

/// File names of one playlist inside a sample directory.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleFiles {
    pub mc_events: PathBuf,
    pub mc_tracks: PathBuf,
    pub mc_truth: PathBuf,
    pub data_events: PathBuf,
    pub data_tracks: PathBuf,
    pub exposure: PathBuf,
}

impl SampleFiles {
    pub fn for_playlist(dir: &Path, playlist: &str) -> Self {
        let file = |suffix: &str| dir.join(format!("{playlist}_{suffix}"));
        Self {
            mc_events: file("mc_events.csv"),
            mc_tracks: file("mc_tracks.csv"),
            mc_truth: file("mc_truth.csv"),
            data_events: file("data_events.csv"),
            data_tracks: file("data_tracks.csv"),
            exposure: file("pot.json"),
        }
    }

    pub fn read_exposure(&self) -> Result<Exposure> {
        let file = File::open(&self.exposure).map_err(|e| {
            Error::Configuration(format!(
                "cannot open exposure record {}: {e}",
                self.exposure.display()
            ))
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn write_exposure(&self, exposure: &Exposure) -> Result<()> {
        serde_json::to_writer_pretty(BufWriter::new(File::create(&self.exposure)?), exposure)?;
        Ok(())
    }

    pub fn load_mc(&self) -> Result<CandidateTable> {
        CandidateTable::from_csv(&self.mc_events, Some(&self.mc_tracks))
    }

    pub fn load_truth(&self) -> Result<CandidateTable> {
        CandidateTable::truth_from_csv(&self.mc_truth)
    }

    pub fn load_data(&self) -> Result<CandidateTable> {
        CandidateTable::from_csv(&self.data_events, Some(&self.data_tracks))
    }
}

/// Sample directory to read. Grid jobs must name it explicitly.
pub fn resolve_input(grid: bool, input: Option<&Path>) -> Result<PathBuf> {
    match (grid, input) {
        (_, Some(path)) => Ok(path.to_path_buf()),
        (true, None) => Err(Error::Configuration(
            "grid mode requires an explicit --input".into(),
        )),
        (false, None) => Ok(PathBuf::from(DEFAULT_SAMPLE_DIR)),
    }
}

/// Generates and writes a toy playlist; the data sample uses `seed + 1`.
pub fn write_toy_samples(
    files: &SampleFiles,
    n_mc: usize,
    n_data: usize,
    seed: u64,
) -> Result<Exposure> {
    let mc = ToyGenerator::new(seed).generate(n_mc, true);
    let data = ToyGenerator::new(seed + 1).generate(n_data, false);
    mc.reco.write_csv(&files.mc_events, &files.mc_tracks)?;
    mc.truth.write_truth_csv(&files.mc_truth)?;
    data.reco.write_csv(&files.data_events, &files.data_tracks)?;
    let exposure = Exposure {
        mc_pot: mc.pot,
        data_pot: data.pot,
    };
    files.write_exposure(&exposure)?;
    info!(n_mc, n_data, ?exposure, "wrote toy samples");
    Ok(exposure)
}

/// Fills every simulation histogram and writes them with the MC exposure.
///
/// Reconstructed candidates are classified once per central value and once
/// per lateral universe; generated-signal records fill the efficiency
/// denominators over the truth-level universes.
pub fn make_mc_inputs(
    config: &AnalysisConfig,
    mc: &dyn CandidateSource,
    truth: Option<&dyn CandidateSource>,
    mc_pot: f64,
) -> Result<(HistogramStore, Vec<Variable>)> {
    config.validate()?;
    let selector = Selector::new(&config.signal, &config.selection)?;
    let universes = UniverseSet::from_config(&config.systematics);
    let truth_universes = universes.truth_subset();
    let mut variables = analysis_variables(truth.is_some());
    for var in variables.iter_mut() {
        var.init_mc(&universes, &truth_universes)?;
    }
    info!(
        candidates = mc.len(),
        universes = universes.n_universes(),
        variables = variables.len(),
        "filling MC histograms"
    );

    let mut classifications = 0;
    for index in (0..mc.len()).progress() {
        let candidate = mc.read(index)?;
        classifications += selector.for_each_universe(&candidate, &universes, |universe, class| {
            for var in variables.iter_mut() {
                var.fill_mc(&candidate, universe, class, &config.signal)?;
            }
            Ok(())
        })?;
    }
    debug!(classifications, "reconstructed loop done");

    if let Some(truth) = truth {
        info!(records = truth.len(), "filling efficiency denominators");
        for index in (0..truth.len()).progress() {
            let record = truth.read(index)?;
            for universe in truth_universes.iter() {
                for var in variables.iter_mut().filter(|v| v.is_true()) {
                    var.fill_truth(&record, universe)?;
                }
            }
        }
    }

    let mut store = HistogramStore::new();
    for var in variables.iter_mut() {
        var.sync();
        var.write(&mut store);
    }
    store.write_pot(MC_POT, mc_pot);
    Ok((store, variables))
}

/// Selects data in the central value and fills the data histograms of every
/// reconstructed variable, then fills their missing error bands from the
/// simulated selection.
pub fn select_data(
    config: &AnalysisConfig,
    data: &dyn CandidateSource,
    variables: &mut [Variable],
) -> Result<()> {
    let selector = Selector::new(&config.signal, &config.selection)?;
    let cv = Universe::cv();
    for var in variables.iter_mut() {
        var.init_data()?;
    }
    info!(candidates = data.len(), "selecting data");
    let mut selected = 0usize;
    for index in (0..data.len()).progress() {
        let candidate = data.read(index)?;
        let class = selector.classify(&candidate, &cv);
        selected += usize::from(class.passes_all_cuts());
        for var in variables.iter_mut() {
            var.fill_data(&candidate, &cv, &class)?;
        }
    }
    info!(selected, "data selection done");

    for var in variables.iter_mut().filter(|v| !v.is_true()) {
        var.sync();
        let Some(reference) = var.hists.get(Role::SelectionMc).cloned() else {
            continue;
        };
        for role in Role::DATA {
            if let Some(hist) = var.hists.get_mut(role) {
                let added = hist.add_missing_bands_from(&reference);
                debug!(hist = hist.name(), n = added.len(), "backfilled data bands");
                hist.sync();
            }
        }
    }
    Ok(())
}

pub struct ExtractionOutput {
    pub store: HistogramStore,
    pub results: Vec<VariableResult>,
}

/// Data extraction against persisted MC inputs: selection, sideband fit and
/// the per-variable cross-section chain.
pub fn extract_cross_sections(
    config: &AnalysisConfig,
    prior: &HistogramStore,
    data: &dyn CandidateSource,
    data_pot: f64,
    flux: &dyn FluxProvider,
) -> Result<ExtractionOutput> {
    config.validate()?;
    let mut store = HistogramStore::new();
    store.copy_from(prior);
    store.write_pot(DATA_POT, data_pot);
    let mc_pot = prior.read_pot(MC_POT)?;

    let (mut reco, mut truth): (Vec<Variable>, Vec<Variable>) =
        analysis_variables(true).into_iter().partition(|v| !v.is_true());
    for var in reco.iter_mut().chain(truth.iter_mut()) {
        var.load_mc(prior)?;
    }
    select_data(config, data, &mut reco)?;
    for var in &reco {
        var.write(&mut store);
    }

    let fit_var = find_variable(&reco, FIT_VARIABLE)
        .ok_or_else(|| Error::Lookup(format!("fit variable {FIT_VARIABLE}")))?;
    let fit = fit_sideband(fit_var, pot_scale(data_pot, mc_pot))?;
    fit.write(&mut store);

    let targets = TargetGeometry::fiducial(&config.signal, &config.normalization);
    let normalizer = Normalizer::new(flux, targets, &config.normalization);
    let ctx = Extraction {
        fit: &fit,
        normalizer: &normalizer,
        data_pot,
        mc_pot,
    };
    let results = extract_all(&mut reco, &truth, &ctx, &mut store)?;
    info!(extracted = results.len(), "cross sections done");
    Ok(ExtractionOutput { store, results })
}

/// Weighted cut flow of the active pipeline over the three samples.
pub fn run_cutflow(
    config: &AnalysisConfig,
    mc: &dyn CandidateSource,
    truth: Option<&dyn CandidateSource>,
    data: &dyn CandidateSource,
) -> Result<CutFlow> {
    config.validate()?;
    let selector = Selector::new(&config.signal, &config.selection)?;
    let mut flow = CutFlow::new(selector.active_cuts());
    for index in (0..mc.len()).progress() {
        flow.add_mc(&selector, &mc.read(index)?);
    }
    if let Some(truth) = truth {
        for index in 0..truth.len() {
            flow.add_generated(&truth.read(index)?);
        }
    }
    for index in (0..data.len()).progress() {
        flow.add_data(&selector, &data.read(index)?);
    }
    Ok(flow)
}

/// Writes `frame` as a tab-separated table.
pub fn write_tsv(frame: &mut DataFrame, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = CsvWriter::new(file);
    writer = writer.with_separator(b'\t');
    writer.finish(frame)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_mode_requires_input() {
        assert!(matches!(resolve_input(true, None), Err(Error::Configuration(_))));
        assert_eq!(resolve_input(false, None).unwrap(), PathBuf::from(DEFAULT_SAMPLE_DIR));
        assert_eq!(
            resolve_input(true, Some(Path::new("/grid/in"))).unwrap(),
            PathBuf::from("/grid/in")
        );
    }

    #[test]
    fn toy_samples_round_trip_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let files = SampleFiles::for_playlist(dir.path(), "ME1A");
        let exposure = write_toy_samples(&files, 60, 30, 11).unwrap();
        assert_eq!(files.read_exposure().unwrap(), exposure);
        let mc = files.load_mc().unwrap();
        let truth = files.load_truth().unwrap();
        let data = files.load_data().unwrap();
        assert_eq!(mc.len(), 60);
        assert_eq!(truth.len(), 60);
        assert_eq!(data.len(), 30);
        assert!(mc.candidates().iter().all(|c| c.is_mc()));
        assert!(data.candidates().iter().all(|c| !c.is_mc()));
        let regenerated = ToyGenerator::new(11).generate(60, true);
        for (read, generated) in mc.candidates().iter().zip(regenerated.reco.candidates()) {
            assert_eq!(read.entry, generated.entry);
            assert_eq!(read.tracks.len(), generated.tracks.len());
        }
    }

    #[test]
    fn mc_inputs_write_every_role() {
        let mut config = AnalysisConfig::default();
        config.systematics.enabled = false;
        let sample = ToyGenerator::new(5).generate(400, true);
        let truth: &dyn CandidateSource = &sample.truth;
        let (store, variables) =
            make_mc_inputs(&config, &sample.reco, Some(truth), sample.pot).unwrap();
        assert_eq!(store.read_pot(MC_POT).unwrap(), sample.pot);
        for var in &variables {
            if var.is_true() {
                assert!(store.contains(&var.store_name(Role::EffDen)));
            } else {
                assert!(store.contains(&var.store_name(Role::SelectionMc)));
                assert!(store.contains(&format!("migration_{}", var.name())));
            }
        }
        let selected = store.read_hist1d("selection_mc_pmu").unwrap();
        assert!(selected.cv().integral() > 0.0);
    }
}
